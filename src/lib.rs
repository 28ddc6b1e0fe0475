pub mod attestation;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod mail;
pub mod node;
pub mod relay;
pub mod session;
pub mod transport;

// Re-export key types at crate root for convenience.
pub use error::{Error, Result};
pub use mail::mailbox::Mailbox;
pub use mail::{EncryptedMail, OutboundMail, PlaintextEnvelope};
pub use session::client::MailSession;
pub use session::state::SessionState;
pub use session::SessionConfig;

pub use attestation::constraint::Constraint;
pub use attestation::types::{AttestationRecord, Measurement, SecurityMode};
pub use attestation::{AttestationProvider, AttestationVerifier, TrustedAuthorities};

pub use node::{IsolatedNode, Outbox};
pub use relay::server::{Relay, RelayConfig, RelayHandle};
pub use relay::RoutingEnvelope;

#[cfg(feature = "simulation")]
pub use node::lottery::LotteryNode;
