pub mod client;
pub mod retry;
pub mod state;

use std::time::Duration;

use crate::error::{Error, SessionError};

use self::retry::RetryPolicy;

/// Configuration for a client mail session.
///
/// The cipher suite is always X25519 + HKDF-SHA256 + ChaCha20-Poly1305.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum payload size in bytes (default: 32 MiB).
    pub max_payload_size: u32,

    /// Maximum time to wait for the attestation record (default: 30s).
    pub attestation_timeout: Duration,

    /// Optional retry policy for connection attempts.
    pub retry_policy: Option<RetryPolicy>,

    /// Topic for this session's mail. A random one is chosen when unset.
    pub topic: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_payload_size: crate::frame::MAX_PAYLOAD_SIZE,
            attestation_timeout: Duration::from_secs(30),
            retry_policy: None,
            topic: None,
        }
    }
}

impl SessionConfig {
    /// Create a builder for constructing a `SessionConfig`.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    max_payload_size: u32,
    attestation_timeout: Duration,
    retry_policy: Option<RetryPolicy>,
    topic: Option<String>,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            max_payload_size: defaults.max_payload_size,
            attestation_timeout: defaults.attestation_timeout,
            retry_policy: None,
            topic: None,
        }
    }
}

impl SessionConfigBuilder {
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.max_payload_size = size;
        self
    }

    pub fn attestation_timeout(mut self, timeout: Duration) -> Self {
        self.attestation_timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Build the `SessionConfig`, validating that all values are sensible.
    pub fn build(self) -> Result<SessionConfig, Error> {
        if self.max_payload_size == 0 {
            return Err(SessionError::InvalidConfig("max_payload_size must be > 0".into()).into());
        }
        if self.attestation_timeout.is_zero() {
            return Err(
                SessionError::InvalidConfig("attestation_timeout must be > 0".into()).into(),
            );
        }
        if let Some(topic) = &self.topic {
            if topic.is_empty() || topic.len() > crate::mail::MAX_TOPIC_LEN {
                return Err(SessionError::InvalidConfig(format!(
                    "topic must be 1..={} bytes",
                    crate::mail::MAX_TOPIC_LEN
                ))
                .into());
            }
        }
        Ok(SessionConfig {
            max_payload_size: self.max_payload_size,
            attestation_timeout: self.attestation_timeout,
            retry_policy: self.retry_policy,
            topic: self.topic,
        })
    }
}
