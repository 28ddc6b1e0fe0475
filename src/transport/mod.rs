/// TCP transport helpers (connect, connect with retry, listen, accept).
#[cfg(feature = "tcp")]
pub mod tcp;
