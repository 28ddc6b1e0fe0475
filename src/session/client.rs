use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::state::SessionState;
use super::SessionConfig;
use crate::attestation::constraint::Constraint;
use crate::attestation::types::AttestationRecord;
use crate::attestation::AttestationVerifier;
use crate::crypto::hpke::KeyPair;
use crate::crypto::PublicKey;
use crate::error::{CryptoError, Error, FrameError, SessionError};
use crate::frame::codec::FrameCodec;
use crate::frame::{write_frame, FrameReader};
use crate::mail::mailbox::Mailbox;
use crate::mail::{OutboundMail, PlaintextEnvelope};

/// Client end of a mail session over any `AsyncRead + AsyncWrite` transport.
///
/// All mail uses one topic, with outbound sequence numbers starting at 0.
/// Errors about a single message (authentication, replay, topic) leave the
/// session usable; transport and framing errors close it for good.
pub struct MailSession<T> {
    io: FrameReader<T>,
    write_codec: FrameCodec,
    state: SessionState,
    mailbox: Mailbox,
    topic: String,
    next_sequence: u64,
    highest_sent: Option<u64>,
    highest_received: Option<u64>,
    attestation: Option<AttestationRecord>,
    config: SessionConfig,
}

impl<T: AsyncRead + AsyncWrite + Unpin> MailSession<T> {
    /// Wrap a connected transport. The session starts awaiting attestation.
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let topic = config
            .topic
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mailbox = Mailbox::new(KeyPair::generate()).expect_topic(topic.clone());

        Self {
            io: FrameReader::with_codec(
                transport,
                FrameCodec::with_max_payload_size(config.max_payload_size),
            ),
            write_codec: FrameCodec::with_max_payload_size(config.max_payload_size),
            state: SessionState::AwaitingAttestation,
            mailbox,
            topic,
            next_sequence: 0,
            highest_sent: None,
            highest_received: None,
            attestation: None,
            config,
        }
    }

    /// Wrap a transport and accept the node's attestation in one step.
    pub async fn connect(
        transport: T,
        constraint: &Constraint,
        verifier: &dyn AttestationVerifier,
        config: SessionConfig,
    ) -> Result<Self, Error> {
        let mut session = Self::new(transport, config);
        session.attest(constraint, verifier).await?;
        Ok(session)
    }

    /// Read the first frame as an attestation record, verify it, and check it
    /// against `constraint`.
    ///
    /// Any failure is fatal: the session closes and no mail can be sent.
    pub async fn attest(
        &mut self,
        constraint: &Constraint,
        verifier: &dyn AttestationVerifier,
    ) -> Result<&AttestationRecord, Error> {
        self.ensure(
            self.state == SessionState::AwaitingAttestation,
            "AWAITING_ATTESTATION",
        )?;

        let raw = match tokio::time::timeout(self.config.attestation_timeout, self.io.read_frame())
            .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return Err(self.fail(e)),
            Err(_) => return Err(self.fail(SessionError::Timeout.into())),
        };

        let record = match verifier.verify(&raw).await {
            Ok(record) => record,
            Err(e) => return Err(self.fail(e.into())),
        };
        if let Err(e) = constraint.check(&record) {
            return Err(self.fail(e.into()));
        }

        tracing::info!(attestation = %record, topic = %self.topic, "connected to attested node");
        self.mailbox.pin_peer(*record.public_key());
        self.state = SessionState::ExchangingMail;
        Ok(self.attestation.insert(record))
    }

    /// Encrypt `body` to the node and send it. Returns the sequence number used.
    pub async fn send(&mut self, body: impl Into<Bytes>) -> Result<u64, Error> {
        self.ensure(self.state.can_send(), "EXCHANGING_MAIL")?;
        let recipient = self.peer_public_key()?;

        let sequence = self.next_sequence;
        let next = sequence
            .checked_add(1)
            .ok_or_else(|| CryptoError::SequenceExhausted(self.topic.clone()))?;
        let mail = OutboundMail::create(
            body,
            self.topic.clone(),
            sequence,
            recipient,
            self.mailbox.keypair(),
        )
        .encrypt()?;

        match write_frame(self.io.get_mut(), &mut self.write_codec, mail.into_bytes()).await {
            Ok(()) => {}
            // Rejected before any byte hit the wire.
            Err(e @ Error::Frame(FrameError::PayloadTooLarge { .. })) => return Err(e),
            Err(e) => return Err(self.fail(e)),
        }

        self.next_sequence = next;
        self.highest_sent = Some(sequence);
        tracing::debug!(topic = %self.topic, sequence, "mail sent");
        Ok(sequence)
    }

    /// Receive and decrypt the next reply.
    pub async fn recv(&mut self) -> Result<PlaintextEnvelope, Error> {
        self.ensure(self.state.can_receive(), "EXCHANGING_MAIL or DECLARING")?;

        let raw = match self.io.read_frame().await {
            Ok(raw) => raw,
            Err(e) => return Err(self.fail(e)),
        };
        let envelope = self.mailbox.decrypt(&raw)?;

        self.highest_received = Some(
            self.highest_received
                .map_or(envelope.sequence, |h| h.max(envelope.sequence)),
        );
        tracing::debug!(topic = %envelope.topic, sequence = envelope.sequence, "mail received");
        Ok(envelope)
    }

    /// Stop sending and wait for the node's single declaration mail.
    pub async fn await_declaration(&mut self) -> Result<PlaintextEnvelope, Error> {
        self.ensure(self.state.can_receive(), "EXCHANGING_MAIL or DECLARING")?;
        if self.state != SessionState::Declaring {
            tracing::debug!(topic = %self.topic, "awaiting declaration");
            self.state = SessionState::Declaring;
        }
        self.recv().await
    }

    /// Close the session and shut down the transport's write side.
    ///
    /// Closing an already closed session is a no-op.
    pub async fn close(&mut self) -> Result<(), Error> {
        if self.state.is_closed() {
            return Ok(());
        }
        self.state = SessionState::Closed;
        self.io.get_mut().shutdown().await?;
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attestation(&self) -> Option<&AttestationRecord> {
        self.attestation.as_ref()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Our mail key for this session.
    pub fn public_key(&self) -> PublicKey {
        self.mailbox.public_key()
    }

    pub fn highest_sent(&self) -> Option<u64> {
        self.highest_sent
    }

    pub fn highest_received(&self) -> Option<u64> {
        self.highest_received
    }

    fn peer_public_key(&self) -> Result<PublicKey, Error> {
        self.attestation
            .as_ref()
            .map(|record| *record.public_key())
            .ok_or_else(|| {
                SessionError::InvalidState {
                    expected: "EXCHANGING_MAIL",
                    actual: self.state.name(),
                }
                .into()
            })
    }

    fn ensure(&self, allowed: bool, expected: &'static str) -> Result<(), Error> {
        if self.state.is_closed() {
            return Err(SessionError::Closed.into());
        }
        if !allowed {
            return Err(SessionError::InvalidState {
                expected,
                actual: self.state.name(),
            }
            .into());
        }
        Ok(())
    }

    fn fail(&mut self, error: Error) -> Error {
        tracing::debug!(state = %self.state, error = %error, "session closed on error");
        self.state = SessionState::Closed;
        error
    }
}

#[cfg(feature = "tcp")]
impl MailSession<tokio::net::TcpStream> {
    /// Dial `addr` and accept the node's attestation.
    ///
    /// Only the TCP connect is retried, per `config.retry_policy` (a single
    /// attempt when unset). An attestation failure is returned at once.
    pub async fn connect_tcp(
        addr: std::net::SocketAddr,
        connect_timeout: std::time::Duration,
        constraint: &Constraint,
        verifier: &dyn AttestationVerifier,
        config: SessionConfig,
    ) -> Result<Self, Error> {
        let policy = config
            .retry_policy
            .clone()
            .unwrap_or_else(super::retry::RetryPolicy::none);
        let stream =
            crate::transport::tcp::connect_with_retry(addr, connect_timeout, &policy).await?;
        Self::connect(stream, constraint, verifier, config).await
    }
}
