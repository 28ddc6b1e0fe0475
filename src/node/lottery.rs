//! Reference node: a lottery that takes numbers by mail and draws a winner
//! on a host command.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use rand::seq::IteratorRandom;
use tokio::sync::Mutex;

use super::{IsolatedNode, Outbox};
use crate::attestation::signer::AttestationSigner;
use crate::attestation::types::{AttestationRecord, Measurement, SecurityMode};
use crate::attestation::AttestationProvider;
use crate::crypto::hpke::KeyPair;
use crate::crypto::PublicKey;
use crate::error::{AttestError, NodeError};
use crate::mail::mailbox::Mailbox;
use crate::mail::{OutboundMail, TopicSequencer};

/// Lottery numbers are exactly this many decimal digits.
pub const TICKET_DIGITS: usize = 6;

pub const DECLARE_COMMAND: &[u8] = b"DECLARE";

pub const REPLY_REGISTERED: &str = "Lottery number registered.";
pub const REPLY_NOT_DECLARED: &str = "Results not declared";
pub const REPLY_INVALID: &str = "Invalid input";
pub const DRAW_NOT_POSSIBLE: &str = "Draw not possible: No lotteries were used.";

/// Code identity hashed into the reference node's default measurement.
const CODE_IDENTITY: &[u8] = b"enclave-mail/lottery-node/v1";

/// Measurement the reference node reports unless told otherwise.
pub fn default_measurement() -> Measurement {
    Measurement::of(CODE_IDENTITY)
}

/// Where to send mail for a client that has written to us, and the sequence
/// numbers already used on that client's topics.
struct ClientRoute {
    topic: String,
    outbox: Outbox,
    sequencer: TopicSequencer,
}

struct LotteryState {
    mailbox: Mailbox,
    tickets: BTreeSet<u32>,
    result: Option<String>,
    clients: HashMap<PublicKey, ClientRoute>,
}

pub struct LotteryNode {
    keypair: KeyPair,
    attestation: AttestationRecord,
    state: Mutex<LotteryState>,
}

impl LotteryNode {
    /// Build a node with a fresh mail key, attested by `signer`.
    pub fn new(
        signer: &AttestationSigner,
        measurement: Measurement,
        product_id: u16,
        security_mode: SecurityMode,
    ) -> Self {
        let keypair = KeyPair::generate();
        let attestation =
            signer.attest(keypair.public_bytes(), measurement, product_id, security_mode);
        tracing::info!(%attestation, "lottery node attested");

        Self {
            state: Mutex::new(LotteryState {
                mailbox: Mailbox::new(keypair.clone()),
                tickets: BTreeSet::new(),
                result: None,
                clients: HashMap::new(),
            }),
            keypair,
            attestation,
        }
    }

    /// A node that signs its own record in SIMULATION mode.
    pub fn simulated(measurement: Measurement, product_id: u16) -> Self {
        Self::new(
            &AttestationSigner::generate(),
            measurement,
            product_id,
            SecurityMode::Simulation,
        )
    }

    pub fn attestation(&self) -> &AttestationRecord {
        &self.attestation
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_bytes()
    }

    pub async fn ticket_count(&self) -> usize {
        self.state.lock().await.tickets.len()
    }
}

impl LotteryState {
    fn handle_request(&mut self, body: &[u8]) -> Result<String, NodeError> {
        let text = std::str::from_utf8(body)
            .map_err(|_| NodeError::InvalidInput("request is not UTF-8".into()))?;
        let parts: Vec<&str> = text.split(':').collect();
        let [command, argument] = parts.as_slice() else {
            return Err(NodeError::InvalidInput(format!(
                "expected COMMAND:ARGUMENT, got {} fields",
                parts.len()
            )));
        };

        match *command {
            "BUY" => self.buy(argument),
            "RESULT" => Ok(self
                .result
                .clone()
                .unwrap_or_else(|| REPLY_NOT_DECLARED.to_owned())),
            _ => Ok(REPLY_INVALID.to_owned()),
        }
    }

    fn buy(&mut self, argument: &str) -> Result<String, NodeError> {
        if argument.len() != TICKET_DIGITS || !argument.bytes().all(|b| b.is_ascii_digit()) {
            return Err(NodeError::InvalidInput(format!(
                "lottery number must be {TICKET_DIGITS} digits"
            )));
        }
        let number: u32 = argument
            .parse()
            .map_err(|_| NodeError::InvalidInput(argument.to_owned()))?;

        if self.tickets.insert(number) {
            Ok(REPLY_REGISTERED.to_owned())
        } else {
            Ok(format!("Lottery number {argument} already selected."))
        }
    }

    fn draw(&mut self) -> String {
        let result = match self.tickets.iter().choose(&mut rand::thread_rng()) {
            Some(winner) => format!("{winner:0width$}", width = TICKET_DIGITS),
            None => DRAW_NOT_POSSIBLE.to_owned(),
        };
        self.result = Some(result.clone());
        result
    }
}

#[async_trait]
impl AttestationProvider for LotteryNode {
    async fn produce_attestation(&self) -> Result<Bytes, AttestError> {
        Ok(self.attestation.serialize())
    }
}

#[async_trait]
impl IsolatedNode for LotteryNode {
    async fn deliver_mail(&self, mail: Bytes, reply_to: Outbox) -> Result<(), NodeError> {
        // The reply is built under the lock and posted after it is released.
        let reply = {
            let mut state = self.state.lock().await;
            let envelope = state.mailbox.decrypt(&mail)?;
            let Some(client_pk) = envelope.sender_public_key else {
                return Err(NodeError::InvalidInput("mail carries no sender key".into()));
            };

            tracing::debug!(
                topic = %envelope.topic,
                sequence = envelope.sequence,
                "lottery request received"
            );

            let response = state.handle_request(&envelope.body)?;
            let route = state.clients.entry(client_pk).or_insert_with(|| ClientRoute {
                topic: envelope.topic.clone(),
                outbox: reply_to.clone(),
                sequencer: TopicSequencer::new(),
            });
            route.topic.clone_from(&envelope.topic);
            route.outbox = reply_to.clone();
            let sequence = route.sequencer.next(&envelope.topic)?;

            OutboundMail::reply(
                Bytes::from(response),
                envelope.topic,
                sequence,
                client_pk,
                &self.keypair,
            )
            .encrypt()?
        };
        reply_to.post(reply).await
    }

    async fn invoke_command(&self, command: &[u8]) -> Result<Bytes, NodeError> {
        if command != DECLARE_COMMAND {
            return Err(NodeError::UnknownCommand(
                String::from_utf8_lossy(command).into_owned(),
            ));
        }

        let (result, announcements) = {
            let mut state = self.state.lock().await;
            let result = state.draw();
            tracing::info!(tickets = state.tickets.len(), "lottery declared");

            let mut announcements = Vec::with_capacity(state.clients.len());
            for (client_pk, route) in state.clients.iter_mut() {
                let sequence = route.sequencer.next(&route.topic)?;
                let mail = OutboundMail::reply(
                    Bytes::from(result.clone()),
                    route.topic.clone(),
                    sequence,
                    *client_pk,
                    &self.keypair,
                )
                .encrypt()?;
                announcements.push((route.outbox.clone(), mail));
            }
            (result, announcements)
        };

        for (outbox, mail) in announcements {
            // A client that has gone away just misses the announcement.
            if let Err(e) = outbox.post(mail).await {
                tracing::debug!(error = %e, "declaration not delivered");
            }
        }

        Ok(Bytes::from(result))
    }
}
