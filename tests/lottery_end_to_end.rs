#![cfg(feature = "simulation")]
//! End-to-end lottery runs: client session, host relay and lottery node over
//! in-memory transports.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::DuplexStream;

use enclave_mail::attestation::signer::AttestationSigner;
use enclave_mail::crypto::hpke::KeyPair;
use enclave_mail::error::{AttestError, NodeError};
use enclave_mail::frame::codec::FrameCodec;
use enclave_mail::frame::{write_frame, FrameReader};
use enclave_mail::node::lottery::{DECLARE_COMMAND, REPLY_REGISTERED};
use enclave_mail::{
    AttestationProvider, AttestationRecord, Constraint, Error, IsolatedNode, LotteryNode,
    MailSession, Measurement, OutboundMail, Outbox, Relay, RelayConfig, SecurityMode,
    SessionConfig, SessionState, TrustedAuthorities,
};

const MEASUREMENT: Measurement = Measurement([0xAA; 32]);

/// Wraps the lottery node and keeps a copy of everything the host hands it.
struct TappedNode {
    inner: LotteryNode,
    seen: Mutex<Vec<Bytes>>,
}

#[async_trait]
impl AttestationProvider for TappedNode {
    async fn produce_attestation(&self) -> Result<Bytes, AttestError> {
        self.inner.produce_attestation().await
    }
}

#[async_trait]
impl IsolatedNode for TappedNode {
    async fn deliver_mail(&self, mail: Bytes, reply_to: Outbox) -> Result<(), NodeError> {
        self.seen.lock().unwrap().push(mail.clone());
        self.inner.deliver_mail(mail, reply_to).await
    }

    async fn invoke_command(&self, command: &[u8]) -> Result<Bytes, NodeError> {
        self.inner.invoke_command(command).await
    }
}

fn tapped_node() -> Arc<TappedNode> {
    Arc::new(TappedNode {
        inner: LotteryNode::simulated(MEASUREMENT, 1),
        seen: Mutex::new(Vec::new()),
    })
}

fn connect_client(relay: &Relay) -> DuplexStream {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let relay = relay.clone();
    tokio::spawn(async move { relay.serve(server).await });
    client
}

fn insecure_constraint() -> Constraint {
    Constraint::parse(&format!("S:{MEASUREMENT} PROD:1 SEC:INSECURE")).unwrap()
}

fn t1_config() -> SessionConfig {
    SessionConfig::builder().topic("T1").build().unwrap()
}

#[tokio::test]
async fn five_numbers_then_declaration() {
    let node = tapped_node();
    let relay = Relay::new(RelayConfig::default(), node.clone());
    let handle = relay.handle();

    let mut session = MailSession::connect(
        connect_client(&relay),
        &insecure_constraint(),
        &TrustedAuthorities::new(),
        t1_config(),
    )
    .await
    .unwrap();
    assert_eq!(
        session.attestation().unwrap().security_mode(),
        SecurityMode::Simulation
    );

    for i in 0..5u64 {
        let seq = session.send(format!("BUY:12345{i}")).await.unwrap();
        assert_eq!(seq, i);
    }
    for i in 0..5u64 {
        let reply = session.recv().await.unwrap();
        assert_eq!(reply.topic, "T1");
        assert_eq!(reply.sequence, i);
        assert_eq!(&reply.body[..], REPLY_REGISTERED.as_bytes());
    }

    handle.wait_for_deliveries(5).await.unwrap();
    let declared = handle.invoke_command(DECLARE_COMMAND).await.unwrap();
    let declared = String::from_utf8(declared.to_vec()).unwrap();
    assert!(
        (0..5).any(|i| declared == format!("12345{i}")),
        "unexpected winner {declared}"
    );

    let announcement = session.await_declaration().await.unwrap();
    assert_eq!(&announcement.body[..], declared.as_bytes());
    assert_eq!(announcement.sequence, 5);
    assert_eq!(session.state(), SessionState::Declaring);

    // The host only ever handled ciphertext.
    let seen = node.seen.lock().unwrap();
    assert_eq!(seen.len(), 5);
    for mail in seen.iter() {
        assert!(!mail.windows(4).any(|w| w == b"BUY:"));
        assert!(!mail.windows(6).any(|w| w == b"123450"));
    }
}

#[tokio::test]
async fn duplicate_number_is_reported() {
    let relay = Relay::new(RelayConfig::default(), tapped_node());
    let mut session = MailSession::connect(
        connect_client(&relay),
        &insecure_constraint(),
        &TrustedAuthorities::new(),
        t1_config(),
    )
    .await
    .unwrap();

    session.send("BUY:777777").await.unwrap();
    session.send("BUY:777777").await.unwrap();
    session.send("RESULT:?").await.unwrap();

    let replies: Vec<String> = {
        let mut out = Vec::new();
        for _ in 0..3 {
            let reply = session.recv().await.unwrap();
            out.push(String::from_utf8(reply.body.to_vec()).unwrap());
        }
        out
    };
    assert_eq!(
        replies,
        [
            REPLY_REGISTERED,
            "Lottery number 777777 already selected.",
            "Results not declared"
        ]
    );
}

#[tokio::test]
async fn clients_sharing_a_topic_both_get_replies() {
    let node = tapped_node();
    let relay = Relay::new(RelayConfig::default(), node.clone());
    let constraint = insecure_constraint();
    let verifier = TrustedAuthorities::new();
    let mut alice =
        MailSession::connect(connect_client(&relay), &constraint, &verifier, t1_config())
            .await
            .unwrap();
    let mut bob =
        MailSession::connect(connect_client(&relay), &constraint, &verifier, t1_config())
            .await
            .unwrap();

    for i in 1..=3 {
        alice.send(format!("BUY:10000{i}")).await.unwrap();
        assert_eq!(&alice.recv().await.unwrap().body[..], REPLY_REGISTERED.as_bytes());
    }

    bob.send("BUY:200000").await.unwrap();
    let reply = tokio::time::timeout(std::time::Duration::from_secs(2), bob.recv())
        .await
        .expect("second client on T1 got no reply")
        .unwrap();
    assert_eq!(&reply.body[..], REPLY_REGISTERED.as_bytes());
    assert_eq!(reply.sequence, 0);
    assert_eq!(node.inner.ticket_count().await, 4);
}

#[tokio::test]
async fn production_constraint_refuses_simulated_node() {
    let relay = Relay::new(RelayConfig::default(), tapped_node());
    let downgrade_guard = Constraint::parse(&format!("S:{MEASUREMENT} PROD:1")).unwrap();

    let result = MailSession::connect(
        connect_client(&relay),
        &downgrade_guard,
        &TrustedAuthorities::new(),
        t1_config(),
    )
    .await;

    match result {
        Err(Error::Attestation(AttestError::ConstraintViolation { attestation, .. })) => {
            assert!(attestation.contains("SIMULATION"));
        }
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("simulated node accepted under a PRODUCTION constraint"),
    }
}

#[tokio::test]
async fn wrong_measurement_is_refused() {
    let relay = Relay::new(RelayConfig::default(), tapped_node());
    let other = Measurement([0xBB; 32]);
    let constraint = Constraint::parse(&format!("S:{other} PROD:1 SEC:INSECURE")).unwrap();

    let err = MailSession::connect(
        connect_client(&relay),
        &constraint,
        &TrustedAuthorities::new(),
        t1_config(),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(
        err,
        Error::Attestation(AttestError::ConstraintViolation { .. })
    ));
}

#[tokio::test]
async fn debug_node_needs_trusted_authority() {
    let authority = AttestationSigner::generate();
    let node = Arc::new(LotteryNode::new(
        &authority,
        MEASUREMENT,
        1,
        SecurityMode::Debug,
    ));
    let relay = Relay::new(RelayConfig::default(), node);
    let constraint = Constraint::parse(&format!("S:{MEASUREMENT} PROD:1 SEC:DEBUG")).unwrap();

    let err = MailSession::connect(
        connect_client(&relay),
        &constraint,
        &TrustedAuthorities::new(),
        t1_config(),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(
        err,
        Error::Attestation(AttestError::UntrustedAuthority(_))
    ));

    let trusted = TrustedAuthorities::new().with_authority(authority.authority_key());
    let session = MailSession::connect(connect_client(&relay), &constraint, &trusted, t1_config())
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::ExchangingMail);
}

#[tokio::test]
async fn replayed_mail_is_not_processed() {
    let node = tapped_node();
    let relay = Relay::new(RelayConfig::default(), node.clone());
    let handle = relay.handle();

    let transport = connect_client(&relay);
    let (read, mut write) = tokio::io::split(transport);
    let mut reader = FrameReader::new(read);
    let mut codec = FrameCodec::new();

    let record = AttestationRecord::deserialize(&reader.read_frame().await.unwrap()).unwrap();
    let client = KeyPair::generate();
    let mail = |seq: u64, body: &'static str| {
        OutboundMail::create(body, "T1", seq, *record.public_key(), &client)
            .encrypt()
            .unwrap()
            .into_bytes()
    };

    let first = mail(5, "BUY:500000");
    write_frame(&mut write, &mut codec, first.clone()).await.unwrap();
    write_frame(&mut write, &mut codec, mail(3, "BUY:300000"))
        .await
        .unwrap();
    write_frame(&mut write, &mut codec, first).await.unwrap();
    handle.wait_for_deliveries(3).await.unwrap();

    assert_eq!(node.inner.ticket_count().await, 1);
    // Exactly one reply came back.
    reader.read_frame().await.unwrap();
    let declared = handle.invoke_command(DECLARE_COMMAND).await.unwrap();
    assert_eq!(&declared[..], b"500000");
}
