use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use enclave_mail::session::retry::RetryPolicy;
use enclave_mail::{Constraint, MailSession, SessionConfig, TrustedAuthorities};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lottery-client", about = "Buy lottery numbers from an attested node")]
struct Args {
    /// Relay address
    #[arg(long, env = "RELAY_ADDR", default_value = "127.0.0.1:9999")]
    addr: SocketAddr,

    /// Attestation constraint, e.g. "S:<64 hex> PROD:1 SEC:INSECURE"
    #[arg(long, env = "MAIL_CONSTRAINT")]
    constraint: Constraint,

    /// Number of lottery numbers to buy
    #[arg(long, default_value_t = 5)]
    mails: u32,

    /// Mail topic (random when omitted)
    #[arg(long)]
    topic: Option<String>,

    /// Connection attempts after the first
    #[arg(long, default_value_t = 5)]
    retries: u32,

    /// Per-attempt connect timeout in seconds
    #[arg(long, default_value_t = 5)]
    connect_timeout: u64,

    /// Trusted attestation authority key (64 hex digits, repeatable)
    #[arg(long = "authority")]
    authorities: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut verifier = TrustedAuthorities::new();
    for hex_key in &args.authorities {
        let key: [u8; 32] = hex::decode(hex_key)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .with_context(|| format!("authority key {hex_key} is not 32 hex-encoded bytes"))?;
        verifier = verifier.with_authority(key);
    }
    if args.constraint.allows_insecure() {
        eprintln!("WARNING: constraint accepts INSECURE nodes; mail privacy is not guaranteed.");
    }

    let policy = RetryPolicy {
        max_retries: args.retries,
        ..RetryPolicy::default()
    };
    let mut builder = SessionConfig::builder().retry_policy(policy);
    if let Some(topic) = args.topic {
        builder = builder.topic(topic);
    }
    let config = builder.build()?;

    println!("Attempting to connect to {}", args.addr);
    let mut session = MailSession::connect_tcp(
        args.addr,
        Duration::from_secs(args.connect_timeout),
        &args.constraint,
        &verifier,
        config,
    )
    .await?;
    if let Some(record) = session.attestation() {
        println!("Connected to {record}");
    }

    for i in 0..args.mails {
        let body = format!("BUY:12345{}", i % 10);
        let sequence = session.send(body.clone()).await?;
        println!("Sent {body} (sequence {sequence})");
    }

    for _ in 0..args.mails {
        match session.recv().await {
            Ok(reply) => println!(
                "Enclave replied [{}]: {}",
                reply.sequence,
                String::from_utf8_lossy(&reply.body)
            ),
            Err(e) if e.is_per_message() => eprintln!("Discarded reply: {e}"),
            Err(e) => return Err(e.into()),
        }
    }

    let declaration = session.await_declaration().await?;
    println!(
        "Lottery result: {}",
        String::from_utf8_lossy(&declaration.body)
    );

    session.close().await?;
    Ok(())
}
