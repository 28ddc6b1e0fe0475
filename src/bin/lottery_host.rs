use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use enclave_mail::attestation::signer::AttestationSigner;
use enclave_mail::node::lottery::{self, DECLARE_COMMAND};
use enclave_mail::transport::tcp;
use enclave_mail::{LotteryNode, Measurement, Relay, RelayConfig, SecurityMode};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lottery-host", about = "Untrusted host relay for the lottery node")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "RELAY_ADDR", default_value = "127.0.0.1:9999")]
    listen: SocketAddr,

    /// Declare the draw after this many mails have been delivered
    #[arg(long, default_value_t = 5)]
    mails: u64,

    /// Product id to attest
    #[arg(long, default_value_t = 1)]
    product_id: u16,

    /// Security mode to attest (SIMULATION or INSECURE without hardware)
    #[arg(long, default_value = "SIMULATION")]
    security_mode: SecurityMode,

    /// Measurement to attest, as 64 hex digits
    #[arg(long)]
    measurement: Option<Measurement>,

    /// Maximum concurrent clients (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_connections: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.security_mode.requires_trusted_authority() {
        anyhow::bail!(
            "{} needs a hardware attestation authority; use SIMULATION or INSECURE",
            args.security_mode
        );
    }

    let measurement = args.measurement.unwrap_or_else(lottery::default_measurement);
    let node = Arc::new(LotteryNode::new(
        &AttestationSigner::generate(),
        measurement,
        args.product_id,
        args.security_mode,
    ));
    println!("[Host] Attestation: {}", node.attestation());
    println!(
        "[Host] Client constraint: S:{measurement} PROD:{} SEC:{}",
        args.product_id, args.security_mode
    );

    let config = RelayConfig {
        listen_addr: args.listen,
        max_connections: args.max_connections,
        ..RelayConfig::default()
    };
    let listener = tcp::listen(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    let relay = Relay::new(config, node);
    let handle = relay.handle();
    let server = tokio::spawn(relay.run(listener));

    handle.wait_for_deliveries(args.mails).await?;
    let result = handle.invoke_command(DECLARE_COMMAND).await?;
    println!(
        "[Host] Declaring Lottery!: {}",
        String::from_utf8_lossy(&result)
    );

    tokio::select! {
        res = server => {
            res.context("relay task panicked")??;
        }
        _ = tokio::signal::ctrl_c() => {
            println!("[Host] Shutting down");
        }
    }
    Ok(())
}
