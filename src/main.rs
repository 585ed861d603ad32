//! enclave-mail CLI
//!
//! Key generation, attestation constraint checks, loopback self-test and
//! envelope inspection.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use enclave_mail::channel::inspect_envelope;
use enclave_mail::{
    AttestationReport, ChannelConfig, ChannelOptions, CipherSuite, ConstraintExpression,
    EnclaveMailError, KeyPair, MemoryStream, SecureChannel,
};

const DEFAULT_PROTOCOL: &str = "Noise_XX_25519_ChaChaPoly_BLAKE2s";

/// enclave-mail - attested Noise channels
#[derive(Parser, Debug)]
#[command(name = "enclave-mail")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a fresh X25519 key pair
    Keygen,

    /// Evaluate an attestation report against a constraint
    Check {
        /// Constraint expression, e.g. "code-hash:<hex> security-mode:secure"
        #[arg(short, long)]
        constraint: String,

        /// Attestation report as JSON
        #[arg(short, long)]
        report: PathBuf,
    },

    /// Run a loopback handshake and ping/pong
    SelfTest {
        /// Channel configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Noise protocol name (ignored when --config is given)
        #[arg(short, long, default_value = DEFAULT_PROTOCOL)]
        protocol: String,
    },

    /// Print the unauthenticated header of a hex-encoded envelope
    Inspect {
        envelope: String,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<EnclaveMailError>() {
            Some(error) => {
                eprintln!("Error: {}", error.user_message());
                ExitCode::from(error.exit_code() as u8)
            }
            None => {
                eprintln!("Error: {:#}", e);
                ExitCode::from(255)
            }
        },
    }
}

fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Keygen => {
            let keypair = KeyPair::generate();
            println!("PrivateKey = {}", BASE64.encode(keypair.private_key()));
            println!("PublicKey = {}", BASE64.encode(keypair.public_key()));
            Ok(())
        }
        Command::Check { constraint, report } => check(&constraint, &report),
        Command::SelfTest { config, protocol } => self_test(config, &protocol),
        Command::Inspect { envelope } => inspect(&envelope),
    }
}

fn check(constraint: &str, report_path: &Path) -> anyhow::Result<()> {
    let constraint = ConstraintExpression::parse(constraint).map_err(EnclaveMailError::from)?;
    let json = std::fs::read_to_string(report_path)
        .with_context(|| format!("Failed to read report {}", report_path.display()))?;
    let report = AttestationReport::from_json(&json).map_err(EnclaveMailError::from)?;

    tracing::info!("Evaluating {}", constraint);
    let trusted = constraint
        .evaluate(&report)
        .map_err(EnclaveMailError::from)?;

    println!("Trusted key: {}", BASE64.encode(trusted.as_bytes()));
    Ok(())
}

fn self_test(config: Option<PathBuf>, protocol: &str) -> anyhow::Result<()> {
    let client_options = match config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let config = ChannelConfig::from_file(&path).map_err(EnclaveMailError::from)?;
            ChannelOptions::from_config(&config)
        }
        None => {
            let suite: CipherSuite = protocol.parse().map_err(EnclaveMailError::from)?;
            ChannelOptions::new(suite)
        }
    };
    let (client_options, server_options) = loopback_options(client_options);
    let suite = client_options.suite;
    tracing::info!("Self-test with {}", suite);

    let (client_stream, server_stream) = MemoryStream::pair();
    let one_way = suite.pattern.is_one_way();

    let server = thread::spawn(move || -> enclave_mail::Result<Vec<u8>> {
        let mut channel = SecureChannel::accept(server_stream, server_options)?;
        let ping = channel.receive()?;
        if !one_way {
            channel.send(b"pong")?;
        }
        Ok(ping)
    });

    let mut client = SecureChannel::connect(client_stream, client_options)?;
    client.send(b"ping")?;
    if !one_way {
        let pong = client.receive()?;
        anyhow::ensure!(pong == b"pong", "Unexpected reply: {:02x?}", pong);
    }

    let ping = server
        .join()
        .map_err(|_| anyhow::anyhow!("Responder thread panicked"))??;
    anyhow::ensure!(ping == b"ping", "Unexpected message: {:02x?}", ping);

    println!("Self-test passed: {}", suite);
    println!("Handshake hash: {}", hex::encode(client.handshake_hash()));
    Ok(())
}

/// Give each side of the loopback the keys its pattern needs
///
/// Each side trusts exactly the static key the other side uses.
fn loopback_options(mut client: ChannelOptions) -> (ChannelOptions, ChannelOptions) {
    let pattern = client.suite.pattern;
    let mut server = client.clone();
    server.local_static = None;
    server.trusted_remote_key = None;
    client.trusted_remote_key = None;

    if pattern.initiator_needs_static() {
        let keypair = client.local_static.take().unwrap_or_else(KeyPair::generate);
        server.trusted_remote_key = Some(*keypair.public_key());
        client.local_static = Some(keypair);
    } else {
        client.local_static = None;
    }

    if pattern.responder_needs_static() {
        let keypair = KeyPair::generate();
        client.trusted_remote_key = Some(*keypair.public_key());
        server.local_static = Some(keypair);
    }

    (client, server)
}

fn inspect(envelope: &str) -> anyhow::Result<()> {
    let bytes = hex::decode(envelope.trim()).context("Envelope is not valid hex")?;
    let envelope = inspect_envelope(&bytes).map_err(EnclaveMailError::from)?;

    println!("Version:  {}", envelope.version());
    println!("Topic:    {}", envelope.topic);
    println!("Sequence: {}", envelope.sequence);
    if !envelope.envelope.is_empty() {
        println!("Envelope: {}", hex::encode(&envelope.envelope));
    }
    println!("Payload:  {} bytes", envelope.payload.len());
    Ok(())
}
