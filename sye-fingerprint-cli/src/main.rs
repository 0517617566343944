//! `sye-fingerprint`: drives the fingerprint kit from a terminal.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use eyre::{eyre, Result, WrapErr};
use serde_json::{json, Value};
use sye_fingerprint_core::{
    config, digest_json, Callbacks, DeviceFingerprint, FingerprintOptions, IdentityStore,
    SignalCollector,
};

/// Device fingerprint developer tool
#[derive(Parser)]
#[command(name = "sye-fingerprint")]
#[command(version, about = "Inspect and submit SYE device fingerprints", long_about = None)]
struct Cli {
    /// Directory holding the persistent device identifier
    #[arg(long, global = true, env = "SYE_FINGERPRINT_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect the signals of this host and print them with their digests
    Signals {
        /// Include the hard tier
        #[arg(long)]
        hard: bool,
    },

    /// Print the persistent device identifier, creating it when missing
    DeviceId,

    /// Run a full fingerprint submission and print the result envelope
    Submit {
        /// Fingerprint API endpoint
        #[arg(long, env = "FP_API_URL")]
        endpoint: Option<String>,

        /// Transaction token sent as `X-Transaction`
        #[arg(long, env = "SYE_TRANSACTION_TOKEN", hide_env_values = true)]
        transaction_token: String,

        /// Access token sent as a bearer credential
        #[arg(long, env = "SYE_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,

        /// Flow options as JSON, or `@path` to read them from a file
        #[arg(long, default_value = r#"{"deviceId": true, "fpSoft": true}"#)]
        options: String,

        /// Pretty-print the envelope
        #[arg(long)]
        pretty: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    match run(Cli::parse(), dirs::data_local_dir).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// `data_dir` locates the platform data directory; it is only consulted by
/// commands that touch storage and only when `--storage-dir` is absent.
async fn run(cli: Cli, data_dir: impl FnOnce() -> Option<PathBuf>) -> Result<()> {
    let resolve_storage_dir = || storage_dir(cli.storage_dir, data_dir);

    match cli.command {
        Commands::Signals { hard } => {
            let report = collect_report(&SignalCollector::native(), hard).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::DeviceId => {
            let identity = open_identity(&resolve_storage_dir()?)?;
            println!("{}", identity.get_or_create_device_id());
        }
        Commands::Submit {
            endpoint,
            transaction_token,
            access_token,
            options,
            pretty,
        } => {
            let options = parse_options(&options)?;
            let mut builder = DeviceFingerprint::builder()
                .ignore_environment()
                .identity(open_identity(&resolve_storage_dir()?)?);
            if let Some(endpoint) = submit_endpoint(endpoint, |name| std::env::var(name).ok()) {
                builder = builder.endpoint(endpoint);
            }
            let widget = builder.build();
            tracing::info!(endpoint = ?widget.endpoint(), "submitting fingerprint");

            let outcome = widget
                .init(
                    &transaction_token,
                    &access_token,
                    &options,
                    &Callbacks::default(),
                )
                .await;
            if let Some(envelope) = widget.last_result() {
                let rendered = if pretty {
                    serde_json::to_string_pretty(&envelope)?
                } else {
                    envelope.to_json()?
                };
                println!("{rendered}");
            }
            outcome.wrap_err("fingerprint flow failed")?;
        }
    }

    Ok(())
}

fn storage_dir(
    explicit: Option<PathBuf>,
    data_dir: impl FnOnce() -> Option<PathBuf>,
) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir),
        None => data_dir()
            .map(|dir| dir.join("sye-fingerprint"))
            .ok_or_else(|| eyre!("no local data directory; pass --storage-dir")),
    }
}

/// `--endpoint` (or `FP_API_URL` through clap), then the library's
/// environment variables in order.
fn submit_endpoint(
    explicit: Option<String>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    explicit
        .filter(|endpoint| !endpoint.trim().is_empty())
        .or_else(|| config::endpoint_from_lookup(lookup))
}

fn open_identity(dir: &Path) -> Result<IdentityStore> {
    std::fs::create_dir_all(dir)
        .wrap_err_with(|| format!("failed to create {}", dir.display()))?;
    Ok(IdentityStore::on_disk(dir))
}

/// Accepts inline JSON or `@path`.
fn parse_options(raw: &str) -> Result<FingerprintOptions> {
    let json = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read options from {path}"))?,
        None => raw.to_string(),
    };
    FingerprintOptions::from_json(&json).wrap_err("invalid options")
}

async fn collect_report(collector: &SignalCollector, hard: bool) -> Result<Value> {
    let soft = serde_json::to_value(collector.collect_soft())?;
    let mut report = json!({
        "fpSoft": digest_json(&soft),
        "soft": soft,
    });
    if hard {
        let hard = serde_json::to_value(collector.collect_hard().await)?;
        report["fpHard"] = json!(digest_json(&hard));
        report["hard"] = hard;
    }
    Ok(report)
}
