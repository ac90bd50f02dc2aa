use anyhow::Context;
use clap::{Parser, ValueEnum};
use console::style;
use filetransfer_core::{
    FileNamePolicy, PeerSource, TransferConfig, TransferError, TrustPolicy, receive_file,
    send_file,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod display;
mod prompt;

#[derive(Parser, Debug)]
#[command(name = "filetransfer")]
#[command(about = "Send a single file to another machine on the same LAN", long_about = None)]
#[command(version)]
struct Opts {
    /// What to do
    #[arg(value_enum)]
    mode: Mode,

    /// File to send, or the directory to receive into
    path: PathBuf,

    /// Port the receiver listens on
    #[arg(short, long, env = "FILETRANSFER_PORT")]
    port: Option<u16>,

    /// mDNS service type, e.g. _filetransfer._tcp
    #[arg(long, env = "FILETRANSFER_SERVICE_TYPE")]
    service_type: Option<String>,

    /// Seconds the sender searches for a receiver
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Write the received file under the name the sender chose, even if it
    /// points outside the destination directory
    #[arg(long)]
    allow_unsafe_names: bool,

    /// Read settings from this JSON file instead of the default location
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Send,
    #[value(alias = "rcv")]
    Receive,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(opts: &Opts) -> anyhow::Result<TransferConfig> {
    let mut config = match &opts.config {
        Some(path) => TransferConfig::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => TransferConfig::load().context("failed to load configuration")?,
    };

    if let Some(port) = opts.port {
        config.port = port;
    }
    if let Some(service_type) = &opts.service_type {
        config.service_type = service_type.clone();
    }
    if let Some(timeout) = opts.timeout {
        config.browse_timeout_secs = timeout;
    }
    if opts.allow_unsafe_names {
        config.file_name_policy = FileNamePolicy::Preserve;
    }

    config.validate()?;
    Ok(config)
}

async fn run(opts: Opts) -> anyhow::Result<()> {
    let config = load_config(&opts)?;
    tracing::debug!("Using {:?}", config);

    let (tx_event, rx_event) = mpsc::channel(1000);
    let display = tokio::spawn(display::render(rx_event));
    let confirmer = Arc::new(prompt::TerminalConfirmer);

    let result = match opts.mode {
        Mode::Send => {
            send_file(
                &config,
                &opts.path,
                PeerSource::Browse,
                TrustPolicy::OutOfBandVerified,
                confirmer,
                tx_event,
            )
            .await
        }
        Mode::Receive => receive_file(&config, &opts.path, confirmer, tx_event).await,
    };

    display.await.context("display task failed")?;
    let report = result?;
    tracing::debug!("Transfer report: {:?}", report);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // .env is optional
    let _ = dotenvy::dotenv();
    let opts = Opts::parse();
    init_tracing(opts.verbose);

    match run(opts).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", style("[✘]").bold().red(), e);
            let code = e
                .downcast_ref::<TransferError>()
                .map(TransferError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rcv_is_an_alias_for_receive() {
        let opts = Opts::try_parse_from(["filetransfer", "rcv", "/tmp"]).unwrap();
        assert_eq!(opts.mode, Mode::Receive);
        let opts = Opts::try_parse_from(["filetransfer", "send", "a.txt"]).unwrap();
        assert_eq!(opts.mode, Mode::Send);
    }

    #[test]
    fn test_unsupported_mode_names_the_supported_ones() {
        let err = Opts::try_parse_from(["filetransfer", "upload", "a.txt"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("send"), "{msg}");
        assert!(msg.contains("receive"), "{msg}");
    }

    #[test]
    fn test_flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"port": 4000, "browse_timeout_secs": 3}"#).unwrap();

        let opts = Opts::try_parse_from([
            "filetransfer",
            "receive",
            "/tmp",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "5000",
            "--allow-unsafe-names",
        ])
        .unwrap();
        let config = load_config(&opts).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.browse_timeout_secs, 3);
        assert_eq!(config.file_name_policy, FileNamePolicy::Preserve);
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let opts =
            Opts::try_parse_from(["filetransfer", "send", "a.txt", "--timeout", "0"]).unwrap();
        let err = load_config(&opts).unwrap_err();
        let err = err.downcast_ref::<TransferError>().unwrap();
        assert_eq!(err.exit_code(), 2);
    }
}
