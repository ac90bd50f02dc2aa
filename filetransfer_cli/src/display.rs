use console::style;
use filetransfer_core::{TransferEvent, TransferState};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

fn open_ended_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} {bytes} ({bytes_per_sec}) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn step(label: &str, text: impl std::fmt::Display) {
    eprintln!("{} {}", style(label).bold().dim(), text);
}

/// Render core events on stderr until the core drops its sender.
pub async fn render(mut rx: mpsc::Receiver<TransferEvent>) {
    let mut bar: Option<ProgressBar> = None;

    while let Some(event) = rx.recv().await {
        match event {
            TransferEvent::Status(msg) => step("[*]", msg),
            TransferEvent::StateChanged(state) => {
                tracing::debug!("State: {:?}", state);
                match state {
                    TransferState::AwaitingVerification => {
                        step("[2/4]", "Secure channel established")
                    }
                    TransferState::Failed => {
                        if let Some(bar) = bar.take() {
                            bar.abandon();
                        }
                    }
                    _ => {}
                }
            }
            TransferEvent::Listening { addr } => step("[1/4]", format!("Listening on {}", addr)),
            TransferEvent::PeerFound { addr } => {
                step("[1/4]", format!("Receiver found at {}", style(addr).cyan()))
            }
            // printed by the prompt so it sits right above the question
            TransferEvent::ShowPhrase { .. } => {}
            TransferEvent::TransferStarted {
                file_name,
                total_bytes,
                is_sending,
            } => {
                let verb = if is_sending { "Sending" } else { "Receiving" };
                step("[3/4]", format!("{} {}", verb, style(&file_name).yellow()));
                let pb = match total_bytes {
                    Some(total) => {
                        let pb = ProgressBar::new(total);
                        pb.set_style(bar_style());
                        pb
                    }
                    None => {
                        let pb = ProgressBar::new_spinner();
                        pb.set_style(open_ended_style());
                        pb
                    }
                };
                pb.set_message(file_name);
                bar = Some(pb);
            }
            TransferEvent::TransferProgress { bytes_done, .. } => {
                if let Some(bar) = &bar {
                    bar.set_position(bytes_done);
                }
            }
            TransferEvent::TransferCompleted {
                file_name,
                path,
                bytes,
                digest,
                is_sending,
            } => {
                if let Some(bar) = bar.take() {
                    bar.finish_and_clear();
                }
                let verb = if is_sending { "Sent" } else { "Received" };
                eprintln!(
                    "{} {} {} ({}) {}",
                    style("[✔]").bold().green(),
                    verb,
                    style(&file_name).yellow(),
                    HumanBytes(bytes),
                    style(path.display()).dim()
                );
                step("    ", format!("blake3 {}", digest));
            }
            // the caller reports the final error
            TransferEvent::Error(msg) => tracing::debug!("Session error: {}", msg),
        }
    }
}
