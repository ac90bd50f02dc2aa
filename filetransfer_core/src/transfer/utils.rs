use crate::TransferEvent;
use crate::config::FileNamePolicy;
use crate::error::FramingError;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use tokio::fs::{File, OpenOptions};
use tokio::sync::mpsc;

use super::protocol::TransferHeader;

/// Resolve where the received file goes under `dest_dir`.
///
/// With `RejectUnsafe`, names that are empty, `.`/`..`, contain a path
/// separator or are absolute are refused. `Preserve` joins the name as is.
pub fn resolve_destination(
    dest_dir: &Path,
    header: &TransferHeader,
    policy: FileNamePolicy,
) -> Result<PathBuf, FramingError> {
    let component = header.to_path_component();
    let unsafe_name = is_unsafe_name(header.name_bytes(), &component);

    match policy {
        FileNamePolicy::RejectUnsafe if unsafe_name => Err(FramingError::UnsafeName(
            header.display_name().into_owned(),
        )),
        FileNamePolicy::Preserve if unsafe_name => {
            tracing::warn!(
                "Joining unsafe file name {:?} to {:?} as configured",
                header.display_name(),
                dest_dir
            );
            Ok(dest_dir.join(component))
        }
        _ => Ok(dest_dir.join(component)),
    }
}

fn is_unsafe_name(raw: &[u8], component: &Path) -> bool {
    if raw.is_empty() || raw.contains(&b'/') || raw.contains(&b'\\') {
        return true;
    }
    let mut components = component.components();
    !matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Create (or truncate) a file readable only by its owner
pub async fn open_secure_file(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    options.open(path).await
}

/// Format transfer speed from bytes and elapsed time
pub fn format_transfer_speed(bytes_transferred: u64, elapsed_secs: f64) -> String {
    if elapsed_secs <= 0.0 {
        return "Starting...".to_string();
    }

    let speed_bps = bytes_transferred as f64 / elapsed_secs;
    if speed_bps > 1_000_000.0 {
        format!("{:.2} MB/s", speed_bps / 1_000_000.0)
    } else if speed_bps > 1_000.0 {
        format!("{:.1} KB/s", speed_bps / 1_000.0)
    } else {
        format!("{:.0} B/s", speed_bps)
    }
}

/// Report transfer progress to the event channel
pub async fn report_progress(
    event_tx: &mpsc::Sender<TransferEvent>,
    file_name: &str,
    bytes_done: u64,
    total_bytes: Option<u64>,
    start_time: Instant,
    is_sending: bool,
) {
    let elapsed = start_time.elapsed().as_secs_f64();
    let speed_bps = if elapsed > 0.0 {
        bytes_done as f64 / elapsed
    } else {
        0.0
    };
    let speed = format_transfer_speed(bytes_done, elapsed);

    let _ = event_tx
        .send(TransferEvent::TransferProgress {
            file_name: file_name.to_string(),
            bytes_done,
            total_bytes,
            speed,
            speed_bps,
            is_sending,
        })
        .await;
}
