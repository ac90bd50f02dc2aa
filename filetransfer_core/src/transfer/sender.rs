use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::sync::mpsc;

use super::TransferReport;
use super::protocol::{TransferHeader, send_framed};
use super::tls::{self, TrustPolicy};
use crate::TransferEvent;
use crate::config::TransferConfig;
use crate::discovery;
use crate::error::{Result, TransferError};
use crate::state::{SessionState, TransferState};
use crate::verification::{PhraseConfirmer, verify_session};

/// Where the sender gets the receiver's address from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSource {
    /// Browse the LAN with mDNS.
    Browse,
    /// Connect straight to a known address.
    Direct(SocketAddr),
}

/// Send one file to a receiver.
///
/// The file is opened and its name framed before any network I/O, so a
/// missing file or an over-long name never reaches the wire.
pub async fn send_file(
    config: &TransferConfig,
    file_path: &Path,
    peer: PeerSource,
    trust: TrustPolicy,
    confirmer: Arc<dyn PhraseConfirmer>,
    event_tx: mpsc::Sender<TransferEvent>,
) -> Result<TransferReport> {
    let mut session = SessionState::new(event_tx.clone());

    let prepared = prepare(file_path).await;
    let (header, mut file, total) = match prepared {
        Ok(p) => p,
        Err(e) => {
            session.fail(&e).await;
            return Err(e);
        }
    };
    let file_name = header.display_name().into_owned();

    let addr = session
        .step(TransferState::Discovering, async {
            match peer {
                PeerSource::Browse => {
                    let _ = event_tx
                        .send(TransferEvent::Status(
                            "Looking for a receiver on the LAN, start the program on the receiving side"
                                .to_string(),
                        ))
                        .await;
                    Ok(discovery::browse(config).await?.socket_addr())
                }
                PeerSource::Direct(addr) => Ok::<_, TransferError>(addr),
            }
        })
        .await?;
    let _ = event_tx.send(TransferEvent::PeerFound { addr }).await;

    let secure = session
        .step(TransferState::ChannelEstablishing, tls::connect(addr, &trust))
        .await?;

    let mut verified = session
        .step(
            TransferState::AwaitingVerification,
            verify_session(secure, confirmer, &event_tx),
        )
        .await?;
    session.advance(TransferState::Verified).await?;

    let _ = event_tx
        .send(TransferEvent::TransferStarted {
            file_name: file_name.clone(),
            total_bytes: Some(total),
            is_sending: true,
        })
        .await;
    tracing::info!("Sending {} ({} bytes) to {}", file_name, total, addr);

    let stats = session
        .step(
            TransferState::Transferring,
            send_framed(&mut verified, &header, &mut file, total, &event_tx),
        )
        .await?;

    session.advance(TransferState::Complete).await?;
    let _ = event_tx
        .send(TransferEvent::TransferCompleted {
            file_name: file_name.clone(),
            path: file_path.to_path_buf(),
            bytes: stats.bytes,
            digest: stats.digest.clone(),
            is_sending: true,
        })
        .await;
    tracing::info!("Sent {} ({} bytes)", file_name, stats.bytes);

    Ok(TransferReport {
        file_name,
        path: file_path.to_path_buf(),
        bytes: stats.bytes,
        digest: stats.digest,
        peer: addr,
    })
}

async fn prepare(file_path: &Path) -> Result<(TransferHeader, File, u64)> {
    let metadata = match tokio::fs::metadata(file_path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TransferError::Config(format!(
                "{} doesn't exist",
                file_path.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };
    if metadata.is_dir() {
        return Err(TransferError::Config(format!(
            "{} is a folder, sending folders is not supported",
            file_path.display()
        )));
    }

    let header = TransferHeader::for_path(file_path)?;
    let file = File::open(file_path).await?;
    Ok((header, file, metadata.len()))
}
