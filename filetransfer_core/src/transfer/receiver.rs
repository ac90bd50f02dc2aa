use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::TransferReport;
use super::protocol::{receive_body, receive_header};
use super::tls::SecureListener;
use super::utils::{open_secure_file, resolve_destination};
use crate::TransferEvent;
use crate::config::TransferConfig;
use crate::discovery;
use crate::error::{FramingError, Result, TransferError};
use crate::identity::SessionIdentity;
use crate::state::{SessionState, TransferState};
use crate::verification::{PhraseConfirmer, verify_session};

/// Whether the receiver announces itself over mDNS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Advertise {
    #[default]
    Mdns,
    /// Listen only; the sender has to be given the address directly.
    Disabled,
}

/// Background advertisement plus the signal that ends it.
struct AdvertiserTask {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl AdvertiserTask {
    fn start(config: &TransferConfig, port: u16) -> Result<Self> {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = discovery::start_advertising(config, port, stop_rx)?;
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Signal the task and wait until the record is withdrawn. Deregistration
    /// is best-effort: failures are logged, never returned.
    async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Failed to stop advertising: {}", e),
                Err(e) => tracing::warn!("Advertisement task failed: {}", e),
            }
        }
    }
}

impl Drop for AdvertiserTask {
    fn drop(&mut self) {
        // the task unregisters on its own once signalled
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

/// A bound receiver waiting for its single sender.
pub struct Receiver {
    config: TransferConfig,
    listener: SecureListener,
    dest_dir: PathBuf,
}

impl Receiver {
    /// Check the destination, create a fresh identity and bind the listener
    /// on `bind_ip` and the configured port.
    pub async fn bind(
        config: TransferConfig,
        dest_dir: impl Into<PathBuf>,
        bind_ip: IpAddr,
    ) -> Result<Self> {
        let dest_dir = dest_dir.into();
        check_destination(&dest_dir).await?;

        let identity = SessionIdentity::generate()?;
        let listener = SecureListener::bind(SocketAddr::new(bind_ip, config.port), &identity).await?;

        Ok(Self {
            config,
            listener,
            dest_dir,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve exactly one transfer. The advertisement, if any, is withdrawn as
    /// soon as a connection arrives or the session fails.
    pub async fn run(
        self,
        advertise: Advertise,
        confirmer: Arc<dyn PhraseConfirmer>,
        event_tx: mpsc::Sender<TransferEvent>,
    ) -> Result<TransferReport> {
        let Receiver {
            config,
            listener,
            dest_dir,
        } = self;
        let mut session = SessionState::new(event_tx.clone());

        let local_addr = listener.local_addr()?;
        let _ = event_tx
            .send(TransferEvent::Listening { addr: local_addr })
            .await;

        let advertiser = session
            .step(TransferState::Discovering, async {
                match advertise {
                    Advertise::Mdns => AdvertiserTask::start(&config, local_addr.port()).map(Some),
                    Advertise::Disabled => Ok(None),
                }
            })
            .await?;
        let _ = event_tx
            .send(TransferEvent::Status(
                "Waiting for the sender to connect".to_string(),
            ))
            .await;

        let accepted = session
            .step(TransferState::ChannelEstablishing, listener.accept_one())
            .await;
        if let Some(advertiser) = advertiser {
            advertiser.stop().await;
        }
        let secure = accepted?;
        let peer = secure.peer_addr();

        let mut verified = session
            .step(
                TransferState::AwaitingVerification,
                verify_session(secure, confirmer, &event_tx),
            )
            .await?;
        session.advance(TransferState::Verified).await?;

        let (file_name, path, stats) = session
            .step(TransferState::Transferring, async {
                let header = receive_header(&mut verified).await?;
                let file_name = header.display_name().into_owned();
                let path = resolve_destination(&dest_dir, &header, config.file_name_policy)?;

                let mut file = open_secure_file(&path)
                    .await
                    .map_err(|source| FramingError::FileCreate {
                        path: path.clone(),
                        source,
                    })?;
                tracing::info!("Receiving {} from {} into {:?}", file_name, peer, path);
                let _ = event_tx
                    .send(TransferEvent::TransferStarted {
                        file_name: file_name.clone(),
                        total_bytes: None,
                        is_sending: false,
                    })
                    .await;

                let stats = receive_body(&mut verified, &mut file, &file_name, &event_tx).await?;
                file.sync_all().await?;
                Ok::<_, TransferError>((file_name, path, stats))
            })
            .await?;

        let mut stream = verified.into_inner();
        if let Err(e) = stream.shutdown().await {
            tracing::debug!("TLS shutdown after transfer failed: {}", e);
        }

        session.advance(TransferState::Complete).await?;
        let _ = event_tx
            .send(TransferEvent::TransferCompleted {
                file_name: file_name.clone(),
                path: path.clone(),
                bytes: stats.bytes,
                digest: stats.digest.clone(),
                is_sending: false,
            })
            .await;
        tracing::info!("Received {} ({} bytes)", file_name, stats.bytes);

        Ok(TransferReport {
            file_name,
            path,
            bytes: stats.bytes,
            digest: stats.digest,
            peer,
        })
    }
}

async fn check_destination(dest_dir: &Path) -> Result<()> {
    match tokio::fs::metadata(dest_dir).await {
        Ok(m) if m.is_dir() => Ok(()),
        Ok(_) => Err(TransferError::Config(format!(
            "{} is not a directory",
            dest_dir.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(TransferError::Config(
            format!("{} doesn't exist", dest_dir.display()),
        )),
        Err(e) => Err(e.into()),
    }
}

/// Receive one file into `dest_dir`, advertising over mDNS on all interfaces.
pub async fn receive_file(
    config: &TransferConfig,
    dest_dir: &Path,
    confirmer: Arc<dyn PhraseConfirmer>,
    event_tx: mpsc::Sender<TransferEvent>,
) -> Result<TransferReport> {
    let receiver = match Receiver::bind(
        config.clone(),
        dest_dir,
        IpAddr::from(std::net::Ipv4Addr::UNSPECIFIED),
    )
    .await
    {
        Ok(receiver) => receiver,
        Err(e) => {
            SessionState::new(event_tx).fail(&e).await;
            return Err(e);
        }
    };
    receiver.run(Advertise::Mdns, confirmer, event_tx).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_rejects_missing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = Receiver::bind(TransferConfig::default(), &missing, IpAddr::from([127, 0, 0, 1]))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransferError::Config(_)));
    }

    #[tokio::test]
    async fn test_bind_rejects_file_destination() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();
        let err = Receiver::bind(TransferConfig::default(), &file, IpAddr::from([127, 0, 0, 1]))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransferError::Config(_)));
    }

    #[tokio::test]
    async fn test_receive_file_reports_failed_when_bind_fails() {
        struct Never;
        impl PhraseConfirmer for Never {
            fn confirm(
                &self,
                _phrase: &crate::verification::VerificationPhrase,
            ) -> std::io::Result<bool> {
                Ok(false)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let err = receive_file(
            &TransferConfig::default(),
            &dir.path().join("missing"),
            Arc::new(Never),
            tx,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::Config(_)));

        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        assert!(matches!(
            events.as_slice(),
            [
                TransferEvent::StateChanged(TransferState::Failed),
                TransferEvent::Error(_)
            ]
        ));
    }

    #[tokio::test]
    async fn test_bind_port_zero_picks_free_port() {
        let dir = tempfile::tempdir().unwrap();
        let config = TransferConfig {
            port: 0,
            ..Default::default()
        };
        let receiver = Receiver::bind(config, dir.path(), IpAddr::from([127, 0, 0, 1]))
            .await
            .unwrap();
        assert_ne!(receiver.local_addr().unwrap().port(), 0);
    }
}
