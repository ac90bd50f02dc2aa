use filetransfer_core::transfer::protocol::{TransferHeader, write_header};
use filetransfer_core::transfer::{self, SecureSession};
use filetransfer_core::{
    Advertise, FileNamePolicy, FramingError, PhraseConfirmer, Receiver, TransferConfig,
    TransferError, TransferEvent, TransferReport, TrustPolicy, VerificationPhrase,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct AlwaysYes;

impl PhraseConfirmer for AlwaysYes {
    fn confirm(&self, _phrase: &VerificationPhrase) -> std::io::Result<bool> {
        Ok(true)
    }
}

// Receiver on loopback that confirms every phrase
async fn spawn_receiver(
    dest: &Path,
    policy: FileNamePolicy,
) -> anyhow::Result<(SocketAddr, JoinHandle<filetransfer_core::Result<TransferReport>>)> {
    let config = TransferConfig {
        port: 0,
        file_name_policy: policy,
        ..Default::default()
    };
    let receiver = Receiver::bind(config, dest, IpAddr::V4(Ipv4Addr::LOCALHOST)).await?;
    let addr = receiver.local_addr()?;

    let (tx, mut rx) = mpsc::channel::<TransferEvent>(256);
    tokio::spawn(async move { while rx.recv().await.is_some() {} });
    let handle = tokio::spawn(receiver.run(Advertise::Disabled, Arc::new(AlwaysYes), tx));
    Ok((addr, handle))
}

// A hand-rolled sender that writes whatever it is given
async fn raw_sender(addr: SocketAddr) -> SecureSession {
    transfer::connect(addr, &TrustPolicy::OutOfBandVerified)
        .await
        .unwrap()
}

async fn send_raw(addr: SocketAddr, name: &str, body: &[u8]) {
    let mut session = raw_sender(addr).await;
    let header = TransferHeader::new(name).unwrap();
    write_header(&mut session, &header).await.unwrap();
    // the receiver may hang up as soon as it has seen the header
    let _ = session.write_all(body).await;
    let _ = session.shutdown().await;
}

#[tokio::test]
async fn test_traversal_name_rejected_by_default() {
    let root = tempfile::tempdir().unwrap();
    let dest = root.path().join("downloads");
    std::fs::create_dir(&dest).unwrap();

    let (addr, receiver) = spawn_receiver(&dest, FileNamePolicy::RejectUnsafe)
        .await
        .unwrap();
    send_raw(addr, "../escape.txt", b"owned").await;

    let err = receiver.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        TransferError::Framing(FramingError::UnsafeName(ref name)) if name == "../escape.txt"
    ));
    assert!(!root.path().join("escape.txt").exists());
    assert!(std::fs::read_dir(&dest).unwrap().next().is_none());
}

#[tokio::test]
async fn test_absolute_name_rejected_by_default() {
    let root = tempfile::tempdir().unwrap();
    let target = root.path().join("abs.txt");

    let (addr, receiver) = spawn_receiver(root.path(), FileNamePolicy::RejectUnsafe)
        .await
        .unwrap();
    send_raw(addr, target.to_str().unwrap(), b"owned").await;

    let err = receiver.await.unwrap().unwrap_err();
    assert!(matches!(err, TransferError::Framing(FramingError::UnsafeName(_))));
    assert!(!target.exists());
}

#[tokio::test]
async fn test_preserve_policy_joins_name_as_received() {
    let root = tempfile::tempdir().unwrap();
    let dest = root.path().join("downloads");
    std::fs::create_dir(&dest).unwrap();

    let (addr, receiver) = spawn_receiver(&dest, FileNamePolicy::Preserve)
        .await
        .unwrap();
    send_raw(addr, "../escape.txt", b"kept").await;

    let report = receiver.await.unwrap().unwrap();
    assert_eq!(report.path, dest.join("../escape.txt"));
    assert_eq!(std::fs::read(root.path().join("escape.txt")).unwrap(), b"kept");
}

#[tokio::test]
async fn test_short_header_creates_no_file() {
    let dest = tempfile::tempdir().unwrap();
    let (addr, receiver) = spawn_receiver(dest.path(), FileNamePolicy::RejectUnsafe)
        .await
        .unwrap();

    let mut session = raw_sender(addr).await;
    session.write_all(&[b'x'; 40]).await.unwrap();
    session.shutdown().await.unwrap();

    let err = receiver.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        TransferError::Framing(FramingError::ShortHeader {
            received: 40,
            expected: 100
        })
    ));
    assert_eq!(err.exit_code(), 7);
    assert!(std::fs::read_dir(dest.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_sender_vanishing_mid_header_is_short_header() {
    let dest = tempfile::tempdir().unwrap();
    let (addr, receiver) = spawn_receiver(dest.path(), FileNamePolicy::RejectUnsafe)
        .await
        .unwrap();

    // no close_notify: the TCP connection just goes away
    let mut session = raw_sender(addr).await;
    session.write_all(&[b'x'; 40]).await.unwrap();
    session.flush().await.unwrap();
    drop(session);

    let err = receiver.await.unwrap().unwrap_err();
    assert!(
        matches!(
            err,
            TransferError::Framing(FramingError::ShortHeader {
                received: 40,
                expected: 100
            })
        ),
        "{err:?}"
    );
    assert_eq!(err.exit_code(), 7);
    assert!(std::fs::read_dir(dest.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_file_create_failure_is_reported() {
    let dest = tempfile::tempdir().unwrap();
    // a directory in the way of the output file
    std::fs::create_dir(dest.path().join("taken")).unwrap();

    let (addr, receiver) = spawn_receiver(dest.path(), FileNamePolicy::RejectUnsafe)
        .await
        .unwrap();
    send_raw(addr, "taken", b"data").await;

    let err = receiver.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        TransferError::Framing(FramingError::FileCreate { .. })
    ));
}
