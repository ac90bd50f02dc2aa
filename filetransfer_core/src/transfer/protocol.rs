//! Wire framing: a fixed 100 byte header carrying the file name, then the
//! raw file bytes until the stream closes. No length prefix, no checksum.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::constants::{BUFFER_SIZE, HEADER_SIZE, MAX_NAME_LEN, PROGRESS_INTERVAL};
use super::utils::report_progress;
use crate::TransferEvent;
use crate::error::{FramingError, Result, TransferError};
use crate::verification::VerifiedSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHeader {
    name: Vec<u8>,
}

impl TransferHeader {
    pub fn new(name: impl Into<Vec<u8>>) -> std::result::Result<Self, FramingError> {
        let name = name.into();
        if name.len() > MAX_NAME_LEN {
            return Err(FramingError::NameTooLong {
                len: name.len(),
                max: MAX_NAME_LEN,
            });
        }
        if name.contains(&0) {
            return Err(FramingError::NameContainsNul);
        }
        Ok(Self { name })
    }

    /// Header for the base name of `path`.
    pub fn for_path(path: &Path) -> Result<Self> {
        let base = path.file_name().ok_or_else(|| {
            TransferError::Config(format!("{} has no file name", path.display()))
        })?;
        Ok(Self::new(os_str_bytes(base)?)?)
    }

    pub fn name_bytes(&self) -> &[u8] {
        &self.name
    }

    pub fn display_name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    /// The name as a single path component, byte-exact on Unix.
    pub fn to_path_component(&self) -> PathBuf {
        #[cfg(unix)]
        {
            use std::os::unix::ffi::OsStrExt;
            PathBuf::from(std::ffi::OsStr::from_bytes(&self.name))
        }
        #[cfg(not(unix))]
        {
            PathBuf::from(self.display_name().into_owned())
        }
    }

    /// Name bytes, one zero terminator, zero padding.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..self.name.len()].copy_from_slice(&self.name);
        buf
    }

    /// Name = every byte before the first zero byte.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Self {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(HEADER_SIZE);
        Self {
            name: buf[..end].to_vec(),
        }
    }
}

fn os_str_bytes(name: &std::ffi::OsStr) -> Result<Vec<u8>> {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        Ok(name.as_bytes().to_vec())
    }
    #[cfg(not(unix))]
    {
        name.to_str()
            .map(|s| s.as_bytes().to_vec())
            .ok_or_else(|| TransferError::Config(format!("{:?} is not valid UTF-8", name)))
    }
}

/// Write the header as one unit.
pub async fn write_header<W>(writer: &mut W, header: &TransferHeader) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&header.encode()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly `HEADER_SIZE` bytes. Ending the stream earlier is a
/// `ShortHeader` error.
pub async fn read_header<R>(reader: &mut R) -> Result<TransferHeader>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = match reader.read(&mut buf[filled..]).await {
            Ok(n) => n,
            // a peer that vanishes without close_notify ends the stream too
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => 0,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            return Err(FramingError::ShortHeader {
                received: filled,
                expected: HEADER_SIZE,
            }
            .into());
        }
        filled += n;
    }
    Ok(TransferHeader::decode(&buf))
}

/// Totals for one copied body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyStats {
    pub bytes: u64,
    /// BLAKE3 of the copied bytes, hex encoded
    pub digest: String,
}

/// Copy `reader` into `writer` until end of stream, reporting progress.
/// `total` is only known on the sending side.
pub async fn copy_body<R, W>(
    reader: &mut R,
    writer: &mut W,
    file_name: &str,
    total: Option<u64>,
    is_sending: bool,
    event_tx: &mpsc::Sender<TransferEvent>,
) -> Result<CopyStats>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut hasher = blake3::Hasher::new();
    let mut copied: u64 = 0;
    let mut next_report = PROGRESS_INTERVAL;
    let start_time = Instant::now();

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n]).await?;
        hasher.update(&buffer[..n]);
        copied += n as u64;

        if copied >= next_report {
            report_progress(event_tx, file_name, copied, total, start_time, is_sending).await;
            next_report = copied + PROGRESS_INTERVAL;
        }
    }
    writer.flush().await?;
    report_progress(event_tx, file_name, copied, total, start_time, is_sending).await;

    Ok(CopyStats {
        bytes: copied,
        digest: hasher.finalize().to_hex().to_string(),
    })
}

/// Sender side framing over a session that passed the verification gate:
/// header, body until `body` is exhausted, then a clean TLS close.
pub async fn send_framed<S, R>(
    session: &mut VerifiedSession<S>,
    header: &TransferHeader,
    body: &mut R,
    total: u64,
    event_tx: &mpsc::Sender<TransferEvent>,
) -> Result<CopyStats>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let file_name = header.display_name();
    let stream = session.stream_mut();
    write_header(stream, header).await?;
    let stats = copy_body(body, stream, &file_name, Some(total), true, event_tx).await?;
    // close_notify marks the end of the body
    stream.shutdown().await?;
    Ok(stats)
}

/// Receiver side: the header of a verified session.
pub async fn receive_header<S>(session: &mut VerifiedSession<S>) -> Result<TransferHeader>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    read_header(session.stream_mut()).await
}

/// Receiver side: everything after the header, until the sender closes.
pub async fn receive_body<S, W>(
    session: &mut VerifiedSession<S>,
    out: &mut W,
    file_name: &str,
    event_tx: &mpsc::Sender<TransferEvent>,
) -> Result<CopyStats>
where
    S: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    copy_body(session.stream_mut(), out, file_name, None, false, event_tx).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = TransferHeader::new("hello.txt").unwrap();
        let buf = header.encode();
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[..9], b"hello.txt");
        assert!(buf[9..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_header_round_trip_non_ascii() {
        let header = TransferHeader::new("résumé 🦀.pdf").unwrap();
        let decoded = TransferHeader::decode(&header.encode());
        assert_eq!(decoded, header);
        assert_eq!(decoded.display_name(), "résumé 🦀.pdf");
    }

    #[test]
    fn test_name_length_boundary() {
        assert!(TransferHeader::new("a".repeat(MAX_NAME_LEN)).is_ok());
        let err = TransferHeader::new("a".repeat(MAX_NAME_LEN + 1)).unwrap_err();
        assert!(matches!(err, FramingError::NameTooLong { len: 100, max: 99 }));
    }

    #[test]
    fn test_longest_name_still_terminated() {
        let header = TransferHeader::new("b".repeat(MAX_NAME_LEN)).unwrap();
        let buf = header.encode();
        assert_eq!(buf[MAX_NAME_LEN], 0);
        assert_eq!(TransferHeader::decode(&buf), header);
    }

    #[test]
    fn test_decode_ignores_bytes_after_terminator() {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..5].copy_from_slice(b"a.txt");
        buf[6..10].copy_from_slice(b"junk");
        assert_eq!(TransferHeader::decode(&buf).name_bytes(), b"a.txt");
    }

    #[test]
    fn test_decode_without_terminator_uses_whole_buffer() {
        let buf = [b'x'; HEADER_SIZE];
        assert_eq!(TransferHeader::decode(&buf).name_bytes().len(), HEADER_SIZE);
    }

    #[test]
    fn test_nul_in_name_rejected() {
        assert!(matches!(
            TransferHeader::new(b"a\0b".to_vec()),
            Err(FramingError::NameContainsNul)
        ));
    }

    #[test]
    fn test_for_path_uses_base_name() {
        let header = TransferHeader::for_path(Path::new("/some/dir/report.csv")).unwrap();
        assert_eq!(header.name_bytes(), b"report.csv");
    }

    #[test]
    fn test_for_path_without_name_is_config_error() {
        let err = TransferHeader::for_path(Path::new("/")).unwrap_err();
        assert!(matches!(err, TransferError::Config(_)));
    }

    #[tokio::test]
    async fn test_read_header_in_small_pieces() {
        let header = TransferHeader::new("pieces.bin").unwrap();
        let (mut a, mut b) = tokio::io::duplex(7);
        let writer = tokio::spawn(async move {
            write_header(&mut a, &header).await.unwrap();
            header
        });
        let read = read_header(&mut b).await.unwrap();
        assert_eq!(read, writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_short_header() {
        let (mut a, mut b) = tokio::io::duplex(256);
        a.write_all(&[b'x'; 40]).await.unwrap();
        drop(a);
        let err = read_header(&mut b).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::Framing(FramingError::ShortHeader {
                received: 40,
                expected: HEADER_SIZE
            })
        ));
    }

    #[tokio::test]
    async fn test_copy_body_digest_and_count() {
        let (tx, _rx) = mpsc::channel(64);
        let data = vec![7u8; 3 * BUFFER_SIZE + 11];
        let mut out = Vec::new();
        let stats = copy_body(&mut data.as_slice(), &mut out, "f", None, false, &tx)
            .await
            .unwrap();
        assert_eq!(stats.bytes, data.len() as u64);
        assert_eq!(stats.digest, blake3::hash(&data).to_hex().to_string());
        assert_eq!(out, data);
    }
}
