//! TLS file transfer over TCP.
//!
//! This module provides:
//! - TLS configuration and the single-connection listener
//! - Wire framing (100 byte name header, raw body)
//! - The sending and receiving session flows

pub mod constants;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod tls;
pub mod utils;

use std::net::SocketAddr;
use std::path::PathBuf;

// Re-export public API
pub use receiver::{Advertise, Receiver, receive_file};
pub use sender::{PeerSource, send_file};
pub use tls::{SecureListener, SecureSession, TrustPolicy, connect};

/// Outcome of a completed transfer, on either side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// Name as carried in the header, lossily decoded for display
    pub file_name: String,
    /// Sender: the source file. Receiver: the written file.
    pub path: PathBuf,
    pub bytes: u64,
    /// BLAKE3 of the body, hex encoded
    pub digest: String,
    pub peer: SocketAddr,
}
