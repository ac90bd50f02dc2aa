//! Single file transfer between two hosts on the same LAN.
//!
//! The receiver advertises itself over mDNS and listens for one TLS
//! connection under an ephemeral self-signed identity. The sender browses for
//! it and connects without validating that certificate; instead both
//! operators compare a word phrase derived from the TLS session before the
//! file name header and the raw file bytes are streamed.

use std::net::SocketAddr;
use std::path::PathBuf;

pub mod config;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod state;
pub mod transfer;
pub mod verification;

pub use config::{FileNamePolicy, TransferConfig};
pub use discovery::PeerAddress;
pub use error::{FramingError, Result, TransferError};
pub use identity::SessionIdentity;
pub use state::TransferState;
pub use transfer::{
    Advertise, PeerSource, Receiver, TransferReport, TrustPolicy, receive_file, send_file,
};
pub use verification::{PhraseConfirmer, VerificationPhrase, parse_confirmation};

/// Report from the core to the front-end
#[derive(Debug, Clone)]
pub enum TransferEvent {
    Status(String),

    StateChanged(TransferState),

    /// Receiver: listening socket is bound
    Listening {
        addr: SocketAddr,
    },

    /// Sender: receiver located
    PeerFound {
        addr: SocketAddr,
    },

    /// Both sides: compare this phrase with the other screen
    ShowPhrase {
        phrase: String,
    },

    TransferStarted {
        file_name: String,
        /// Unknown on the receiving side
        total_bytes: Option<u64>,
        is_sending: bool,
    },

    TransferProgress {
        file_name: String,
        bytes_done: u64,
        total_bytes: Option<u64>,
        speed: String,
        speed_bps: f64,
        is_sending: bool,
    },

    TransferCompleted {
        file_name: String,
        path: PathBuf,
        bytes: u64,
        /// BLAKE3 of the streamed bytes, hex encoded
        digest: String,
        is_sending: bool,
    },

    Error(String),
}
