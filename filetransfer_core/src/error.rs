use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::state::TransferState;

/// Errors raised while encoding or decoding the transfer framing.
#[derive(Error, Debug)]
pub enum FramingError {
    #[error("file name is {len} bytes, the header only fits {max} bytes plus its terminator")]
    NameTooLong { len: usize, max: usize },

    #[error("file name contains a zero byte and cannot be framed")]
    NameContainsNul,

    #[error("short header: received {received} of {expected} bytes before the stream ended")]
    ShortHeader { received: usize, expected: usize },

    #[error("refusing unsafe file name {0:?} from sender")]
    UnsafeName(String),

    #[error("failed to create destination file {path:?}")]
    FileCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to create session identity: {0}")]
    Identity(String),

    #[error("discovery error: {0}")]
    Discovery(String),

    #[error("no receiver found within {0:?}")]
    PeerNotFound(Duration),

    #[error("secure channel error: {0}")]
    Channel(String),

    #[error("wrong secret, file transfer rejected")]
    VerificationRejected,

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: TransferState,
        to: TransferState,
    },

    #[error("IO Error")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Process exit code for this error class. Every class is nonzero.
    pub fn exit_code(&self) -> u8 {
        match self {
            TransferError::Config(_) => 2,
            TransferError::Identity(_) => 3,
            TransferError::Discovery(_) | TransferError::PeerNotFound(_) => 4,
            TransferError::Channel(_) => 5,
            TransferError::VerificationRejected => 6,
            TransferError::Framing(_) => 7,
            TransferError::InvalidTransition { .. } | TransferError::Io(_) => 1,
        }
    }
}

impl From<rustls::Error> for TransferError {
    fn from(e: rustls::Error) -> Self {
        TransferError::Channel(e.to_string())
    }
}

impl From<mdns_sd::Error> for TransferError {
    fn from(e: mdns_sd::Error) -> Self {
        TransferError::Discovery(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
