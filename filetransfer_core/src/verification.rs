//! Out-of-band verification of the secure session.
//!
//! Both peers export the same 16 bytes from the TLS session and turn them
//! into a BIP-39 word sequence. The operators compare the words on both
//! screens; an attacker sitting in the middle holds two different sessions
//! and therefore shows two different phrases.

use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::TransferEvent;
use crate::error::{Result, TransferError};
use crate::transfer::constants::{EXPORT_LABEL, EXPORTED_SECRET_LEN};
use crate::transfer::tls::SecureSession;

/// Words shown to the operator, 12 for 16 bytes of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationPhrase(Vec<String>);

impl VerificationPhrase {
    pub fn from_secret(secret: &[u8; EXPORTED_SECRET_LEN]) -> Result<Self> {
        let mnemonic = bip39::Mnemonic::from_entropy(secret)
            .map_err(|e| TransferError::Channel(format!("phrase encoding failed: {}", e)))?;
        Ok(Self(
            mnemonic
                .to_string()
                .split_whitespace()
                .map(str::to_owned)
                .collect(),
        ))
    }

    pub fn words(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for VerificationPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

/// Asks the local operator whether both screens show the same phrase.
///
/// Implementations may block; the gate calls them off the async runtime.
pub trait PhraseConfirmer: Send + Sync + 'static {
    fn confirm(&self, phrase: &VerificationPhrase) -> std::io::Result<bool>;
}

/// Interpret an operator answer: empty means yes, otherwise the first
/// character must be `y` or `Y`.
pub fn parse_confirmation(input: &str) -> bool {
    let answer = input.trim_end_matches(['\r', '\n']);
    match answer.chars().next() {
        None => true,
        Some(c) => c.eq_ignore_ascii_case(&'y'),
    }
}

/// A secure session whose phrase the operator has confirmed. Only
/// [`verify_session`] produces one, so file data cannot move before the gate.
pub struct VerifiedSession<S = SecureSession> {
    stream: S,
}

impl<S> VerifiedSession<S> {
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// Session that can produce verification key material.
pub trait ExportSecret {
    fn export_verification_secret(&self) -> Result<[u8; EXPORTED_SECRET_LEN]>;
}

impl ExportSecret for SecureSession {
    fn export_verification_secret(&self) -> Result<[u8; EXPORTED_SECRET_LEN]> {
        self.export_secret(EXPORT_LABEL)
    }
}

/// Derive the phrase for `session`, show it, and wait for the operator.
/// A rejection drops the session without reading or writing anything else.
pub async fn verify_session<S>(
    session: S,
    confirmer: Arc<dyn PhraseConfirmer>,
    event_tx: &mpsc::Sender<TransferEvent>,
) -> Result<VerifiedSession<S>>
where
    S: ExportSecret + AsyncRead + AsyncWrite + Unpin,
{
    let secret = session.export_verification_secret()?;
    let phrase = VerificationPhrase::from_secret(&secret)?;
    let _ = event_tx
        .send(TransferEvent::ShowPhrase {
            phrase: phrase.to_string(),
        })
        .await;

    let confirmed = tokio::task::spawn_blocking(move || confirmer.confirm(&phrase))
        .await
        .map_err(|e| TransferError::Io(std::io::Error::other(e)))??;

    if !confirmed {
        tracing::warn!("Operator rejected the verification phrase");
        return Err(TransferError::VerificationRejected);
    }
    tracing::info!("Verification phrase confirmed");
    Ok(VerifiedSession { stream: session })
}
