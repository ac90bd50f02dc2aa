//! Session state machine shared by both roles.
//!
//! `Idle → Discovering → ChannelEstablishing → AwaitingVerification → Verified
//! → Transferring → Complete`, with `Failed` reachable from any non-terminal
//! state. Nothing ever moves backwards.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::TransferEvent;
use crate::error::{Result, TransferError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    Idle,
    Discovering,
    ChannelEstablishing,
    AwaitingVerification,
    Verified,
    Transferring,
    Complete,
    Failed,
}

impl TransferState {
    fn rank(self) -> u8 {
        match self {
            TransferState::Idle => 0,
            TransferState::Discovering => 1,
            TransferState::ChannelEstablishing => 2,
            TransferState::AwaitingVerification => 3,
            TransferState::Verified => 4,
            TransferState::Transferring => 5,
            TransferState::Complete => 6,
            TransferState::Failed => 7,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Complete | TransferState::Failed)
    }

    /// Whether `next` directly follows `self`.
    pub fn can_advance_to(self, next: TransferState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == TransferState::Failed {
            return true;
        }
        next.rank() == self.rank() + 1
    }
}

/// Tracks the current state of one session and reports every change.
pub struct SessionState {
    state: TransferState,
    event_tx: mpsc::Sender<TransferEvent>,
}

impl SessionState {
    pub fn new(event_tx: mpsc::Sender<TransferEvent>) -> Self {
        Self {
            state: TransferState::Idle,
            event_tx,
        }
    }

    pub fn current(&self) -> TransferState {
        self.state
    }

    pub fn events(&self) -> &mpsc::Sender<TransferEvent> {
        &self.event_tx
    }

    pub async fn advance(&mut self, next: TransferState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(TransferError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!("state {:?} -> {:?}", self.state, next);
        self.state = next;
        let _ = self.event_tx.send(TransferEvent::StateChanged(next)).await;
        Ok(())
    }

    /// Moves to `Failed` unless the session already reached a terminal state.
    pub async fn fail(&mut self, error: &TransferError) {
        if self.state.is_terminal() {
            return;
        }
        tracing::error!("session failed while {:?}: {}", self.state, error);
        self.state = TransferState::Failed;
        let _ = self
            .event_tx
            .send(TransferEvent::StateChanged(TransferState::Failed))
            .await;
        let _ = self.event_tx.send(TransferEvent::Error(error.to_string())).await;
    }

    /// Runs one step, failing the session if it errors.
    pub async fn step<T>(
        &mut self,
        next: TransferState,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        if let Err(e) = self.advance(next).await {
            self.fail(&e).await;
            return Err(e);
        }
        match fut.await {
            Ok(value) => Ok(value),
            Err(e) => {
                self.fail(&e).await;
                Err(e)
            }
        }
    }
}
