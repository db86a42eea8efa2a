use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Valid,
    /// The service rejected the active credential; the session must pick another.
    Invalid,
}

/// Session-wide notification that the active credential stopped working.
///
/// Drivers raise it on an auth rejection; the surrounding session watches it
/// and calls [`CredentialSignal::reset`] once a new credential is selected.
#[derive(Debug, Clone)]
pub struct CredentialSignal {
    tx: Arc<watch::Sender<CredentialState>>,
}

impl CredentialSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(CredentialState::Valid);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<CredentialState> {
        self.tx.subscribe()
    }

    pub fn state(&self) -> CredentialState {
        *self.tx.borrow()
    }

    pub fn invalidate(&self) {
        let previous = self.tx.send_replace(CredentialState::Invalid);
        if previous == CredentialState::Valid {
            tracing::warn!("active credential rejected, re-selection required");
        }
    }

    pub fn reset(&self) {
        self.tx.send_replace(CredentialState::Valid);
    }
}

impl Default for CredentialSignal {
    fn default() -> Self {
        Self::new()
    }
}
