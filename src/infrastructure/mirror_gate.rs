use crate::infrastructure::error::InfraError;
use crate::infrastructure::mirror_store::MirrorStore;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
enum MirrorState {
    NotReady,
    Ready(Arc<dyn MirrorStore>),
    Failed(String),
}

impl std::fmt::Debug for MirrorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotReady => f.write_str("NotReady"),
            Self::Ready(_) => f.write_str("Ready"),
            Self::Failed(cause) => f.debug_tuple("Failed").field(cause).finish(),
        }
    }
}

/// Write side of the readiness gate, owned by whoever replicates the mirror.
#[derive(Debug)]
pub struct MirrorPublisher {
    sender: watch::Sender<MirrorState>,
}

impl MirrorPublisher {
    pub fn ready(self, store: Arc<dyn MirrorStore>) {
        self.sender.send_replace(MirrorState::Ready(store));
    }

    pub fn fail(self, cause: impl Into<String>) {
        self.sender.send_replace(MirrorState::Failed(cause.into()));
    }
}

/// Read side of the readiness gate. Every query against the mirror goes
/// through [`MirrorGate::ready`] first.
#[derive(Debug, Clone)]
pub struct MirrorGate {
    receiver: watch::Receiver<MirrorState>,
}

impl MirrorGate {
    pub fn channel() -> (MirrorPublisher, MirrorGate) {
        let (sender, receiver) = watch::channel(MirrorState::NotReady);
        (MirrorPublisher { sender }, MirrorGate { receiver })
    }

    /// Gate that is already open on `store`.
    pub fn ready_with(store: Arc<dyn MirrorStore>) -> Self {
        let (publisher, gate) = Self::channel();
        let receiver = gate.receiver.clone();
        publisher.ready(store);
        Self { receiver }
    }

    /// Suspends until the mirror is ready or has failed.
    pub async fn ready(&self) -> Result<Arc<dyn MirrorStore>, InfraError> {
        let mut receiver = self.receiver.clone();
        let state = receiver
            .wait_for(|state| !matches!(state, MirrorState::NotReady))
            .await
            .map_err(|_| {
                InfraError::SyncFailed(
                    "replication stopped before the mirror became ready".to_string(),
                )
            })?;
        match &*state {
            MirrorState::Ready(store) => Ok(Arc::clone(store)),
            MirrorState::Failed(cause) => Err(InfraError::SyncFailed(cause.clone())),
            MirrorState::NotReady => Err(InfraError::SyncFailed("mirror is not ready".to_string())),
        }
    }
}
