//! Cooperative cancellation for packet runs

use tokio_util::sync::CancellationToken;

/// Abort signal shared between a caller and a running interpreter.
///
/// The interpreter only looks at the signal at operation boundaries: before
/// the next sequential node and before the next loop iteration. Driver calls
/// already in flight are left to finish.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the run stop scheduling new work
    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Handle that is aborted with this one but can also be aborted alone
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Resolves once `abort` has been called
    pub async fn aborted(&self) {
        self.token.cancelled().await;
    }
}
