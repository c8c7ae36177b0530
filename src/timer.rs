use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// A deferred reconnection attempt.
///
/// The task runs after `delay` unless the timer is cancelled or dropped first; dropping
/// the owning connection state is therefore enough to abandon the attempt.
#[derive(Debug)]
pub(crate) struct ReconnectTimer {
    token: CancellationToken,
}

impl ReconnectTimer {
    /// Spawn the wait on the current Tokio runtime.
    pub(crate) fn schedule<F>(delay: Duration, task: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;

                () = cancelled.cancelled() => {}
                () = sleep(delay) => task(),
            }
        });

        Self { token }
    }

    pub(crate) fn is_pending(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Drop for ReconnectTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
