use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Stop signal shared by every task a node or transport spawns.
///
/// Clones observe the same signal; children are stopped with their parent
/// but can be stopped on their own.
#[derive(Debug, Clone, Default)]
pub struct SignalOfStop {
    token: CancellationToken,
}

impl SignalOfStop {
    pub fn new() -> SignalOfStop {
        SignalOfStop {
            token: CancellationToken::new(),
        }
    }

    pub fn child(&self) -> SignalOfStop {
        SignalOfStop {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait_cancellation(&self) {
        self.token.cancelled().await
    }

    /// Runs `fut` until it completes or the signal fires, whichever is first.
    pub async fn select<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            _ = self.token.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Spawns `fut` on the runtime; the task is dropped once the signal fires.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let sos = self.clone();
        tokio::spawn(async move { sos.select(fut).await })
    }
}
