//! Cancellation scopes.
//!
//! Every stream is opened under a [`Scope`]. Cancelling a scope cancels all
//! of its children; producers select on [`Scope::cancelled`] at each
//! suspension point.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::error::{Error, Result};

/// A cancellation scope shared by a driver and the producers it starts.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    token: CancellationToken,
}

impl Scope {
    /// Create a new root scope
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// A scope that is cancelled with this one, but can also be cancelled
    /// on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Child scope cancelled automatically after `timeout`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let child = self.child();
        let token = child.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    debug!(timeout_ms = timeout.as_millis() as u64, "scope deadline reached");
                    token.cancel();
                }
            }
        });
        child
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the scope is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Run `future` unless the scope is cancelled first.
    ///
    /// Returns `None` on cancellation; the future is dropped at its current
    /// suspension point.
    pub async fn run<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            output = future => Some(output),
        }
    }

    /// Cancellable sleep. Returns `Err(Error::Quit)` when interrupted.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(tokio::time::sleep(duration))
            .await
            .ok_or(Error::Quit)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl From<CancellationToken> for Scope {
    fn from(token: CancellationToken) -> Self {
        Self { token }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_child_follows_parent() {
        let root = Scope::new();
        let child = root.child();
        root.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_does_not_cancel_parent() {
        let root = Scope::new();
        root.child().cancel();
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn test_timeout_cancels() {
        let scope = Scope::new().with_timeout(Duration::from_millis(20));
        let started = Instant::now();
        scope.cancelled().await;
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_sleep_interrupted() {
        let scope = Scope::new();
        let canceller = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let result = scope.sleep(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(Error::Quit)));
    }
}
