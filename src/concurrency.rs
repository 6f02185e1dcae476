//! Cancellation tokens and scopes.
//!
//! Provides graceful cancellation for async tasks with hierarchical scopes,
//! used by the health-check scheduler's shutdown path and by probe
//! invocations that must be abandoned past their timeout.
//!
//! # Example
//! ```no_run
//! use adaptive_cache::concurrency::CancelToken;
//!
//! async fn example() {
//!     let token = CancelToken::new();
//!     let child_token = token.child_token();
//!
//!     tokio::spawn({
//!         let token = child_token.clone();
//!         async move {
//!             tokio::select! {
//!                 _ = token.cancelled() => {}
//!                 _ = do_work() => {}
//!             }
//!         }
//!     });
//!
//!     token.cancel();
//! }
//!
//! async fn do_work() {
//!     tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
//! }
//! ```

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Notify;

/// A token for cooperative task cancellation. Clones share the same
/// underlying state; cancelling any clone cancels all of them.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelTokenInner>,
}

struct CancelTokenInner {
    cancelled: RwLock<bool>,
    notify: Notify,
    parent: Option<CancelToken>,
    children: RwLock<Vec<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelTokenInner {
                cancelled: RwLock::new(false),
                notify: Notify::new(),
                parent: None,
                children: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Create a child token; cancelling the parent cancels all children.
    pub fn child_token(&self) -> Self {
        let child = Self {
            inner: Arc::new(CancelTokenInner {
                cancelled: RwLock::new(false),
                notify: Notify::new(),
                parent: Some(self.clone()),
                children: RwLock::new(Vec::new()),
            }),
        };
        self.inner.children.write().push(child.clone());
        child
    }

    pub fn cancel(&self) {
        *self.inner.cancelled.write() = true;
        self.inner.notify.notify_waiters();
        let children = self.inner.children.read().clone();
        for child in children {
            child.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        if *self.inner.cancelled.read() {
            return true;
        }
        if let Some(parent) = &self.inner.parent {
            return parent.is_cancelled();
        }
        false
    }

    /// Resolves once this token (or an ancestor) is cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII cancellation: cancels its token when dropped unless `leak`ed.
pub struct CancelScope {
    token: CancelToken,
    cancel_on_drop: bool,
}

impl CancelScope {
    pub fn new() -> Self {
        Self {
            token: CancelToken::new(),
            cancel_on_drop: true,
        }
    }

    pub fn with_parent(parent: &CancelToken) -> Self {
        Self {
            token: parent.child_token(),
            cancel_on_drop: true,
        }
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Disable cancel-on-drop, returning the token for the caller to own.
    pub fn leak(mut self) -> CancelToken {
        self.cancel_on_drop = false;
        self.token.clone()
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancelScope {
    fn drop(&mut self) {
        if self.cancel_on_drop {
            self.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn cancels_children() {
        let parent = CancelToken::new();
        let child = parent.child_token();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let token = CancelToken::new();
        let token_clone = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token_clone.cancel();
        });
        timeout(Duration::from_millis(200), token.cancelled())
            .await
            .expect("should be cancelled");
    }

    #[tokio::test]
    async fn scope_cancels_on_drop() {
        let token = {
            let scope = CancelScope::new();
            scope.token().clone()
        };
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn leaked_scope_does_not_cancel() {
        let token = {
            let scope = CancelScope::new();
            scope.leak()
        };
        assert!(!token.is_cancelled());
    }
}
