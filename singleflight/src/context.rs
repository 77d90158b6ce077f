//! Cancellation scope observed by callers that wait on someone else's call.
//!
//! A [`Context`] is cheap to clone; clones share the same cancellation state.
//! Child contexts end when their parent ends and inherit its deadline.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::error::ContextError;
use crate::signal::Signal;

#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    token: CancellationToken,
    deadline: Option<Instant>,
    parent: Option<Context>,
    // signals of threads blocked under this context or one of its children
    watchers: Mutex<Watchers>,
}

#[derive(Default)]
struct Watchers {
    next_id: u64,
    signals: HashMap<u64, Weak<Signal>>,
}

impl Context {
    /// Returns a context that never ends unless [`cancel`](Self::cancel) is
    /// called.
    pub fn new() -> Self {
        Self::from_parts(CancellationToken::new(), None, None)
    }

    /// Returns a context that ends at `deadline`.
    ///
    /// Async waits only observe the deadline while polled inside a tokio
    /// runtime with the time driver enabled. Elsewhere they still end on
    /// cancellation.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::from_parts(CancellationToken::new(), Some(deadline), None)
    }

    /// A timeout too large to represent as an [`Instant`] means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::from_parts(CancellationToken::new(), expiry(timeout), None)
    }

    /// Returns a context that ends when `self` ends or when it is canceled
    /// itself. Canceling the child leaves the parent untouched.
    pub fn child(&self) -> Self {
        Self::from_parts(
            self.inner.token.child_token(),
            self.inner.deadline,
            Some(self.clone()),
        )
    }

    /// Like [`child`](Self::child), additionally bounded by `timeout`. The
    /// earlier of the two deadlines applies.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let deadline = match (self.inner.deadline, expiry(timeout)) {
            (Some(inherited), Some(own)) => Some(inherited.min(own)),
            (inherited, own) => inherited.or(own),
        };
        Self::from_parts(
            self.inner.token.child_token(),
            deadline,
            Some(self.clone()),
        )
    }

    fn from_parts(
        token: CancellationToken,
        deadline: Option<Instant>,
        parent: Option<Context>,
    ) -> Self {
        Context {
            inner: Arc::new(Inner {
                token,
                deadline,
                parent,
                watchers: Mutex::new(Watchers::default()),
            }),
        }
    }

    /// Cancels this context and all of its children. Idempotent.
    pub fn cancel(&self) {
        self.inner.token.cancel();
        let signals: Vec<Arc<Signal>> = {
            let watchers = self.inner.watchers.lock();
            watchers.signals.values().filter_map(Weak::upgrade).collect()
        };
        for signal in signals {
            signal.interrupt();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns why the context ended, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if self.is_canceled() {
            return Some(ContextError::Canceled);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Completes once the context is canceled or its deadline passes. The
    /// deadline is only armed when a tokio runtime is current.
    pub async fn done(&self) {
        let timer = match self.inner.deadline {
            Some(deadline) if Handle::try_current().is_ok() => Some(deadline),
            _ => None,
        };
        let expired = async {
            match timer {
                Some(deadline) => {
                    tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
                }
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = self.inner.token.cancelled() => {}
            _ = expired => {}
        }
    }

    /// Registers a blocked thread's signal with this context and every
    /// ancestor, so that canceling any of them interrupts the wait.
    pub(crate) fn register(&self, signal: &Arc<Signal>) -> Registration {
        let mut entries = Vec::new();
        let mut current = Some(self);
        while let Some(ctx) = current {
            let mut watchers = ctx.inner.watchers.lock();
            let id = watchers.next_id;
            watchers.next_id += 1;
            watchers.signals.insert(id, Arc::downgrade(signal));
            drop(watchers);
            entries.push((ctx.clone(), id));
            current = ctx.inner.parent.as_ref();
        }
        Registration { entries }
    }

    #[cfg(test)]
    fn watcher_count(&self) -> usize {
        self.inner.watchers.lock().signals.len()
    }
}

fn expiry(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("canceled", &self.is_canceled())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

/// Removes a signal from the contexts it was registered with on drop.
pub(crate) struct Registration {
    entries: Vec<(Context, u64)>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        for (ctx, id) in self.entries.drain(..) {
            ctx.inner.watchers.lock().signals.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::Context;
    use crate::error::ContextError;
    use crate::signal::Signal;

    #[test]
    fn test_cancel() {
        let ctx = Context::new();
        assert!(!ctx.is_canceled());
        assert_eq!(ctx.err(), None);
        let clone = ctx.clone();
        clone.cancel();
        assert!(ctx.is_canceled());
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
        // idempotent
        ctx.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
    }

    #[test]
    fn test_child_follows_parent() {
        let parent = Context::new();
        let child = parent.child();
        let grandchild = child.child();
        parent.cancel();
        assert!(child.is_canceled());
        assert!(grandchild.is_canceled());
    }

    #[test]
    fn test_child_cancel_leaves_parent() {
        let parent = Context::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_canceled());
        assert!(!parent.is_canceled());
    }

    #[test]
    fn test_deadline() {
        let ctx = Context::with_deadline(Instant::now() - Duration::from_millis(1));
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
        assert!(!ctx.is_canceled());

        // cancellation is reported first
        ctx.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Canceled));

        let ctx = Context::with_timeout(Duration::from_secs(60));
        assert_eq!(ctx.err(), None);
        assert!(ctx.deadline().is_some());
    }

    #[test]
    fn test_child_deadline() {
        let parent = Context::with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let parent = Context::with_timeout(Duration::from_secs(60));
        let child = parent.child_with_timeout(Duration::from_millis(10));
        assert!(child.deadline() < parent.deadline());
        assert_eq!(parent.child().deadline(), parent.deadline());
        assert_eq!(Context::new().child().deadline(), None);
    }

    #[test]
    fn test_registration() {
        let parent = Context::new();
        let child = parent.child();
        let signal = Arc::new(Signal::new());
        let registration = child.register(&signal);
        assert_eq!(child.watcher_count(), 1);
        assert_eq!(parent.watcher_count(), 1);
        drop(registration);
        assert_eq!(child.watcher_count(), 0);
        assert_eq!(parent.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_done() {
        let ctx = Context::with_timeout(Duration::from_millis(10));
        ctx.done().await;
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));

        let ctx = Context::new();
        let child = ctx.child();
        let canceling = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceling.cancel();
        });
        child.done().await;
        assert_eq!(child.err(), Some(ContextError::Canceled));
    }

    #[test]
    fn test_unbounded_timeout() {
        let ctx = Context::with_timeout(Duration::MAX);
        assert_eq!(ctx.deadline(), None);
        assert_eq!(ctx.err(), None);

        let child = ctx.child_with_timeout(Duration::MAX);
        assert_eq!(child.deadline(), None);

        let parent = Context::with_timeout(Duration::from_secs(60));
        let child = parent.child_with_timeout(Duration::MAX);
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn test_done_outside_runtime() {
        let ctx = Context::with_timeout(Duration::from_secs(60));
        let canceling = ctx.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            canceling.cancel();
        });
        futures::executor::block_on(ctx.done());
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
        handle.join().unwrap();
    }
}
