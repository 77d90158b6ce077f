use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::context::Context;
use crate::error::ContextError;

/// One-shot broadcast fired once the executor has recorded its outcome.
///
/// Once fired it stays fired, so late waiters return immediately. Blocking
/// waiters park on the condvar, async waiters on the `Notify`.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    fired: AtomicBool,
    lock: Mutex<()>,
    cvar: Condvar,
    notify: Notify,
}

impl Signal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub(crate) fn fire(&self) {
        self.fired.store(true, Ordering::Release);
        // a blocked thread checks `fired` while holding the lock
        drop(self.lock.lock());
        self.cvar.notify_all();
        self.notify.notify_waiters();
    }

    /// Wakes blocked threads without firing so they re-check their context.
    pub(crate) fn interrupt(&self) {
        drop(self.lock.lock());
        self.cvar.notify_all();
    }

    /// Blocks the current thread until the signal fires or `ctx` ends.
    pub(crate) fn wait_blocking(self: &Arc<Self>, ctx: &Context) -> Result<(), ContextError> {
        if self.is_fired() {
            return Ok(());
        }
        let _registration = ctx.register(self);
        let mut guard = self.lock.lock();
        loop {
            if self.is_fired() {
                return Ok(());
            }
            if let Some(err) = ctx.err() {
                return Err(err);
            }
            match ctx.deadline() {
                Some(deadline) => {
                    self.cvar.wait_until(&mut guard, deadline);
                }
                None => self.cvar.wait(&mut guard),
            }
        }
    }

    /// Waits until the signal fires or `ctx` ends.
    pub(crate) async fn wait(&self, ctx: &Context) -> Result<(), ContextError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_fired() {
                return Ok(());
            }
            if let Some(err) = ctx.err() {
                return Err(err);
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = ctx.done() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::Signal;
    use crate::context::Context;
    use crate::error::ContextError;

    #[test]
    fn test_fired_before_wait() {
        let signal = Arc::new(Signal::new());
        signal.fire();
        assert!(signal.is_fired());
        let ctx = Context::new();
        ctx.cancel();
        // an already fired signal wins over an ended context
        assert_eq!(signal.wait_blocking(&ctx), Ok(()));
    }

    #[test]
    fn test_blocking_wakeup() {
        let signal = Arc::new(Signal::new());
        let firing = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            firing.fire();
        });
        assert_eq!(signal.wait_blocking(&Context::new()), Ok(()));
        handle.join().unwrap();
    }

    #[test]
    fn test_blocking_cancel() {
        let signal = Arc::new(Signal::new());
        let ctx = Context::new();
        let canceling = ctx.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceling.cancel();
        });
        assert_eq!(signal.wait_blocking(&ctx), Err(ContextError::Canceled));
        assert!(!signal.is_fired());
        handle.join().unwrap();
    }

    #[test]
    fn test_blocking_parent_cancel() {
        let signal = Arc::new(Signal::new());
        let parent = Context::new();
        let ctx = parent.child();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            parent.cancel();
        });
        assert_eq!(signal.wait_blocking(&ctx), Err(ContextError::Canceled));
        handle.join().unwrap();
    }

    #[test]
    fn test_blocking_deadline() {
        let signal = Arc::new(Signal::new());
        let began = Instant::now();
        let ctx = Context::with_timeout(Duration::from_millis(30));
        assert_eq!(
            signal.wait_blocking(&ctx),
            Err(ContextError::DeadlineExceeded)
        );
        assert!(began.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_async_wakeup() {
        let signal = Arc::new(Signal::new());
        let firing = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            firing.fire();
        });
        assert_eq!(signal.wait(&Context::new()).await, Ok(()));
    }

    #[tokio::test]
    async fn test_async_cancel() {
        let signal = Signal::new();
        let ctx = Context::new();
        let canceling = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceling.cancel();
        });
        assert_eq!(signal.wait(&ctx).await, Err(ContextError::Canceled));
    }

    #[tokio::test]
    async fn test_async_deadline() {
        let signal = Signal::new();
        let ctx = Context::with_timeout(Duration::from_millis(20));
        assert_eq!(
            signal.wait(&ctx).await,
            Err(ContextError::DeadlineExceeded)
        );
    }
}
