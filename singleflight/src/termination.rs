use std::any::Any;
use std::fmt;
use std::panic;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

/// Unwinds the current thread or task without a value and without a panic.
///
/// This is the forced exit of a worker. Inside [`Group::work`] or
/// [`Group::work_async`] every caller sharing the call unwinds the same way,
/// carrying a [`ForcedExit`] payload. The panic hook is not invoked.
///
/// [`Group::work`]: crate::Group::work
/// [`Group::work_async`]: crate::Group::work_async
pub fn exit() -> ! {
    panic::resume_unwind(Box::new(ForcedExit))
}

/// Payload of an unwind started by [`exit`], or replayed by a caller whose
/// shared call was forcibly exited.
///
/// A forced exit must be propagated, not swallowed: code that catches unwinds
/// should test the payload with [`ForcedExit::is_forced_exit`] and resume it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ForcedExit;

impl ForcedExit {
    pub fn is_forced_exit(payload: &(dyn Any + Send)) -> bool {
        payload.is::<ForcedExit>()
    }
}

/// Panic payload replayed to every caller of a call whose worker panicked.
///
/// All clones refer to the single payload the worker panicked with.
#[derive(Clone, Error)]
#[error("singleflight: worker panicked: {message}")]
pub struct PanicError {
    message: Arc<str>,
    payload: Arc<Mutex<Box<dyn Any + Send>>>,
}

impl PanicError {
    pub(crate) fn new(payload: Box<dyn Any + Send>) -> Self {
        let message: Arc<str> = if let Some(s) = payload.downcast_ref::<&'static str>() {
            Arc::from(*s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Arc::from(s.as_str())
        } else if let Some(nested) = payload.downcast_ref::<PanicError>() {
            nested.message.clone()
        } else {
            Arc::from("Box<dyn Any>")
        };
        PanicError {
            message,
            payload: Arc::new(Mutex::new(payload)),
        }
    }

    /// The panic message, when the payload was a string.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn payload_is<T: Any>(&self) -> bool {
        self.payload.lock().is::<T>()
    }

    /// Runs `f` with the original payload.
    pub fn with_payload<R>(&self, f: impl FnOnce(&(dyn Any + Send)) -> R) -> R {
        let payload = self.payload.lock();
        f(&**payload)
    }

    /// Returns true if both errors wrap the same panic.
    pub fn same_payload(&self, other: &PanicError) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }
}

impl fmt::Debug for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicError")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// How the executor's call ended.
pub(crate) enum Termination<V, E> {
    Normal(V),
    Errored(E),
    Aborted(PanicError),
    ForcedExit,
}

impl<V, E> Termination<V, E> {
    pub(crate) fn from_unwind(payload: Box<dyn Any + Send>) -> Self {
        if ForcedExit::is_forced_exit(&*payload) {
            Termination::ForcedExit
        } else {
            Termination::Aborted(PanicError::new(payload))
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Termination::Normal(_) => "normal",
            Termination::Errored(_) => "errored",
            Termination::Aborted(_) => "aborted",
            Termination::ForcedExit => "forced exit",
        }
    }

    /// Reproduces the ending in the calling context: returns for normal and
    /// errored calls, unwinds otherwise.
    pub(crate) fn replay(&self) -> Result<V, E>
    where
        V: Clone,
        E: Clone,
    {
        match self {
            Termination::Normal(v) => Ok(v.clone()),
            Termination::Errored(e) => Err(e.clone()),
            Termination::Aborted(err) => panic::resume_unwind(Box::new(err.clone())),
            Termination::ForcedExit => exit(),
        }
    }
}

impl<V, E> From<Result<V, E>> for Termination<V, E> {
    fn from(result: Result<V, E>) -> Self {
        match result {
            Ok(v) => Termination::Normal(v),
            Err(e) => Termination::Errored(e),
        }
    }
}
