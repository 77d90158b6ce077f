use thiserror::Error;

/// Why a [`Context`](crate::Context) stopped a waiter.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq, Hash)]
pub enum ContextError {
    /// The context was canceled explicitly.
    #[error("context canceled")]
    Canceled,
    /// The context's deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Error returned to a caller of [`Group::work`](crate::Group::work) and
/// [`Group::work_async`](crate::Group::work_async).
///
/// Panics and forced exits of the worker are never turned into an `Error`;
/// they are replayed as unwinds instead.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error<E> {
    /// The caller gave up waiting on an in-flight call. Only waiters can see
    /// this; the executing caller never observes its own context here.
    #[error(transparent)]
    Context(#[from] ContextError),
    /// The worker returned an error. Every caller sharing the call gets a
    /// clone of it.
    #[error("{0}")]
    Worker(E),
}

impl<E> Error<E> {
    /// Returns true if the caller stopped waiting because its context ended.
    pub fn is_context(&self) -> bool {
        matches!(self, Error::Context(_))
    }

    /// Returns the worker's error, if this is one.
    pub fn worker(&self) -> Option<&E> {
        match self {
            Error::Worker(e) => Some(e),
            Error::Context(_) => None,
        }
    }

    pub fn into_worker(self) -> Option<E> {
        match self {
            Error::Worker(e) => Some(e),
            Error::Context(_) => None,
        }
    }
}
