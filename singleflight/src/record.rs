use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::signal::Signal;
use crate::termination::Termination;

/// State of one execution for one key.
///
/// Written by the executor until the outcome is set, read-only afterwards.
/// `attach` and `join` are only called with the group's table locked.
pub(crate) struct Record<V, E> {
    refs: AtomicUsize,
    shared: AtomicBool,
    signal: OnceLock<Arc<Signal>>,
    outcome: OnceLock<Termination<V, E>>,
}

impl<V, E> Record<V, E> {
    pub(crate) fn new() -> Self {
        Record {
            refs: AtomicUsize::new(0),
            shared: AtomicBool::new(false),
            signal: OnceLock::new(),
            outcome: OnceLock::new(),
        }
    }

    pub(crate) fn attach(&self) -> usize {
        self.refs.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns true when the last attached caller detached.
    pub(crate) fn detach(&self) -> bool {
        self.refs.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Marks the record as shared by a second caller and hands out the
    /// completion signal, creating it on first use.
    pub(crate) fn join(&self) -> Arc<Signal> {
        self.shared.store(true, Ordering::Relaxed);
        self.signal.get_or_init(|| Arc::new(Signal::new())).clone()
    }

    pub(crate) fn is_shared(&self) -> bool {
        self.shared.load(Ordering::Relaxed)
    }

    pub(crate) fn signal(&self) -> Option<&Arc<Signal>> {
        self.signal.get()
    }

    /// Stores the outcome. The first stored outcome wins.
    pub(crate) fn complete(&self, termination: Termination<V, E>) -> &Termination<V, E> {
        self.outcome.get_or_init(|| termination)
    }

    pub(crate) fn outcome(&self) -> Option<&Termination<V, E>> {
        self.outcome.get()
    }

    /// Clears every field so the record can serve another key.
    pub(crate) fn reset(&mut self) {
        *self.refs.get_mut() = 0;
        *self.shared.get_mut() = false;
        self.signal.take();
        self.outcome.take();
    }
}
