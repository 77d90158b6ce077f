use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::record::Record;

/// Free-list of retired records.
pub(crate) struct Pool<V, E> {
    free: Mutex<Vec<Arc<Record<V, E>>>>,
    capacity: usize,
}

impl<V, E> Pool<V, E> {
    pub(crate) fn new(capacity: usize) -> Self {
        Pool {
            free: Mutex::new(Vec::with_capacity(capacity.min(64))),
            capacity,
        }
    }

    pub(crate) fn acquire(&self) -> Arc<Record<V, E>> {
        match self.free.lock().pop() {
            Some(record) => record,
            None => Arc::new(Record::new()),
        }
    }

    /// Resets `record` and keeps it for reuse, provided nothing else can
    /// still reach it and the pool has room.
    pub(crate) fn recycle(&self, record: &mut Arc<Record<V, E>>) {
        if self.capacity == 0 {
            return;
        }
        let Some(inner) = Arc::get_mut(record) else {
            trace!("record still referenced, not recycled");
            return;
        };
        inner.reset();
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(Arc::clone(record));
            trace!(idle = free.len(), "record recycled");
        }
    }

    /// Number of records waiting for reuse.
    pub(crate) fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

/// One caller's attachment to a record. Dropping it detaches; the last
/// detach hands the record back to the pool.
pub(crate) struct Lease<'a, V, E> {
    record: Arc<Record<V, E>>,
    pool: &'a Pool<V, E>,
}

impl<'a, V, E> Lease<'a, V, E> {
    pub(crate) fn attach(record: Arc<Record<V, E>>, pool: &'a Pool<V, E>) -> Self {
        record.attach();
        Lease { record, pool }
    }

    pub(crate) fn record(&self) -> &Arc<Record<V, E>> {
        &self.record
    }
}

impl<V, E> Drop for Lease<'_, V, E> {
    fn drop(&mut self) {
        if self.record.detach() {
            self.pool.recycle(&mut self.record);
        }
    }
}
