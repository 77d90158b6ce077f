use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, error, instrument, trace};

use crate::context::Context;
use crate::error::Error;
use crate::options::{OnWait, Options};
use crate::pool::{Lease, Pool};
use crate::record::Record;
use crate::signal::Signal;
use crate::termination::Termination;

/// What a caller of [`Group::work`] or [`Group::work_async`] gets back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome<V, E> {
    pub result: Result<V, Error<E>>,
    /// True if the call was shared with at least one other caller. The
    /// executing caller sees it too when someone joined while it ran.
    pub shared: bool,
}

impl<V, E> Outcome<V, E> {
    pub fn into_result(self) -> Result<V, Error<E>> {
        self.result
    }
}

/// Group represents a class of work and creates a space in which units of work
/// can be executed with duplicate suppression.
///
/// Cloning a `Group` yields another handle to the same set of in-flight calls.
pub struct Group<K, V, E> {
    inner: Arc<Inner<K, V, E>>,
}

struct Inner<K, V, E> {
    table: Mutex<HashMap<K, Arc<Record<V, E>>>>,
    pool: Pool<V, E>,
    on_wait: Option<OnWait<K>>,
}

enum Role<'a, V, E> {
    Executor(Lease<'a, V, E>),
    Waiter(Lease<'a, V, E>, Arc<Signal>),
}

impl<K, V, E> Group<K, V, E>
where
    K: Hash + Eq,
{
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options<K>) -> Self {
        Group {
            inner: Arc::new(Inner {
                table: Mutex::new(HashMap::new()),
                pool: Pool::new(options.pool_capacity),
                on_wait: options.on_wait,
            }),
        }
    }

    /// forget tells the group to stop tracking the call in flight for `key`.
    /// The next call for that key executes anew instead of joining; callers
    /// already waiting on the forgotten call still receive its outcome.
    pub fn forget<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.inner.table.lock().remove(key).is_some() {
            debug!("forgot in-flight call");
        }
    }

    /// Number of keys with a call in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.table.lock().len()
    }
}

impl<K, V, E> Group<K, V, E>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
    E: Clone,
{
    /// work executes and returns the results of the given function, making
    /// sure that only one execution is in-flight for a given key at a
    /// time. If a duplicate comes in, the duplicate caller waits for the
    /// original to complete and receives the same results.
    ///
    /// Only the executing caller's `arg` reaches `worker`. A waiter stops
    /// waiting when its `ctx` ends and then gets [`Error::Context`]. If the
    /// worker panics or calls [`exit`](crate::exit), every caller sharing the
    /// call unwinds the same way once bookkeeping is done.
    #[instrument(skip(self, ctx, arg, worker))]
    pub fn work<A, F>(&self, ctx: &Context, key: K, arg: A, worker: F) -> Outcome<V, E>
    where
        F: FnOnce(&Context, A) -> Result<V, E>,
    {
        match self.join(&key) {
            Role::Executor(lease) => {
                trace!("executing");
                let flight = Flight::new(&self.inner, &key, lease.record());
                let run = AssertUnwindSafe(|| worker(ctx, arg));
                let termination = match panic::catch_unwind(run) {
                    Ok(result) => Termination::from(result),
                    Err(payload) => Termination::from_unwind(payload),
                };
                let termination = flight.land(termination);
                Outcome {
                    shared: lease.record().is_shared(),
                    result: termination.replay().map_err(Error::Worker),
                }
            }
            Role::Waiter(lease, signal) => {
                drop(arg);
                self.before_wait(ctx, &key, &lease);
                match signal.wait_blocking(ctx) {
                    Ok(()) => replay_shared(lease.record()),
                    Err(err) => {
                        trace!(%err, "stopped waiting");
                        Outcome {
                            result: Err(err.into()),
                            shared: true,
                        }
                    }
                }
            }
        }
    }

    /// work_async is like work but the worker returns a future.
    ///
    /// Dropping the executing caller's future before the worker finishes
    /// counts as a forced exit: callers waiting on it unwind with
    /// [`ForcedExit`](crate::ForcedExit). Dropping a waiting caller's future
    /// only detaches that caller.
    ///
    /// Any executor can poll the returned future, but a waiter's deadline is
    /// only enforced inside a tokio runtime with the time driver enabled.
    #[instrument(skip(self, ctx, arg, worker))]
    pub async fn work_async<A, F, Fut>(
        &self,
        ctx: &Context,
        key: K,
        arg: A,
        worker: F,
    ) -> Outcome<V, E>
    where
        F: FnOnce(Context, A) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        match self.join(&key) {
            Role::Executor(lease) => {
                trace!("executing");
                let flight = Flight::new(&self.inner, &key, lease.record());
                let run = async { worker(ctx.clone(), arg).await };
                let termination = match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(result) => Termination::from(result),
                    Err(payload) => Termination::from_unwind(payload),
                };
                let termination = flight.land(termination);
                Outcome {
                    shared: lease.record().is_shared(),
                    result: termination.replay().map_err(Error::Worker),
                }
            }
            Role::Waiter(lease, signal) => {
                drop(arg);
                self.before_wait(ctx, &key, &lease);
                match signal.wait(ctx).await {
                    Ok(()) => replay_shared(lease.record()),
                    Err(err) => {
                        trace!(%err, "stopped waiting");
                        Outcome {
                            result: Err(err.into()),
                            shared: true,
                        }
                    }
                }
            }
        }
    }

    fn join(&self, key: &K) -> Role<'_, V, E> {
        let mut table = self.inner.table.lock();
        if let Some(record) = table.get(key) {
            let signal = record.join();
            let lease = Lease::attach(Arc::clone(record), &self.inner.pool);
            return Role::Waiter(lease, signal);
        }
        let record = self.inner.pool.acquire();
        table.insert(key.clone(), Arc::clone(&record));
        Role::Executor(Lease::attach(record, &self.inner.pool))
    }

    fn before_wait(&self, ctx: &Context, key: &K, lease: &Lease<'_, V, E>) {
        trace!(refs = lease.record().refs(), "joined in-flight call");
        if let Some(hook) = &self.inner.on_wait {
            hook(ctx, key);
        }
    }
}

fn replay_shared<V: Clone, E: Clone>(record: &Record<V, E>) -> Outcome<V, E> {
    match record.outcome() {
        Some(termination) => Outcome {
            result: termination.replay().map_err(Error::Worker),
            shared: true,
        },
        None => unreachable!("completion signal fired without an outcome"),
    }
}

impl<K, V, E> Inner<K, V, E>
where
    K: Hash + Eq,
{
    /// Records the outcome, retires the key if it still maps to `record` and
    /// wakes every waiter.
    fn land<'r>(
        &self,
        key: &K,
        record: &'r Arc<Record<V, E>>,
        termination: Termination<V, E>,
    ) -> &'r Termination<V, E> {
        let termination = record.complete(termination);
        match termination {
            Termination::Aborted(err) => error!(panic = err.message(), "worker panicked"),
            Termination::ForcedExit => debug!("worker exited without a result"),
            _ => {}
        }
        let mut table = self.table.lock();
        if table
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, record))
        {
            table.remove(key);
        }
        if let Some(signal) = record.signal() {
            signal.fire();
        }
        drop(table);
        trace!(
            outcome = termination.kind(),
            shared = record.is_shared(),
            "call completed"
        );
        termination
    }
}

/// Held by the executor while the worker runs. If it is dropped before
/// landing, the call is completed as a forced exit.
struct Flight<'a, K, V, E>
where
    K: Hash + Eq,
{
    inner: &'a Inner<K, V, E>,
    key: &'a K,
    record: &'a Arc<Record<V, E>>,
    landed: bool,
}

impl<'a, K, V, E> Flight<'a, K, V, E>
where
    K: Hash + Eq,
{
    fn new(inner: &'a Inner<K, V, E>, key: &'a K, record: &'a Arc<Record<V, E>>) -> Self {
        Flight {
            inner,
            key,
            record,
            landed: false,
        }
    }

    fn land(mut self, termination: Termination<V, E>) -> &'a Termination<V, E> {
        self.landed = true;
        self.inner.land(self.key, self.record, termination)
    }
}

impl<K, V, E> Drop for Flight<'_, K, V, E>
where
    K: Hash + Eq,
{
    fn drop(&mut self) {
        if !self.landed {
            debug!("executor dropped before its worker finished");
            self.inner.land(self.key, self.record, Termination::ForcedExit);
        }
    }
}

impl<K, V, E> Clone for Group<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V, E> Default for Group<K, V, E>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> fmt::Debug for Group<K, V, E>
where
    K: Hash + Eq,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("in_flight", &self.in_flight())
            .field("idle_records", &self.inner.pool.idle())
            .finish()
    }
}
