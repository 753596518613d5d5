use crate::{Outcome, Result};

/// The work to be done by a worker engine.
///
/// A worker is instantiated by passing it a `Runner`, which it uses to
/// process submitted items: [`run`] transforms each item, [`integrate`]
/// folds the outcomes together, and [`result`] reports the accumulated
/// value once the engine is drained.
///
/// All three methods take `&self`; state accumulated by `integrate` lives
/// behind interior mutability (a `Cell` is enough for the synchronous
/// worker, an atomic or `Mutex` for the parallel one). The engines
/// guarantee that `integrate` invocations are totally ordered and that
/// `result` happens after the last of them, so the accumulator is never
/// accessed concurrently.
///
/// [`run`]: Runner::run
/// [`integrate`]: Runner::integrate
/// [`result`]: Runner::result
pub trait Runner {
    /// The type of item submitted through [`Worker::call`].
    type Item;
    /// The type produced by [`run`](Runner::run) for each item.
    type Output;
    /// The type of the final accumulated value returned by
    /// [`wait`](Worker::wait).
    type Final;

    /// Processes one submitted item.
    ///
    /// On the parallel worker this may be called from any number of worker
    /// threads at once, so any resources it touches must be accessed in a
    /// thread-safe fashion. It must not call [`Worker::call`] on its own
    /// engine; return follow-up items from here and submit them from
    /// [`integrate`](Runner::integrate) instead.
    fn run(&self, item: Self::Item) -> Self::Output;

    /// Folds one [`run`](Runner::run) outcome into the accumulated state.
    ///
    /// Invocations are serialized on a single thread and must not block.
    /// The `worker` handle may be used to submit additional items, even
    /// after [`Worker::wait`] has been called; calling
    /// [`wait`](Worker::wait) on it fails with
    /// [`Error::WouldDeadlock`](crate::Error::WouldDeadlock). A panic in
    /// [`run`](Runner::run) arrives here as [`Outcome::Panicked`].
    fn integrate(&self, worker: &dyn Worker<Self::Item, Self::Final>, outcome: Outcome<Self::Output>);

    /// Reports the final accumulated value.
    ///
    /// Called exactly once per engine, by [`Worker::wait`], after every
    /// worker thread has stopped and every outcome has been integrated.
    /// The value is cached to satisfy later `wait` calls.
    fn result(&self) -> Self::Final;
}

/// A worker engine: submit items with [`call`], drain and collect with
/// [`wait`].
///
/// Implemented by [`SynchronousWorker`] and [`ParallelWorker`], and by the
/// coordinator-scoped handle passed to [`Runner::integrate`].
///
/// [`call`]: Worker::call
/// [`wait`]: Worker::wait
/// [`SynchronousWorker`]: crate::SynchronousWorker
/// [`ParallelWorker`]: crate::ParallelWorker
pub trait Worker<I, F> {
    /// Submits an item for processing by [`Runner::run`].
    ///
    /// A successful return means the item was accepted, not that it has
    /// been processed. Fails with [`Error::Closed`](crate::Error::Closed)
    /// once the engine has been shut down by [`wait`](Worker::wait).
    fn call(&self, item: I) -> Result<()>;

    /// Shuts the engine down and returns the final result.
    ///
    /// Blocks until every submitted item has been processed and every
    /// worker thread has stopped, then invokes [`Runner::result`] exactly
    /// once and caches its value for later `wait` calls. Calling `wait`
    /// before any `call` moves the engine straight to its stopped state.
    fn wait(&self) -> Result<F>;
}
