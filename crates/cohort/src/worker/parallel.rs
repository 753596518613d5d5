//! Multi-threaded worker engine.
//!
//! Submitters hand items to a dedicated coordinator thread over a buffered
//! submission channel. The coordinator owns an unbounded FIFO queue and a
//! pool of worker threads: queued items are dispatched over a rendezvous
//! work channel to whichever worker is free, outcomes come back on a
//! buffered results channel, and each outcome is folded by
//! [`Runner::integrate`] on the coordinator thread itself. Shutdown is a
//! graceful drain: [`ParallelWorker::wait`] sends a done marker, the
//! coordinator stops accepting submissions, works off everything in flight,
//! retires the pool, and acknowledges on the done channel.

use crate::lifecycle::Lifecycle;
use crate::outcome::{self, Outcome};
use crate::{Error, Result, Runner, Worker};
use crossbeam_channel::{bounded, Receiver, Select, Sender};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, Once};
use std::thread;

/// Capacity of the submission channel between callers and the coordinator.
const SUBMIT_BUFFER: usize = 16;

/// Control items flowing from submitters to the coordinator.
enum Submission<I> {
    Item(I),
    Done,
}

/// Replies flowing from the worker pool back to the coordinator. Each worker
/// sends one `Done` marker when it exits.
enum WorkerReply<T> {
    Outcome(Outcome<T>),
    Done,
}

/// A [`Worker`] backed by a coordinator thread and a pool of worker threads.
///
/// Background machinery starts lazily on the first successful
/// [`call`](Self::call); an engine that is only ever
/// [`wait`](Self::wait)ed on spawns no threads at all.
///
/// ## Features
///
/// - ✅ Thread-safe: any number of threads may `call` and `wait`
/// - ✅ [`Runner::run`] executes in parallel across the pool
/// - ✅ [`Runner::integrate`] is serialized on the coordinator and may
///   re-submit items re-entrantly through the handle it receives
///
/// ## See Also
/// - [`SynchronousWorker`]
///
/// # Example
///
/// ```
/// use cohort::{Outcome, ParallelWorker, Runner, Worker};
/// use std::sync::atomic::{AtomicI64, Ordering};
///
/// struct SquareSum {
///     total: AtomicI64,
/// }
///
/// impl Runner for SquareSum {
///     type Item = i64;
///     type Output = i64;
///     type Final = i64;
///
///     fn run(&self, item: i64) -> i64 {
///         item * item
///     }
///
///     fn integrate(&self, _worker: &dyn Worker<i64, i64>, outcome: Outcome<i64>) {
///         if let Some(value) = outcome.value() {
///             self.total.fetch_add(value, Ordering::Relaxed);
///         }
///     }
///
///     fn result(&self) -> i64 {
///         self.total.load(Ordering::Relaxed)
///     }
/// }
///
/// let worker = ParallelWorker::new(SquareSum { total: AtomicI64::new(0) }, 4);
/// for n in 1..=5 {
///     worker.call(n)?;
/// }
/// assert_eq!(worker.wait()?, 55);
/// # Ok::<(), cohort::Error>(())
/// ```
///
/// [`SynchronousWorker`]: crate::SynchronousWorker
pub struct ParallelWorker<R: Runner> {
    runner: Arc<R>,
    workers: usize,
    core: Mutex<Core<R>>,
    /// Guards the terminal callback: at most one invocation ever, even when
    /// it panics (the `Once` is then poisoned and later waiters panic
    /// instead of re-invoking it).
    once: Once,
}

/// Submitter-facing state, guarded by the engine mutex.
struct Core<R: Runner> {
    state: Lifecycle,
    submit: Option<Sender<Submission<R::Item>>>,
    done: Option<Receiver<bool>>,
    cached: Option<R::Final>,
}

impl<R> ParallelWorker<R>
where
    R: Runner + Send + Sync + 'static,
    R::Item: Send + 'static,
    R::Output: Send + 'static,
    R::Final: Clone + Send,
{
    /// Constructs a parallel worker with a pool of `workers` threads.
    ///
    /// Passing `0` selects the number of logical CPUs.
    pub fn new(runner: R, workers: usize) -> Self {
        let workers = if workers == 0 { num_cpus::get() } else { workers };
        Self {
            runner: Arc::new(runner),
            workers,
            core: Mutex::new(Core {
                state: Lifecycle::New,
                submit: None,
                done: None,
                cached: None,
            }),
            once: Once::new(),
        }
    }

    /// Submits an item for processing by [`Runner::run`].
    ///
    /// The first successful call starts the coordinator and the worker
    /// pool. A successful return means the item was accepted, not that it
    /// has been processed. Fails with [`Error::Closed`] once
    /// [`wait`](Self::wait) has shut the engine down.
    pub fn call(&self, item: R::Item) -> Result<()> {
        let mut core = self.core.lock()?;
        match core.state {
            Lifecycle::New => {
                self.start(&mut core);
                core.state = Lifecycle::Running;
            }
            Lifecycle::Running => {}
            Lifecycle::Closed | Lifecycle::Finished => return Err(Error::Closed),
        }

        let submit = core.submit.as_ref().ok_or(Error::Disconnected)?;
        submit
            .send(Submission::Item(item))
            .map_err(|_| Error::Disconnected)
    }

    /// Shuts the engine down and returns the final result.
    ///
    /// Blocks until every accepted item has been run and integrated and the
    /// pool has stopped, then invokes [`Runner::result`] exactly once:
    /// concurrent `wait` callers collapse onto a single invocation and all
    /// observe the same cached value.
    ///
    /// # Panics
    /// If [`Runner::result`] panics, the panic propagates to the caller and
    /// the once-guard is poisoned: later `wait` calls panic as well, without
    /// invoking `result` a second time.
    pub fn wait(&self) -> Result<R::Final> {
        let mut core = self.core.lock()?;
        match core.state {
            Lifecycle::New => {
                core.state = Lifecycle::Closed;
                drop(core);
            }
            Lifecycle::Running => {
                core.state = Lifecycle::Closed;
                let submit = core.submit.take();
                let done = core.done.take();
                drop(core);

                if let Some(submit) = submit {
                    let _ = submit.send(Submission::Done);
                }
                if let Some(done) = done {
                    let _ = done.recv();
                }
            }
            Lifecycle::Closed | Lifecycle::Finished => drop(core),
        }

        self.once.call_once(|| {
            let value = self.runner.result();
            if let Ok(mut core) = self.core.lock() {
                core.cached = Some(value);
                core.state = Lifecycle::Finished;
            }
        });

        let core = self.core.lock()?;
        core.cached.clone().ok_or(Error::LockPoisoned)
    }

    /// Spawns the coordinator thread and hands it the submission side.
    fn start(&self, core: &mut Core<R>) {
        let (submit_tx, submit_rx) = bounded(SUBMIT_BUFFER);
        let (done_tx, done_rx) = bounded(1);

        let runner = Arc::clone(&self.runner);
        let workers = self.workers;
        thread::spawn(move || Coordinator::new(runner, workers, submit_rx, done_tx).run());

        core.submit = Some(submit_tx);
        core.done = Some(done_rx);
    }
}

impl<R> Worker<R::Item, R::Final> for ParallelWorker<R>
where
    R: Runner + Send + Sync + 'static,
    R::Item: Send + 'static,
    R::Output: Send + 'static,
    R::Final: Clone + Send,
{
    fn call(&self, item: R::Item) -> Result<()> {
        ParallelWorker::call(self, item)
    }

    fn wait(&self) -> Result<R::Final> {
        ParallelWorker::wait(self)
    }
}

/// The coordinator: sole owner of the pending-item queue, sole caller of
/// [`Runner::integrate`].
struct Coordinator<R: Runner> {
    runner: Arc<R>,
    /// Pending items. A `RefCell` so the handle passed to `integrate` can
    /// append while the coordinator is mid-iteration; only this thread ever
    /// touches it.
    queue: RefCell<VecDeque<R::Item>>,
    submit: Receiver<Submission<R::Item>>,
    work: Option<Sender<R::Item>>,
    results: Receiver<WorkerReply<R::Output>>,
    done: Sender<bool>,
    exiting: bool,
    /// Live worker threads.
    count: usize,
    /// Items dispatched to the pool whose outcomes are not yet integrated.
    waiting: usize,
}

impl<R> Coordinator<R>
where
    R: Runner + Send + Sync + 'static,
    R::Item: Send + 'static,
    R::Output: Send + 'static,
{
    fn new(
        runner: Arc<R>,
        workers: usize,
        submit: Receiver<Submission<R::Item>>,
        done: Sender<bool>,
    ) -> Self {
        let (work_tx, work_rx) = bounded::<R::Item>(0);
        let (results_tx, results_rx) = bounded(workers);

        for id in 0..workers {
            let runner = Arc::clone(&runner);
            let work = work_rx.clone();
            let results = results_tx.clone();
            thread::spawn(move || worker_loop(id, runner, work, results));
        }

        Self {
            runner,
            queue: RefCell::new(VecDeque::new()),
            submit,
            work: Some(work_tx),
            results: results_rx,
            done,
            exiting: false,
            count: workers,
            waiting: 0,
        }
    }

    fn run(mut self) {
        #[cfg(feature = "tracing")]
        tracing::trace!(workers = self.count, "coordinator started");

        loop {
            if self.exiting && self.waiting == 0 && self.queue.borrow().is_empty() {
                // Nothing is in flight, so integrate cannot re-submit;
                // dropping the work sender retires the pool.
                if self.work.take().is_some() {
                    continue;
                }
                if self.count == 0 {
                    break;
                }
            }
            self.select_one();
        }

        #[cfg(feature = "tracing")]
        tracing::trace!("coordinator stopped");
        let _ = self.done.send(true);
    }

    /// Performs exactly one channel operation, chosen fairly among whichever
    /// of the three arms are ready: receive a submission, dispatch the queue
    /// front to a free worker, or receive a worker reply.
    fn select_one(&mut self) {
        let mut sel = Select::new();
        let submit_op = if self.exiting {
            None
        } else {
            Some(sel.recv(&self.submit))
        };
        let work_op = match &self.work {
            Some(work) if !self.queue.borrow().is_empty() => Some(sel.send(work)),
            _ => None,
        };
        let results_op = sel.recv(&self.results);

        let oper = sel.select();
        let index = oper.index();

        if Some(index) == submit_op {
            match oper.recv(&self.submit) {
                Ok(Submission::Item(item)) => self.queue.borrow_mut().push_back(item),
                // Disconnect means every submitter is gone; treat it like a
                // done marker and drain.
                Ok(Submission::Done) | Err(_) => self.exiting = true,
            }
        } else if Some(index) == work_op {
            if let Some(work) = &self.work {
                let item = self.queue.borrow_mut().pop_front();
                if let Some(item) = item {
                    match oper.send(work, item) {
                        Ok(()) => self.waiting += 1,
                        Err(err) => self.queue.borrow_mut().push_front(err.into_inner()),
                    }
                }
            }
        } else if index == results_op {
            match oper.recv(&self.results) {
                Ok(WorkerReply::Outcome(item_outcome)) => {
                    let handle = CoordinatorHandle {
                        queue: &self.queue,
                        _final: PhantomData,
                    };
                    self.runner.integrate(&handle, item_outcome);
                    self.waiting -= 1;
                }
                Ok(WorkerReply::Done) | Err(_) => self.count = self.count.saturating_sub(1),
            }
        }
    }
}

/// The handle passed to [`Runner::integrate`] by the parallel engine.
///
/// Its `call` appends directly to the coordinator's queue; `integrate` runs
/// on the coordinator thread, which owns the queue exclusively. The handle
/// lives only for the duration of one `integrate` call.
struct CoordinatorHandle<'a, I, F> {
    queue: &'a RefCell<VecDeque<I>>,
    _final: PhantomData<F>,
}

impl<I, F> Worker<I, F> for CoordinatorHandle<'_, I, F> {
    fn call(&self, item: I) -> Result<()> {
        self.queue.borrow_mut().push_back(item);
        Ok(())
    }

    fn wait(&self) -> Result<F> {
        Err(Error::WouldDeadlock)
    }
}

/// One pool thread: runs items through the panic harness until the work
/// channel is retired, then reports a done marker and exits.
fn worker_loop<R>(
    _id: usize,
    runner: Arc<R>,
    work: Receiver<R::Item>,
    results: Sender<WorkerReply<R::Output>>,
) where
    R: Runner + Send + Sync + 'static,
    R::Item: Send + 'static,
    R::Output: Send + 'static,
{
    #[cfg(feature = "tracing")]
    tracing::trace!("worker {_id} started");

    for item in work.iter() {
        let item_outcome = outcome::capture(|| runner.run(item));
        if results.send(WorkerReply::Outcome(item_outcome)).is_err() {
            return;
        }
    }

    let _ = results.send(WorkerReply::Done);

    #[cfg(feature = "tracing")]
    tracing::trace!("worker {_id} stopped");
}
