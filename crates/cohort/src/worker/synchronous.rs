use crate::lifecycle::Lifecycle;
use crate::outcome;
use crate::{Error, Result, Runner, Worker};
use std::cell::RefCell;
use std::collections::VecDeque;

/// A [`Worker`] that operates entirely on the calling thread.
///
/// No background threads are involved: each [`call`](Self::call) drains the
/// work queue in-line, alternating [`Runner::run`] and [`Runner::integrate`]
/// until the queue is empty. Items submitted by `integrate` re-entrantly are
/// worked by the same drain loop.
///
/// ## Features
///
/// - ❌ No parallelism
/// - ✅ Deterministic, submission-ordered processing
/// - ✅ Accepts `!Send` runners and items
///
/// ## Recommended When
///
/// - You are adapting an existing single-threaded algorithm and want the
///   parallelization to be optional
/// - Ordering matters for certain invocations
///
/// ## See Also
/// - [`ParallelWorker`]
///
/// # Example
///
/// ```
/// use cohort::{Outcome, Runner, SynchronousWorker, Worker};
/// use std::cell::Cell;
///
/// struct Summer {
///     total: Cell<i64>,
/// }
///
/// impl Runner for Summer {
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
///             self.total.set(self.total.get() + value);
///         }
///     }
///
///     fn result(&self) -> i64 {
///         self.total.get()
///     }
/// }
///
/// let worker = SynchronousWorker::new(Summer { total: Cell::new(0) });
/// for n in 1..=5 {
///     worker.call(n)?;
/// }
/// assert_eq!(worker.wait()?, 55);
/// # Ok::<(), cohort::Error>(())
/// ```
///
/// [`ParallelWorker`]: crate::ParallelWorker
pub struct SynchronousWorker<R: Runner> {
    runner: R,
    core: RefCell<Core<R>>,
}

struct Core<R: Runner> {
    state: Lifecycle,
    queue: VecDeque<R::Item>,
    /// Set while a `call` is draining the queue; re-entrant submissions
    /// observe it and leave the work to the outer drain loop.
    running: bool,
    /// Set before the terminal callback runs; together with an empty
    /// `cached` it marks a worker poisoned by a panicking `result`.
    attempted: bool,
    cached: Option<R::Final>,
}

impl<R: Runner> SynchronousWorker<R> {
    /// Constructs a synchronous worker around `runner`.
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            core: RefCell::new(Core {
                state: Lifecycle::New,
                queue: VecDeque::new(),
                running: false,
                attempted: false,
                cached: None,
            }),
        }
    }
}

impl<R> SynchronousWorker<R>
where
    R: Runner,
    R::Final: Clone,
{
    /// Submits an item and, unless called re-entrantly from `integrate`,
    /// drains the queue before returning.
    ///
    /// Fails with [`Error::Closed`] after [`wait`](Self::wait) has shut the
    /// worker down.
    pub fn call(&self, item: R::Item) -> Result<()> {
        {
            let mut core = self.core.borrow_mut();
            match core.state {
                Lifecycle::New => core.state = Lifecycle::Running,
                // Accept re-entrant calls even when closed, so the drain
                // loop works every item.
                Lifecycle::Closed | Lifecycle::Finished if !core.running => {
                    return Err(Error::Closed);
                }
                _ => {}
            }

            core.queue.push_back(item);

            // Re-entrant submission: the outer call owns the drain loop.
            if core.running {
                return Ok(());
            }
            core.running = true;
        }

        self.drain();
        self.core.borrow_mut().running = false;

        Ok(())
    }

    /// Shuts the worker down and returns the final result.
    ///
    /// Invokes [`Runner::result`] on the first call and caches its value for
    /// later ones. Fails with [`Error::WouldDeadlock`] when invoked from
    /// inside [`Runner::integrate`], leaving the worker state untouched.
    ///
    /// # Panics
    /// If [`Runner::result`] panics, the panic propagates to the caller and
    /// the worker is poisoned: later `wait` calls panic as well, without
    /// invoking `result` a second time.
    pub fn wait(&self) -> Result<R::Final> {
        if self.core.borrow().running {
            return Err(Error::WouldDeadlock);
        }

        if let Some(cached) = self.core.borrow().cached.clone() {
            return Ok(cached);
        }

        // Mark the terminal callback attempted before running it, so a
        // panicking `result` can never be re-invoked.
        {
            let mut core = self.core.borrow_mut();
            if core.attempted {
                panic!("terminal callback panicked on an earlier wait");
            }
            core.attempted = true;
        }

        let value = self.runner.result();
        let mut core = self.core.borrow_mut();
        core.cached = Some(value.clone());
        core.state = Lifecycle::Finished;
        Ok(value)
    }

    /// Works items off the queue until it is empty, including any appended
    /// re-entrantly by `integrate`. No `RefCell` borrow is held while user
    /// callbacks run.
    fn drain(&self) {
        loop {
            let item = self.core.borrow_mut().queue.pop_front();
            let Some(item) = item else { break };

            let outcome = outcome::capture(|| self.runner.run(item));
            self.runner.integrate(self, outcome);
        }
    }
}

impl<R> Worker<R::Item, R::Final> for SynchronousWorker<R>
where
    R: Runner,
    R::Final: Clone,
{
    fn call(&self, item: R::Item) -> Result<()> {
        SynchronousWorker::call(self, item)
    }

    fn wait(&self) -> Result<R::Final> {
        SynchronousWorker::wait(self)
    }
}
