//! Fan-in serialization engine.
//!
//! Any number of threads submit items; a single executor thread applies
//! [`Doer::process`] to each, in submission order, and sends the outcome
//! back on a per-request reply channel when the caller asked for one.
//! Shutdown mirrors the worker engines: [`Serializer::wait`] retires the
//! request channel, the executor drains everything already accepted, and
//! [`Doer::finish`] produces the cached wrap-up value.

use super::call_result::CallResult;
use crate::lifecycle::Lifecycle;
use crate::outcome::{self, Outcome};
use crate::{Doer, Error, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, Once};
use std::thread;

/// Capacity of the request channel between callers and the executor.
const REQUEST_BUFFER: usize = 100;

/// One request for the executor. The reply channel, when present, has
/// capacity 1 so the executor never blocks on a slow caller.
struct DoRequest<I, T> {
    item: I,
    reply: Option<Sender<Outcome<T>>>,
}

/// Serializes calls to a [`Doer`] onto a single executor thread.
///
/// The executor starts lazily on the first successful submission. Three
/// submission modes share the same state validation:
///
/// - [`call`](Self::call) blocks until the item has been processed and
///   returns its [`Outcome`];
/// - [`call_async`](Self::call_async) returns a [`CallResult`] that can be
///   queried later;
/// - [`call_only`](Self::call_only) submits and discards the outcome.
///
/// ## Features
///
/// - ✅ Thread-safe: submissions may come from any number of threads
/// - ✅ [`Doer::process`] runs strictly in submission order, one at a time
/// - ✅ A panicking `process` is captured into the reply, never kills the
///   executor
///
/// # Example
///
/// ```
/// use cohort::{Doer, Serializer};
/// use std::sync::Mutex;
///
/// struct Log {
///     lines: Mutex<Vec<String>>,
/// }
///
/// impl Doer for Log {
///     type Item = String;
///     type Output = usize;
///     type Final = Vec<String>;
///
///     fn process(&self, line: String) -> usize {
///         let mut lines = self.lines.lock().unwrap();
///         lines.push(line);
///         lines.len()
///     }
///
///     fn finish(&self) -> Vec<String> {
///         self.lines.lock().unwrap().clone()
///     }
/// }
///
/// let serializer = Serializer::new(Log { lines: Mutex::new(Vec::new()) });
/// let first = serializer.call("a".into())?;
/// assert_eq!(first.value(), Some(1));
/// serializer.call_only("b".into())?;
/// assert_eq!(serializer.wait()?, vec!["a".to_string(), "b".to_string()]);
/// # Ok::<(), cohort::Error>(())
/// ```
pub struct Serializer<D: Doer> {
    doer: Arc<D>,
    core: Mutex<Core<D>>,
    /// Guards the terminal callback: at most one invocation ever, even when
    /// it panics (the `Once` is then poisoned and later waiters panic
    /// instead of re-invoking it).
    once: Once,
}

/// Submitter-facing state, guarded by the engine mutex.
struct Core<D: Doer> {
    state: Lifecycle,
    request: Option<Sender<DoRequest<D::Item, D::Output>>>,
    done: Option<Receiver<bool>>,
    cached: Option<D::Final>,
}

impl<D> Serializer<D>
where
    D: Doer + Send + Sync + 'static,
    D::Item: Send + 'static,
    D::Output: Send + 'static,
    D::Final: Clone + Send,
{
    /// Constructs a serializer wrapping `doer`.
    pub fn new(doer: D) -> Self {
        Self {
            doer: Arc::new(doer),
            core: Mutex::new(Core {
                state: Lifecycle::New,
                request: None,
                done: None,
                cached: None,
            }),
            once: Once::new(),
        }
    }

    /// Submits an item and blocks until [`Doer::process`] has run it,
    /// returning the outcome.
    ///
    /// Fails with [`Error::Closed`] once [`wait`](Self::wait) has shut the
    /// serializer down.
    pub fn call(&self, item: D::Item) -> Result<Outcome<D::Output>> {
        let reply = {
            let mut core = self.core.lock()?;
            self.submit(&mut core, item, true)?
        };

        match reply {
            Some(reply) => reply.recv().map_err(|_| Error::Disconnected),
            None => Err(Error::Disconnected),
        }
    }

    /// Submits an item without blocking, returning a [`CallResult`] that
    /// can be queried for the outcome later.
    ///
    /// Fails with [`Error::Closed`] once [`wait`](Self::wait) has shut the
    /// serializer down.
    pub fn call_async(&self, item: D::Item) -> Result<CallResult<D::Output>> {
        let mut core = self.core.lock()?;
        let reply = self.submit(&mut core, item, true)?;
        reply.map(CallResult::new).ok_or(Error::Disconnected)
    }

    /// Submits an item whose outcome is discarded.
    ///
    /// The item still runs through the panic harness on the executor, so a
    /// panicking [`Doer::process`] goes unnoticed here by design.
    ///
    /// Fails with [`Error::Closed`] once [`wait`](Self::wait) has shut the
    /// serializer down.
    pub fn call_only(&self, item: D::Item) -> Result<()> {
        let mut core = self.core.lock()?;
        self.submit(&mut core, item, false)?;
        Ok(())
    }

    /// Shuts the serializer down and returns the wrap-up value.
    ///
    /// Retires the request channel, blocks until the executor has drained
    /// every accepted request and stopped, then invokes [`Doer::finish`]
    /// exactly once: concurrent `wait` callers collapse onto a single
    /// invocation and all observe the same cached value.
    ///
    /// # Panics
    /// If [`Doer::finish`] panics, the panic propagates to the caller and
    /// the once-guard is poisoned: later `wait` calls panic as well, without
    /// invoking `finish` a second time.
    pub fn wait(&self) -> Result<D::Final> {
        let mut core = self.core.lock()?;
        match core.state {
            Lifecycle::New => {
                core.state = Lifecycle::Closed;
                drop(core);
            }
            Lifecycle::Running => {
                core.state = Lifecycle::Closed;
                let request = core.request.take();
                let done = core.done.take();
                drop(core);

                // Dropping the sender retires the channel; the executor
                // still drains everything already buffered.
                drop(request);
                if let Some(done) = done {
                    let _ = done.recv();
                }
            }
            Lifecycle::Closed | Lifecycle::Finished => drop(core),
        }

        self.once.call_once(|| {
            let value = self.doer.finish();
            if let Ok(mut core) = self.core.lock() {
                core.cached = Some(value);
                core.state = Lifecycle::Finished;
            }
        });

        let core = self.core.lock()?;
        core.cached.clone().ok_or(Error::LockPoisoned)
    }

    /// Validates state, lazily starts the executor, and sends one request.
    /// Returns the reply receiver when one was asked for.
    fn submit(
        &self,
        core: &mut MutexGuard<'_, Core<D>>,
        item: D::Item,
        with_reply: bool,
    ) -> Result<Option<Receiver<Outcome<D::Output>>>> {
        match core.state {
            Lifecycle::New => {
                self.start(core);
                core.state = Lifecycle::Running;
            }
            Lifecycle::Running => {}
            Lifecycle::Closed | Lifecycle::Finished => return Err(Error::Closed),
        }

        let (reply_tx, reply_rx) = if with_reply {
            let (tx, rx) = bounded(1);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let request = core.request.as_ref().ok_or(Error::Disconnected)?;
        request
            .send(DoRequest {
                item,
                reply: reply_tx,
            })
            .map_err(|_| Error::Disconnected)?;

        Ok(reply_rx)
    }

    /// Spawns the executor thread and hands it the request side.
    fn start(&self, core: &mut MutexGuard<'_, Core<D>>) {
        let (request_tx, request_rx) = bounded(REQUEST_BUFFER);
        let (done_tx, done_rx) = bounded(1);

        let doer = Arc::clone(&self.doer);
        thread::spawn(move || executor_loop(doer, request_rx, done_tx));

        core.request = Some(request_tx);
        core.done = Some(done_rx);
    }
}

/// The sole executor thread: applies [`Doer::process`] to each request in
/// FIFO order through the panic harness, replies when asked to, and
/// acknowledges on the done channel once the request channel is retired.
fn executor_loop<D>(
    doer: Arc<D>,
    requests: Receiver<DoRequest<D::Item, D::Output>>,
    done: Sender<bool>,
) where
    D: Doer + Send + Sync + 'static,
    D::Item: Send + 'static,
    D::Output: Send + 'static,
{
    #[cfg(feature = "tracing")]
    tracing::trace!("executor started");

    for request in requests.iter() {
        let item_outcome = outcome::capture(|| doer.process(request.item));
        if let Some(reply) = request.reply {
            let _ = reply.send(item_outcome);
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("executor stopped");
    let _ = done.send(true);
}
