use crate::outcome::Outcome;
use crossbeam_channel::{Receiver, TryRecvError};

/// The result of polling a [`CallResult`] without blocking.
///
/// - [`CallStatus::Ready`] carries the outcome; the handle is now consumed.
/// - [`CallStatus::Pending`] means the executor has not replied yet; the
///   handle stays live and may be polled again.
/// - [`CallStatus::Consumed`] means the outcome was already taken by an
///   earlier [`wait`](CallResult::wait), [`try_wait`](CallResult::try_wait),
///   or [`channel`](CallResult::channel).
#[derive(Debug)]
pub enum CallStatus<T> {
    /// The outcome arrived and has been extracted.
    Ready {
        /// The outcome of the call.
        outcome: Outcome<T>,
    },
    /// No reply yet; try again later.
    Pending,
    /// The outcome was already consumed through this handle.
    Consumed,
}

/// A one-shot handle to the outcome of a
/// [`Serializer::call_async`](crate::Serializer::call_async) submission.
///
/// Exactly one consumer path succeeds over the handle's lifetime: a
/// [`wait`](Self::wait) returning `Some`, a [`try_wait`](Self::try_wait)
/// returning [`CallStatus::Ready`], or a [`channel`](Self::channel)
/// returning `Some`. After that, the handle is consumed and every method
/// reports so.
///
/// # Example
///
/// ```
/// use cohort::{Doer, Serializer};
///
/// struct Echo;
///
/// impl Doer for Echo {
///     type Item = i32;
///     type Output = i32;
///     type Final = ();
///
///     fn process(&self, item: i32) -> i32 {
///         item
///     }
///
///     fn finish(&self) {}
/// }
///
/// let serializer = Serializer::new(Echo);
/// let mut pending = serializer.call_async(7)?;
/// let outcome = pending.wait().expect("first consumer wins");
/// assert_eq!(outcome.value(), Some(7));
/// assert!(pending.wait().is_none());
/// serializer.wait()?;
/// # Ok::<(), cohort::Error>(())
/// ```
pub struct CallResult<T> {
    /// `None` once the outcome has been consumed.
    reply: Option<Receiver<Outcome<T>>>,
}

impl<T> CallResult<T> {
    pub(crate) fn new(reply: Receiver<Outcome<T>>) -> Self {
        Self { reply: Some(reply) }
    }

    /// Blocks until the outcome arrives and returns it, consuming the
    /// handle. Returns `None` if the outcome was already consumed.
    pub fn wait(&mut self) -> Option<Outcome<T>> {
        self.reply.take()?.recv().ok()
    }

    /// Polls for the outcome without blocking.
    ///
    /// Only a [`CallStatus::Ready`] return consumes the handle;
    /// [`CallStatus::Pending`] leaves it live for another poll. Not to be
    /// confused with [`CallStatus::Consumed`], which reports that the
    /// outcome is gone for good.
    pub fn try_wait(&mut self) -> CallStatus<T> {
        let Some(reply) = &self.reply else {
            return CallStatus::Consumed;
        };

        match reply.try_recv() {
            Ok(outcome) => {
                self.reply = None;
                CallStatus::Ready { outcome }
            }
            Err(TryRecvError::Empty) => CallStatus::Pending,
            Err(TryRecvError::Disconnected) => {
                self.reply = None;
                CallStatus::Consumed
            }
        }
    }

    /// Hands out the raw reply channel for external composition (e.g. a
    /// `select!` across several calls), consuming the handle: subsequent
    /// [`wait`](Self::wait) and [`try_wait`](Self::try_wait) calls report
    /// the outcome as consumed. Returns `None` if it already was.
    pub fn channel(&mut self) -> Option<Receiver<Outcome<T>>> {
        self.reply.take()
    }
}
