use crate::{CallStatus, Doer, Error, Serializer};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// Records each processed item and echoes it back, counting `finish` calls
/// on a counter shared with the test.
struct Recorder {
    log: Mutex<Vec<String>>,
    finish_calls: Arc<AtomicUsize>,
}

impl Recorder {
    fn new() -> Self {
        Self::with_counter(Arc::new(AtomicUsize::new(0)))
    }

    fn with_counter(finish_calls: Arc<AtomicUsize>) -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            finish_calls,
        }
    }
}

impl Doer for Recorder {
    type Item = String;
    type Output = String;
    type Final = Vec<String>;

    fn process(&self, item: String) -> String {
        self.log.lock().unwrap().push(item.clone());
        item
    }

    fn finish(&self) -> Vec<String> {
        self.finish_calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().clone()
    }
}

/// Blocks inside `process` until the test opens the gate.
struct Gated {
    gate: crossbeam_channel::Receiver<()>,
}

impl Doer for Gated {
    type Item = i32;
    type Output = i32;
    type Final = ();

    fn process(&self, item: i32) -> i32 {
        let _ = self.gate.recv();
        item
    }

    fn finish(&self) {}
}

/// Panics in `process` for one designated item.
struct PanicOn {
    bad: i32,
    processed: AtomicUsize,
}

impl Doer for PanicOn {
    type Item = i32;
    type Output = i32;
    type Final = usize;

    fn process(&self, item: i32) -> i32 {
        self.processed.fetch_add(1, Ordering::SeqCst);
        if item == self.bad {
            panic!("kaboom");
        }
        item
    }

    fn finish(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }
}

/// Panics in `finish`, counting its invocations on a counter shared with
/// the test.
struct PanicOnFinish {
    calls: Arc<AtomicUsize>,
}

impl Doer for PanicOnFinish {
    type Item = i32;
    type Output = i32;
    type Final = i32;

    fn process(&self, item: i32) -> i32 {
        item
    }

    fn finish(&self) -> i32 {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("finish boom");
    }
}

#[test]
fn sequential_calls_process_in_order() {
    let serializer = Serializer::new(Recorder::new());

    for item in ["a", "b", "c"] {
        let outcome = serializer.call(item.to_owned()).unwrap();
        assert_eq!(outcome.value(), Some(item.to_owned()));
    }

    assert_eq!(
        serializer.wait(),
        Ok(vec!["a".to_owned(), "b".to_owned(), "c".to_owned()])
    );
}

#[test]
fn threaded_calls_each_process_exactly_once() {
    let serializer = Serializer::new(Recorder::new());

    thread::scope(|s| {
        let serializer = &serializer;
        for item in ["a", "b", "c"] {
            s.spawn(move || {
                let outcome = serializer.call(item.to_owned()).unwrap();
                assert_eq!(outcome.value(), Some(item.to_owned()));
            });
        }
    });

    let mut log = serializer.wait().unwrap();
    log.sort();
    assert_eq!(log, vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]);
}

#[test]
fn call_only_preserves_submission_order() {
    let serializer = Serializer::new(Recorder::new());

    for n in 0..10 {
        serializer.call_only(n.to_string()).unwrap();
    }

    let expected: Vec<_> = (0..10).map(|n| n.to_string()).collect();
    assert_eq!(serializer.wait(), Ok(expected));
}

#[test]
fn wait_drains_buffered_requests_before_finishing() {
    let serializer = Serializer::new(Recorder::new());

    for n in 0..50 {
        serializer.call_only(n.to_string()).unwrap();
    }

    assert_eq!(serializer.wait().unwrap().len(), 50);
}

#[test]
fn call_async_resolves_to_the_reply() {
    let serializer = Serializer::new(Recorder::new());

    let mut pending = serializer.call_async("a".to_owned()).unwrap();

    let outcome = pending.wait().expect("outcome not yet consumed");
    assert_eq!(outcome.value(), Some("a".to_owned()));
    assert!(pending.wait().is_none());

    serializer.wait().unwrap();
}

#[test]
fn try_wait_reports_pending_until_the_reply_arrives() {
    let (open, gate) = crossbeam_channel::bounded(1);
    let serializer = Serializer::new(Gated { gate });

    let mut pending = serializer.call_async(7).unwrap();
    assert!(matches!(pending.try_wait(), CallStatus::Pending));
    assert!(matches!(pending.try_wait(), CallStatus::Pending));

    open.send(()).unwrap();
    let outcome = loop {
        match pending.try_wait() {
            CallStatus::Ready { outcome } => break outcome,
            CallStatus::Pending => thread::yield_now(),
            CallStatus::Consumed => panic!("outcome consumed without a reader"),
        }
    };
    assert_eq!(outcome.value(), Some(7));
    assert!(matches!(pending.try_wait(), CallStatus::Consumed));

    serializer.wait().unwrap();
}

#[test]
fn channel_hands_over_the_reply() {
    let serializer = Serializer::new(Recorder::new());

    let mut pending = serializer.call_async("a".to_owned()).unwrap();
    let reply = pending.channel().expect("first take wins");

    assert_eq!(reply.recv().unwrap().value(), Some("a".to_owned()));
    assert!(pending.channel().is_none());
    assert!(pending.wait().is_none());

    serializer.wait().unwrap();
}

#[test]
fn panic_in_process_is_captured_and_isolated() {
    let serializer = Serializer::new(PanicOn {
        bad: 2,
        processed: AtomicUsize::new(0),
    });

    assert_eq!(serializer.call(1).unwrap().value(), Some(1));

    let boom = serializer.call(2).unwrap();
    assert!(boom.is_panicked());
    assert_eq!(boom.panic_message(), Some("kaboom"));

    // The executor survived the panic and keeps serving.
    assert_eq!(serializer.call(3).unwrap().value(), Some(3));

    assert_eq!(serializer.wait(), Ok(3));
}

#[test]
fn submissions_after_wait_are_rejected() {
    let finish_calls = Arc::new(AtomicUsize::new(0));
    let serializer = Serializer::new(Recorder::with_counter(Arc::clone(&finish_calls)));

    serializer.call_only("a".to_owned()).unwrap();
    assert_eq!(serializer.wait(), Ok(vec!["a".to_owned()]));

    assert_eq!(serializer.call("b".to_owned()).unwrap_err(), Error::Closed);
    assert!(matches!(
        serializer.call_async("c".to_owned()),
        Err(Error::Closed)
    ));
    assert_eq!(serializer.call_only("d".to_owned()), Err(Error::Closed));

    // The rejected items left no trace, and finish ran once.
    assert_eq!(serializer.wait(), Ok(vec!["a".to_owned()]));
    assert_eq!(finish_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn panicking_finish_is_invoked_at_most_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let serializer = Serializer::new(PanicOnFinish {
        calls: Arc::clone(&calls),
    });
    serializer.call_only(1).unwrap();

    assert!(panic::catch_unwind(AssertUnwindSafe(|| serializer.wait())).is_err());
    // The poisoned once-guard panics again instead of re-invoking finish.
    assert!(panic::catch_unwind(AssertUnwindSafe(|| serializer.wait())).is_err());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn wait_without_calls_goes_straight_to_finish() {
    let serializer = Serializer::new(Recorder::new());

    assert_eq!(serializer.wait(), Ok(Vec::new()));
    assert_eq!(serializer.call_only("a".to_owned()), Err(Error::Closed));
}

#[test]
fn concurrent_waits_collapse_to_one_finish_call() {
    let finish_calls = Arc::new(AtomicUsize::new(0));
    let serializer = Serializer::new(Recorder::with_counter(Arc::clone(&finish_calls)));
    serializer.call_only("a".to_owned()).unwrap();

    thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| serializer.wait().unwrap()))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), vec!["a".to_owned()]);
        }
    });

    assert_eq!(finish_calls.load(Ordering::SeqCst), 1);
}
