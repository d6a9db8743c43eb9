//! Append-only trace stream.
//!
//! A [`TraceRecorder`] is the single place every task in a simulation run
//! writes `(thread_label, virtual_time, event)` triples to. It is generic
//! over the event type so that `offsim-head` and `offsim-tail` can each
//! define their own trace event enum without this crate knowing anything
//! about head or tail protocol semantics; [`crate::channel::MpTraceEvent`]
//! is the one piece of vocabulary shared between them, via `From`.

use crate::clock::VirtualTime;
use parking_lot::Mutex;
use std::sync::Arc;

/// One entry in the trace: which task recorded it, when (in virtual time),
/// and what happened.
#[derive(Debug, Clone)]
pub struct TraceRecord<E> {
    pub thread: String,
    pub time: VirtualTime,
    pub event: E,
}

/// Thread-safe (in the Send/Sync sense only — the simulator itself is
/// single-threaded) append-only log, cheaply cloneable so every task can
/// hold a handle to the same underlying stream.
pub struct TraceRecorder<E> {
    inner: Arc<Mutex<Vec<TraceRecord<E>>>>,
}

impl<E> TraceRecorder<E> {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn record(&self, thread: impl Into<String>, time: VirtualTime, event: E) {
        self.inner.lock().push(TraceRecord { thread: thread.into(), time, event });
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<E: Clone> TraceRecorder<E> {
    /// Snapshots the trace recorded so far, in recording order.
    pub fn events(&self) -> Vec<TraceRecord<E>> {
        self.inner.lock().clone()
    }
}

impl<E> Default for TraceRecorder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for TraceRecorder<E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_preserve_insertion_order() {
        let trace: TraceRecorder<&'static str> = TraceRecorder::new();
        trace.record("a", VirtualTime::from_micros(10), "first");
        trace.record("b", VirtualTime::from_micros(5), "second");
        let events = trace.events();
        assert_eq!(events[0].event, "first");
        assert_eq!(events[1].event, "second");
    }
}
