//! Single-threaded driver for callbacks: the clock, the alarm factory, and
//! the `run_once`/`run_until` pump that every endpoint blocks on.
//!
//! The teacher wraps `quinn`'s already-async endpoint directly; `quinn`
//! itself is driven by tokio's scheduler, which happily runs unrelated tasks
//! concurrently. Section 5's invariant that "all user callbacks for a given
//! endpoint run on the same event-loop task" does not hold for granted under
//! that model, so this adapter funnels every callback — alarm fires, stream
//! reads, datagram reads, session notifications — through one channel and
//! drains it from a single consumer. Spawned tasks do the async waiting
//! (sleeping, reading off a `quinn` stream); they never call user code
//! directly, they only enqueue a closure for the consumer to run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::alarm::Alarm;

/// A unit of work destined for the event-loop thread. Boxed so the channel
/// can carry arbitrary callback invocations uniformly.
type Event = Box<dyn FnOnce() + Send>;

/// Owns the clock and the callback queue for one endpoint (client or
/// server). Cloning shares the same queue, so alarms and stream/session
/// plumbing created from clones still serialize through one consumer.
#[derive(Clone)]
pub struct EventLoop {
    start: Instant,
    tx: mpsc::UnboundedSender<Event>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Event>>>,
}

impl EventLoop {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            start: Instant::now(),
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }

    /// Monotonic milliseconds since this event loop was created.
    pub fn clock(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Queue a closure to run on the event-loop thread. Used by background
    /// tasks (alarms, stream readers) that must not invoke user callbacks
    /// directly.
    pub fn post(&self, event: Event) {
        // The receiver only drops once the whole endpoint is torn down, at
        // which point nothing posts anymore; a failed send is a silent no-op.
        let _ = self.tx.send(event);
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
        self.tx.clone()
    }

    /// Create a new alarm bound to this event loop's callback queue.
    pub fn create_alarm(&self) -> Alarm {
        Alarm::new(self.clone())
    }

    /// Run at most one queued callback, waiting up to `max_wait` for one to
    /// arrive. Returns promptly if the queue is already empty and nothing
    /// shows up in time.
    pub async fn run_once(&self, max_wait: Duration) {
        let mut rx = self.rx.lock().await;
        if let Ok(Some(event)) = timeout(max_wait, rx.recv()).await {
            event();
        }
    }

    /// Pump `run_once` in ≤50ms slices until `predicate` returns true, per
    /// section 4.1's requirement that cancellation be observed promptly.
    pub async fn run_until(&self, mut predicate: impl FnMut() -> bool) {
        const POLL: Duration = Duration::from_millis(50);
        while !predicate() {
            self.run_once(POLL).await;
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}
