//! Recurring callback scheduled on an [`EventLoop`](crate::event_loop::EventLoop).
//! Adapted from the alarm-delegate design in the original source's interval
//! files; per section 9's redesign note, modeled here as one task rather
//! than a class hierarchy.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::event_loop::EventLoop;

/// A handle to a scheduled recurring callback. Dropping the handle does not
/// cancel the alarm (the background task keeps a clone); call [`cancel`]
/// explicitly, matching the library's `set`/`cancel` pair.
///
/// [`cancel`]: Alarm::cancel
pub struct Alarm {
    events: EventLoop,
    cancelled: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Alarm {
    pub(crate) fn new(events: EventLoop) -> Self {
        Self {
            events,
            cancelled: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    /// Arm with the default semantics: first fire at `now + period_ms`.
    pub fn set(&self, period_ms: u64, callback: impl FnMut() + Send + 'static) {
        self.arm(period_ms, callback)
    }

    fn arm(&self, period_ms: u64, callback: impl FnMut() + Send + 'static) {
        self.cancel();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let cancelled = self.cancelled.clone();
        cancelled.store(false, Ordering::SeqCst);
        let my_generation = self.generation.clone();
        let events = self.events.clone();
        let callback = Arc::new(Mutex::new(callback));
        let period = Duration::from_millis(period_ms.max(1));

        let handle = tokio::spawn(async move {
            tokio::time::sleep(period).await;
            loop {
                if cancelled.load(Ordering::SeqCst) || my_generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                let fired_at = std::time::Instant::now();

                let cb = callback.clone();
                events.post(Box::new(move || {
                    let mut guard = cb.lock().unwrap();
                    if let Err(_) = std::panic::catch_unwind(AssertUnwindSafe(|| (guard)())) {
                        log::error!("interval alarm callback panicked; continuing to rearm");
                    }
                }));

                if cancelled.load(Ordering::SeqCst) || my_generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                let elapsed = fired_at.elapsed();
                let wait = period.saturating_sub(elapsed);
                tokio::time::sleep(wait).await;
            }
        });

        *self.task.lock().unwrap() = Some(handle);
    }

    /// Disarm. No further callback invocations occur; an in-flight fire that
    /// has already been posted to the event loop still runs once, since
    /// cancellation and fires are serialized on the same consumer.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for Alarm {
    fn drop(&mut self) {
        self.cancel();
    }
}
