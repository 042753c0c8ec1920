//! Stream Adapter (component 4, section 4.4): wraps one QUIC stream,
//! exposing `send`, `on_read`, and a per-stream interval to user code.
//! Grounded on the teacher's stream wrapping in `session.rs`/`send.rs`/
//! `recv.rs`, combined with the read algorithm described in section 4.4.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as AsyncMutex;

use crate::alarm::Alarm;
use crate::error::StreamError;
use crate::event_loop::EventLoop;
use crate::recv::RecvStream;
use crate::send::SendStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Unidirectional,
    Bidirectional,
}

type ReadCallback = dyn FnMut(Vec<u8>) + Send;

/// Opaque handle identifying a stream, stable for the stream's lifetime
/// (section 9's "typed opaque handles" redesign note).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub(crate) u64);

/// Reads that arrive before `on_read` is registered are buffered, not
/// dropped: a reader task starts the instant a stream is wrapped, which can
/// race the application registering its callback (e.g. from inside a
/// session's incoming-stream notification).
struct Shared {
    on_read: StdMutex<Option<Box<ReadCallback>>>,
    pending: StdMutex<VecDeque<Vec<u8>>>,
}

/// One QUIC stream. Holds a send half, a recv half, or both depending on
/// direction and which side opened it.
pub struct StreamAdapter {
    id: StreamId,
    direction: Direction,
    events: EventLoop,
    send: AsyncMutex<Option<SendStream>>,
    shared: Arc<Shared>,
    interval: StdMutex<Option<Alarm>>,
}

impl StreamAdapter {
    pub(crate) fn new(
        id: StreamId,
        direction: Direction,
        events: EventLoop,
        send: Option<SendStream>,
        recv: Option<RecvStream>,
    ) -> Arc<Self> {
        let adapter = Arc::new(Self {
            id,
            direction,
            events: events.clone(),
            send: AsyncMutex::new(send),
            shared: Arc::new(Shared {
                on_read: StdMutex::new(None),
                pending: StdMutex::new(VecDeque::new()),
            }),
            interval: StdMutex::new(None),
        });

        if let Some(recv) = recv {
            adapter.clone().spawn_reader(recv);
        }

        adapter
    }

    fn spawn_reader(self: Arc<Self>, mut recv: RecvStream) {
        let events = self.events.clone();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            loop {
                match recv.read_next().await {
                    Ok(Some(bytes)) => {
                        let is_fin = bytes.is_empty();
                        let shared = shared.clone();
                        events.post(Box::new(move || {
                            let mut on_read = shared.on_read.lock().unwrap();
                            match on_read.as_mut() {
                                Some(cb) => cb(bytes),
                                None => shared.pending.lock().unwrap().push_back(bytes),
                            }
                        }));
                        if is_fin {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        log::warn!("stream read error: {e}");
                        return;
                    }
                }
            }
        });
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Register the read callback. Replaces any previously-registered one
    /// (section 9: callback-set-once semantics, not chained). Any reads
    /// that arrived before this call are delivered immediately, in order.
    pub fn on_read(&self, callback: impl FnMut(Vec<u8>) + Send + 'static) {
        let mut callback = Box::new(callback);
        let buffered: Vec<Vec<u8>> = self.shared.pending.lock().unwrap().drain(..).collect();
        for bytes in buffered {
            callback(bytes);
        }
        *self.shared.on_read.lock().unwrap() = Some(callback);
    }

    /// Arm a per-stream recurring interval.
    pub fn set_interval(&self, period_ms: u64, callback: impl FnMut() + Send + 'static) {
        let alarm = self.events.create_alarm();
        alarm.set(period_ms, callback);
        *self.interval.lock().unwrap() = Some(alarm);
    }

    pub fn cancel_interval(&self) {
        if let Some(alarm) = self.interval.lock().unwrap().take() {
            alarm.cancel();
        }
    }

    /// Enqueue a write. Fails with [`StreamError::WriteRefused`] if the
    /// stream has no writable half (an incoming unidirectional stream) or
    /// was stopped by the peer, and [`StreamError::Connection`] if the
    /// underlying QUIC connection itself failed.
    pub async fn send(&self, data: &[u8]) -> Result<(), StreamError> {
        let mut guard = self.send.lock().await;
        let send = guard.as_mut().ok_or(StreamError::WriteRefused)?;
        send.write_all(data).await.map_err(|e| {
            log::warn!("stream write failed: {e}");
            match e {
                crate::send::WriteError::Stopped(_) => StreamError::WriteRefused,
                crate::send::WriteError::Connection(msg) => StreamError::Connection(msg),
            }
        })
    }

    pub async fn finish(&self) -> Result<(), StreamError> {
        let mut guard = self.send.lock().await;
        if let Some(send) = guard.as_mut() {
            send.finish().await.map_err(|e| {
                log::warn!("stream finish failed: {e}");
                match e {
                    crate::send::WriteError::Stopped(_) => StreamError::WriteRefused,
                    crate::send::WriteError::Connection(msg) => StreamError::Connection(msg),
                }
            })?;
        }
        Ok(())
    }
}
