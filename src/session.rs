//! Session Adapter (component 5, section 4.5): wraps one WebTransport
//! session — datagrams, incoming/outgoing streams, the accept/reject state
//! machine, and a per-session interval. Grounded on the teacher's
//! `web-transport-quinn/src/session.rs`, in particular its background task
//! that watches the CONNECT stream for a close capsule.
//!
//! Simplification (documented, not an oversight): the real WebTransport-over-
//! HTTP/3 extension multiplexes several sessions over one HTTP/3 connection
//! and so prefixes every datagram and every stream's header with a session
//! ID. This crate's wire module (see `wire::connect`) does not implement
//! general-purpose HTTP/3, and section 1 excludes "implementing QUIC/HTTP/3
//! from scratch" — so each QUIC connection here carries exactly one
//! WebTransport session, and datagrams/streams need no session-ID framing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use crate::alarm::Alarm;
use crate::error::SessionError;
use crate::event_loop::EventLoop;
use crate::recv::RecvStream;
use crate::send::SendStream;
use crate::stream::{Direction, StreamAdapter, StreamId};
use crate::wire::capsule::Capsule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    BeforeReady,
    Ready,
    Accepted,
    Rejected,
    Closed,
}

type DatagramCallback = dyn FnMut(Vec<u8>) + Send;
type StreamCallback = dyn FnMut(Arc<Session>, Arc<StreamAdapter>, String) + Send;
type ErrorCallback = dyn FnOnce(SessionError) + Send;

struct Callbacks {
    on_datagram: StdMutex<Option<Box<DatagramCallback>>>,
    on_bidi: StdMutex<Option<Box<StreamCallback>>>,
    on_unidi: StdMutex<Option<Box<StreamCallback>>>,
    on_error: StdMutex<Option<Box<ErrorCallback>>>,
    /// Set if the session closed before `on_error` was registered, so the
    /// error isn't lost to the same race `Session::new`'s background tasks
    /// can win against the application registering its callback.
    pending_error: StdMutex<Option<SessionError>>,
}

/// A pending (not yet dispatched) incoming stream, buffered per the
/// resolution of section 9's open question: incoming-stream notifications
/// are held until the session is `Accepted`.
struct PendingStream {
    adapter: Arc<StreamAdapter>,
    direction: Direction,
}

pub struct Session {
    conn: quinn::Connection,
    connect_send: StdMutex<Option<SendStream>>,
    events: EventLoop,
    path: String,
    state: StdMutex<SessionState>,
    pending_reject: StdMutex<Option<(u32, String)>>,
    pending_streams: StdMutex<VecDeque<PendingStream>>,
    callbacks: Arc<Callbacks>,
    interval: StdMutex<Option<Alarm>>,
    next_stream_id: AtomicU64,
}

impl Session {
    pub(crate) fn new(
        conn: quinn::Connection,
        connect_send: SendStream,
        connect_recv: RecvStream,
        path: String,
        events: EventLoop,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            conn: conn.clone(),
            connect_send: StdMutex::new(Some(connect_send)),
            events: events.clone(),
            path,
            state: StdMutex::new(SessionState::BeforeReady),
            pending_reject: StdMutex::new(None),
            pending_streams: StdMutex::new(VecDeque::new()),
            callbacks: Arc::new(Callbacks {
                on_datagram: StdMutex::new(None),
                on_bidi: StdMutex::new(None),
                on_unidi: StdMutex::new(None),
                on_error: StdMutex::new(None),
                pending_error: StdMutex::new(None),
            }),
            interval: StdMutex::new(None),
            next_stream_id: AtomicU64::new(0),
        });

        session.clone().spawn_close_watcher(connect_recv);
        session.clone().spawn_datagram_reader();
        session.clone().spawn_uni_acceptor();
        session.clone().spawn_bi_acceptor();

        session
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    fn is_live(&self) -> bool {
        matches!(self.state(), SessionState::Ready | SessionState::Accepted)
    }

    // ---- datagrams ----------------------------------------------------

    /// Enqueue a datagram; silently dropped if the session is not live.
    pub fn send_datagram(&self, data: &[u8]) {
        if !self.is_live() {
            return;
        }
        if let Err(e) = self.conn.send_datagram(bytes::Bytes::copy_from_slice(data)) {
            log::debug!("datagram dropped: {e}");
        }
    }

    pub fn on_datagram(&self, callback: impl FnMut(Vec<u8>) + Send + 'static) {
        *self.callbacks.on_datagram.lock().unwrap() = Some(Box::new(callback));
    }

    fn spawn_datagram_reader(self: Arc<Self>) {
        let conn = self.conn.clone();
        let events = self.events.clone();
        let callbacks = self.callbacks.clone();
        let session = self.clone();
        tokio::spawn(async move {
            loop {
                match conn.read_datagram().await {
                    Ok(bytes) => {
                        let bytes = bytes.to_vec();
                        let callbacks = callbacks.clone();
                        let session = session.clone();
                        events.post(Box::new(move || {
                            // A rejected or closed session never fires callbacks.
                            if !session.is_live() {
                                return;
                            }
                            if let Some(cb) = callbacks.on_datagram.lock().unwrap().as_mut() {
                                cb(bytes);
                            }
                        }));
                    }
                    Err(_) => return,
                }
            }
        });
    }

    // ---- streams --------------------------------------------------------

    pub fn on_bidi_stream(
        self: &Arc<Self>,
        callback: impl FnMut(Arc<Session>, Arc<StreamAdapter>, String) + Send + 'static,
    ) {
        *self.callbacks.on_bidi.lock().unwrap() = Some(Box::new(callback));
        self.drain_pending_if_accepted();
    }

    pub fn on_unidi_stream(
        self: &Arc<Self>,
        callback: impl FnMut(Arc<Session>, Arc<StreamAdapter>, String) + Send + 'static,
    ) {
        *self.callbacks.on_unidi.lock().unwrap() = Some(Box::new(callback));
        self.drain_pending_if_accepted();
    }

    /// Open an outgoing bidirectional stream. Returns `None` if the session
    /// is not live.
    pub async fn open_bidi(self: &Arc<Self>) -> Option<Arc<StreamAdapter>> {
        if !self.is_live() {
            return None;
        }
        let (send, recv) = self.conn.open_bi().await.ok()?;
        Some(self.wrap_stream(Direction::Bidirectional, Some(send), Some(recv)))
    }

    /// Open an outgoing unidirectional stream. Returns `None` if the session
    /// is not live.
    pub async fn open_unidi(self: &Arc<Self>) -> Option<Arc<StreamAdapter>> {
        if !self.is_live() {
            return None;
        }
        let send = self.conn.open_uni().await.ok()?;
        Some(self.wrap_stream(Direction::Unidirectional, Some(send), None))
    }

    fn wrap_stream(
        self: &Arc<Self>,
        direction: Direction,
        send: Option<quinn::SendStream>,
        recv: Option<quinn::RecvStream>,
    ) -> Arc<StreamAdapter> {
        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        StreamAdapter::new(
            StreamId(id),
            direction,
            self.events.clone(),
            send.map(SendStream::new),
            recv.map(RecvStream::new),
        )
    }

    fn spawn_uni_acceptor(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                match self.conn.accept_uni().await {
                    Ok(recv) => {
                        let adapter = self.wrap_stream(Direction::Unidirectional, None, Some(recv));
                        self.dispatch_incoming(adapter, Direction::Unidirectional);
                    }
                    Err(_) => return,
                }
            }
        });
    }

    fn spawn_bi_acceptor(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                match self.conn.accept_bi().await {
                    Ok((send, recv)) => {
                        let adapter = self.wrap_stream(Direction::Bidirectional, Some(send), Some(recv));
                        self.dispatch_incoming(adapter, Direction::Bidirectional);
                    }
                    Err(_) => return,
                }
            }
        });
    }

    /// A rejected session never produces stream callbacks (invariant ii).
    /// Before `Accepted`, streams are buffered (section 9's open-question
    /// resolution) rather than dropped, so they can be drained in order
    /// once the application accepts.
    fn dispatch_incoming(self: &Arc<Self>, adapter: Arc<StreamAdapter>, direction: Direction) {
        match self.state() {
            SessionState::Rejected | SessionState::Closed => {}
            SessionState::Accepted => self.fire_stream_callback(adapter, direction),
            SessionState::BeforeReady | SessionState::Ready => {
                self.pending_streams.lock().unwrap().push_back(PendingStream { adapter, direction });
            }
        }
    }

    fn fire_stream_callback(self: &Arc<Self>, adapter: Arc<StreamAdapter>, direction: Direction) {
        let session = self.clone();
        let path = self.path.clone();
        let callbacks = self.callbacks.clone();
        self.events.post(Box::new(move || {
            let slot = match direction {
                Direction::Bidirectional => &callbacks.on_bidi,
                Direction::Unidirectional => &callbacks.on_unidi,
            };
            if let Some(cb) = slot.lock().unwrap().as_mut() {
                cb(session, adapter, path);
            }
        }));
    }

    fn drain_pending_if_accepted(self: &Arc<Self>) {
        if self.state() != SessionState::Accepted {
            return;
        }
        let pending: Vec<_> = self.pending_streams.lock().unwrap().drain(..).collect();
        for p in pending {
            self.fire_stream_callback(p.adapter, p.direction);
        }
    }

    // ---- per-session interval ------------------------------------------

    pub fn set_interval(&self, period_ms: u64, callback: impl FnMut() + Send + 'static) {
        let alarm = self.events.create_alarm();
        alarm.set(period_ms, callback);
        *self.interval.lock().unwrap() = Some(alarm);
    }

    // ---- lifecycle / accept-reject state machine ------------------------

    /// Transition `BeforeReady -> Ready`. If a rejection was recorded before
    /// this point, close immediately and never invoke `on_ready` (section
    /// 4.5). Otherwise invoke `on_ready(session, path) -> accept`; a
    /// `false` return with no explicit `reject` call closes with code 0.
    pub fn mark_ready(
        self: &Arc<Self>,
        on_ready: impl FnOnce(Arc<Session>, String) -> bool,
    ) {
        {
            let mut state = self.state.lock().unwrap();
            if *state != SessionState::BeforeReady {
                return;
            }
            *state = SessionState::Ready;
        }

        if let Some((code, reason)) = self.pending_reject.lock().unwrap().take() {
            self.close_internal(code, reason);
            return;
        }

        let accept = on_ready(self.clone(), self.path.clone());

        let already_decided = !matches!(self.state(), SessionState::Ready);
        if already_decided {
            return;
        }

        if accept {
            self.mark_accepted();
        } else {
            self.close_internal(0, "Session rejected by application".to_string());
        }
    }

    /// Client-side convenience: there is no accept/reject decision point,
    /// the session is accepted the instant it becomes usable.
    pub fn mark_accepted(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if *state != SessionState::Ready && *state != SessionState::BeforeReady {
                return;
            }
            *state = SessionState::Accepted;
        }
        self.drain_pending_if_accepted();
    }

    /// Reject the session (server-only operation, section 4.5). Callable
    /// before or after `OnSessionReady`; if called before, the pending
    /// rejection is recorded and applied once ready.
    pub fn reject(self: &Arc<Self>, code: u32, reason: impl Into<String>) {
        let reason = reason.into();
        let state = self.state();
        match state {
            SessionState::BeforeReady => {
                *self.pending_reject.lock().unwrap() = Some((code, reason));
            }
            SessionState::Ready | SessionState::Accepted => {
                self.close_internal(code, reason);
            }
            SessionState::Rejected | SessionState::Closed => {}
        }
    }

    fn close_internal(self: &Arc<Self>, code: u32, reason: String) {
        {
            let mut state = self.state.lock().unwrap();
            *state = SessionState::Rejected;
        }
        self.pending_streams.lock().unwrap().clear();

        let mut buf = Vec::new();
        Capsule::encode_close(code, &reason, &mut buf);
        if let Some(mut send) = self.connect_send.lock().unwrap().take() {
            // Best-effort: the write races the connection teardown below.
            let conn = self.conn.clone();
            tokio::spawn(async move {
                let _ = send.write_all(&buf).await;
                conn.close(quinn::VarInt::from_u32(0), b"");
            });
        }

        let mut state = self.state.lock().unwrap();
        *state = SessionState::Closed;
    }

    fn spawn_close_watcher(self: Arc<Self>, mut connect_recv: RecvStream) {
        tokio::spawn(async move {
            let mut buf: Vec<u8> = Vec::new();
            loop {
                match connect_recv.read_next().await {
                    Ok(Some(chunk)) if chunk.is_empty() => break,
                    Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
                    Ok(None) | Err(_) => break,
                }
                let mut cursor = std::io::Cursor::new(&buf[..]);
                if let Ok(Capsule::Close { code, reason }) = Capsule::decode(&mut cursor) {
                    self.report_closed(SessionError::SessionClosed(code, reason));
                    return;
                }
            }
            if self.state() != SessionState::Closed {
                self.report_closed(SessionError::ConnectionLost);
            }
        });
    }

    fn report_closed(self: &Arc<Self>, error: SessionError) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }
        self.pending_streams.lock().unwrap().clear();
        let callbacks = self.callbacks.clone();
        self.events.post(Box::new(move || {
            match callbacks.on_error.lock().unwrap().take() {
                Some(cb) => cb(error),
                None => *callbacks.pending_error.lock().unwrap() = Some(error),
            }
        }));
    }

    /// Register the session-error callback. If the session already closed
    /// before this call, the buffered error is delivered immediately.
    pub fn on_error(&self, callback: impl FnOnce(SessionError) + Send + 'static) {
        if let Some(error) = self.callbacks.pending_error.lock().unwrap().take() {
            callback(error);
            return;
        }
        *self.callbacks.on_error.lock().unwrap() = Some(Box::new(callback));
    }
}
