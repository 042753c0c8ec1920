//! A WebTransport endpoint library: a client and a server that each
//! establish a WebTransport session over HTTP/3-on-QUIC, then exchange
//! unreliable datagrams and reliable streams through application callbacks.
//!
//! `quinn` supplies QUIC and TLS 1.3; this crate supplies the WebTransport
//! session/stream lifecycle, the certificate verification policy, the
//! interval alarm service, and just enough HTTP/3 framing (in [`wire`]) to
//! perform the WebTransport CONNECT handshake. It does not implement
//! general-purpose HTTP/3.

pub mod alarm;
pub mod client;
pub mod error;
pub mod event_loop;
pub mod recv;
pub mod send;
pub mod server;
pub mod session;
pub mod stream;
pub mod verify;
pub mod wire;

pub use alarm::Alarm;
pub use client::{parse_url, Client, ClientBuilder, CongestionControl};
pub use error::{CertError, ClientError, ServerError, SessionError, StreamError};
pub use event_loop::EventLoop;
pub use server::{Request, Server, ServerBuilder};
pub use session::{Session, SessionState};
pub use stream::{Direction, StreamAdapter, StreamId};
pub use verify::CertPolicy;
