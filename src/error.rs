//! Error taxonomy, one enum per failure domain, mirroring the table in
//! spec.md section 7. Adapted from the teacher's `error.rs`, which takes the
//! same approach (`ClientError`, `ServerError`, `SessionError`, ...).

use thiserror::Error;

use crate::wire::{capsule::CapsuleError, connect::ConnectError, settings::SettingsError};

/// Raised when constructing or connecting a [`crate::Client`].
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid url: {0}")]
    UrlInvalid(String),

    #[error("failed to resolve host: {0}")]
    DnsFailed(String),

    #[error("quic connect error: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("h3 settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("connect request error: {0}")]
    Connect3(#[from] ConnectError),

    #[error("certificate verification failed: {0}")]
    CertVerifyFailed(String),

    #[error("server rejected WebTransport session with status: {0}")]
    HandshakeRejected(u16),

    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raised while a session is live: delivered to the registered error
/// callback exactly once (spec.md section 7 policy), then the endpoint
/// stops polling that session.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error("connection lost or failed")]
    ConnectionLost,

    #[error("server rejected WebTransport session with status: {0}")]
    HandshakeRejected(u16),

    #[error("certificate verification failed: {0}")]
    CertVerifyFailed(String),

    #[error("session closed: code={0} reason={1}")]
    SessionClosed(u32, String),
}

/// Returned by [`crate::StreamAdapter::send`]; a send on a dead or
/// FIN-observed stream fails rather than panicking.
#[derive(Error, Debug, Clone)]
pub enum StreamError {
    #[error("stream is closed")]
    WriteRefused,

    #[error("connection error: {0}")]
    Connection(String),
}

/// Certificate verification policy failures (spec.md section 4.3).
#[derive(Error, Debug)]
pub enum CertError {
    #[error("server presented {0} certificates; pinned mode requires exactly 1")]
    PinChainTooLong(usize),

    #[error("presented certificate does not match the pinned certificate")]
    PinMismatch,

    #[error("failed to load certificate file {0}: {1}")]
    LoadFailed(String, std::io::Error),

    #[error("no valid certificates found in {0}")]
    NoCertificates(String),

    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Server initialization failures, fatal per spec.md section 7.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    #[error("failed to load certificate chain or key: {0}")]
    CertLoadFailed(String),

    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("connect handshake error: {0}")]
    Connect(#[from] ConnectError),
}

impl From<CapsuleError> for SessionError {
    fn from(_: CapsuleError) -> Self {
        SessionError::SessionClosed(1, "malformed close capsule".to_string())
    }
}
