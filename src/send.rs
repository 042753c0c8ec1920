//! Thin wrapper over `quinn::SendStream`. Adapted from the teacher's
//! `web-transport-quinn/src/send.rs`; trimmed to what the stream adapter
//! needs (section 4.4 exposes only `send`, not priority or partial writes).

use thiserror::Error;

use crate::wire::error_to_http3;

#[derive(Error, Debug, Clone)]
pub enum WriteError {
    #[error("stream stopped by peer with code {0}")]
    Stopped(u32),

    #[error("connection error: {0}")]
    Connection(String),
}

impl From<quinn::WriteError> for WriteError {
    fn from(e: quinn::WriteError) -> Self {
        match e {
            quinn::WriteError::Stopped(code) => {
                WriteError::Stopped(crate::wire::error_from_http3(code.into_inner()).unwrap_or(0))
            }
            quinn::WriteError::ConnectionLost(e) => WriteError::Connection(e.to_string()),
            other => WriteError::Connection(other.to_string()),
        }
    }
}

/// The writable half of a QUIC stream, section 4.4's `send`.
pub struct SendStream {
    inner: quinn::SendStream,
}

impl SendStream {
    pub fn new(inner: quinn::SendStream) -> Self {
        Self { inner }
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<(), WriteError> {
        self.inner.write_all(data).await.map_err(WriteError::from)
    }

    pub async fn finish(&mut self) -> Result<(), WriteError> {
        self.inner
            .finish()
            .map_err(|e| WriteError::Connection(e.to_string()))?;
        Ok(())
    }

    /// Reset the stream with a WebTransport-space error code, translated
    /// into HTTP/3's reserved error range (section 6, wire protocol).
    pub fn reset(&mut self, code: u32) {
        let code = quinn::VarInt::from_u64(error_to_http3(code)).unwrap_or(quinn::VarInt::from_u32(0));
        let _ = self.inner.reset(code);
    }
}
