//! Thin wrapper over `quinn::RecvStream` implementing the read algorithm of
//! section 4.4: peek the next readable region, copy into a buffer, detect
//! FIN, deliver a contiguous byte vector (or an empty one for FIN) to the
//! caller. `quinn` does not expose a separate peek/skip pair; `read_chunk`
//! with `ordered = true` already returns owned, ordered bytes and reports
//! FIN by yielding `None`, so the peek/skip split collapses into one call.
//! Grounded on the teacher's `web-transport-quinn/src/recv.rs`.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ReadError {
    #[error("stream reset by peer with code {0}")]
    Reset(u32),

    #[error("connection error: {0}")]
    Connection(String),
}

impl From<quinn::ReadError> for ReadError {
    fn from(e: quinn::ReadError) -> Self {
        match e {
            quinn::ReadError::Reset(code) => {
                ReadError::Reset(crate::wire::error_from_http3(code.into_inner()).unwrap_or(0))
            }
            quinn::ReadError::ConnectionLost(e) => ReadError::Connection(e.to_string()),
            other => ReadError::Connection(other.to_string()),
        }
    }
}

pub struct RecvStream {
    inner: quinn::RecvStream,
    fin_delivered: bool,
}

impl RecvStream {
    pub fn new(inner: quinn::RecvStream) -> Self {
        Self {
            inner,
            fin_delivered: false,
        }
    }

    /// Read the next delivery per section 4.4: `Some(bytes)` for a non-empty
    /// payload, `Some(empty)` exactly once for FIN, then `None` forever
    /// after (the adapter must not call this again once FIN was observed,
    /// but guards anyway to uphold invariant iii).
    pub async fn read_next(&mut self) -> Result<Option<Vec<u8>>, ReadError> {
        if self.fin_delivered {
            return Ok(None);
        }

        match self.inner.read_chunk(usize::MAX, true).await? {
            Some(chunk) => Ok(Some(chunk.bytes.to_vec())),
            None => {
                self.fin_delivered = true;
                Ok(Some(Vec::new()))
            }
        }
    }

    pub fn stop(&mut self, code: u32) {
        let http3_code = crate::wire::error_to_http3(code);
        let code = quinn::VarInt::from_u64(http3_code).unwrap_or(quinn::VarInt::from_u32(0));
        let _ = self.inner.stop(code);
    }
}
