//! The WebTransport-over-HTTP/3 CONNECT request/response, carried as a
//! HEADERS frame on a bidirectional stream. Real HTTP/3 encodes headers with
//! QPACK; this crate is not a general HTTP/3 implementation (see spec.md
//! Non-goals: "implementing QUIC/HTTP/3 from scratch"), so headers are
//! encoded as a flat, length-prefixed list instead of a full QPACK block.
//! This is sufficient for two endpoints built from this crate to
//! interoperate; it is not wire-compatible with a browser's HTTP/3 stack.

use std::collections::BTreeMap;
use std::io;

use bytes::{Buf, BufMut};
use thiserror::Error;
use url::Url;

use super::frame::Frame;
use super::varint::VarInt;

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("unexpected frame {0:?}")]
    UnexpectedFrame(Frame),

    #[error("missing or invalid :scheme header")]
    WrongScheme,

    #[error("missing :authority header")]
    WrongAuthority,

    #[error("missing :path header")]
    WrongPath,

    #[error("missing or invalid :method header")]
    WrongMethod,

    #[error("missing or invalid :protocol header")]
    WrongProtocol,

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("non-success status: {0}")]
    ErrorStatus(http::StatusCode),

    #[error("invalid status code")]
    InvalidStatus,

    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("failed to write: {0}")]
    WriteError(#[from] quinn::WriteError),

    #[error("failed to read: {0}")]
    ReadError(#[from] quinn::ReadError),
}

/// Ordered header block. Keys may repeat in theory but this crate only ever
/// sets each key once, so a map is sufficient and keeps ordering stable for
/// tests.
#[derive(Debug, Default, Clone)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        VarInt::from_u32(self.0.len() as u32).encode(buf);
        for (k, v) in &self.0 {
            VarInt::from_u32(k.len() as u32).encode(buf);
            buf.put_slice(k.as_bytes());
            VarInt::from_u32(v.len() as u32).encode(buf);
            buf.put_slice(v.as_bytes());
        }
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<Self, ConnectError> {
        let count = VarInt::decode(buf).map_err(|_| ConnectError::UnexpectedEnd)?.into_inner();
        let mut headers = BTreeMap::new();
        for _ in 0..count {
            let klen = VarInt::decode(buf).map_err(|_| ConnectError::UnexpectedEnd)?.into_inner() as usize;
            if buf.remaining() < klen {
                return Err(ConnectError::UnexpectedEnd);
            }
            let mut kbuf = vec![0u8; klen];
            buf.copy_to_slice(&mut kbuf);
            let key = String::from_utf8_lossy(&kbuf).into_owned();

            let vlen = VarInt::decode(buf).map_err(|_| ConnectError::UnexpectedEnd)?.into_inner() as usize;
            if buf.remaining() < vlen {
                return Err(ConnectError::UnexpectedEnd);
            }
            let mut vbuf = vec![0u8; vlen];
            buf.copy_to_slice(&mut vbuf);
            let value = String::from_utf8_lossy(&vbuf).into_owned();

            headers.insert(key, value);
        }
        Ok(Headers(headers))
    }
}

fn encode_frame(headers: &Headers) -> Vec<u8> {
    let mut tmp = Vec::new();
    headers.encode(&mut tmp);

    let mut buf = Vec::new();
    Frame::HEADERS.encode(&mut buf);
    VarInt::from_u32(tmp.len() as u32).encode(&mut buf);
    buf.extend_from_slice(&tmp);
    buf
}

/// Default CONNECT headers for a client request, per spec.md section 6.
pub fn default_request_headers(url: &Url, extra: &Headers) -> Headers {
    let mut headers = Headers::new();
    headers.set(":method", "CONNECT");
    headers.set(":protocol", "webtransport");
    headers.set(":scheme", url.scheme());
    headers.set(":path", url.path());

    let authority = match url.port() {
        Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
        None => url.host_str().unwrap_or_default().to_string(),
    };
    headers.set(":authority", &authority);
    headers.set("origin", format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default()));

    for (k, v) in extra.iter() {
        headers.set(k, v);
    }
    headers
}

/// Open the bidirectional CONNECT stream as a client and write the request.
/// Returns the stream (still open, awaiting the response) and the path that
/// was sent, for bookkeeping.
pub async fn open(
    conn: &quinn::Connection,
    url: &Url,
    extra_headers: &Headers,
) -> Result<(quinn::SendStream, quinn::RecvStream), ConnectError> {
    let headers = default_request_headers(url, extra_headers);
    let buf = encode_frame(&headers);

    let (mut send, recv) = conn.open_bi().await?;

    // Bump priority so the CONNECT header can't queue behind anything the
    // application writes first, then restore the default.
    send.set_priority(i32::MAX).ok();
    send.write_all(&buf).await?;
    send.set_priority(0).ok();

    Ok((send, recv))
}

/// Read the CONNECT response from the client's perspective.
pub async fn read_response(recv: &mut quinn::RecvStream) -> Result<http::StatusCode, ConnectError> {
    let mut buf = Vec::new();
    loop {
        let chunk = recv.read_chunk(usize::MAX, true).await?;
        let chunk = chunk.ok_or(ConnectError::UnexpectedEnd)?;
        buf.extend_from_slice(&chunk.bytes);

        let mut cursor = io::Cursor::new(&buf);
        let typ = match Frame::decode(&mut cursor) {
            Ok(t) => t,
            Err(_) => continue,
        };
        if typ != Frame::HEADERS {
            return Err(ConnectError::UnexpectedFrame(typ));
        }
        let size = match VarInt::decode(&mut cursor) {
            Ok(s) => s.into_inner() as usize,
            Err(_) => continue,
        };
        if cursor.remaining() < size {
            continue;
        }
        let mut limit = Buf::take(&mut cursor, size);
        let headers = Headers::decode(&mut limit)?;

        let status = headers
            .get(":status")
            .ok_or(ConnectError::InvalidStatus)?
            .parse::<u16>()
            .map_err(|_| ConnectError::InvalidStatus)?;
        let status = http::StatusCode::from_u16(status).map_err(|_| ConnectError::InvalidStatus)?;
        return Ok(status);
    }
}

/// Accept an incoming CONNECT request as a server. Validates method,
/// protocol, and scheme, and returns the parsed URL alongside the still-open
/// stream (the caller must respond with [`respond`]).
pub async fn accept(
    conn: &quinn::Connection,
) -> Result<(quinn::SendStream, quinn::RecvStream, Url), ConnectError> {
    let (send, mut recv) = conn.accept_bi().await?;

    let mut buf = Vec::new();
    let url = loop {
        let chunk = recv.read_chunk(usize::MAX, true).await?;
        let chunk = chunk.ok_or(ConnectError::UnexpectedEnd)?;
        buf.extend_from_slice(&chunk.bytes);

        let mut cursor = io::Cursor::new(&buf);
        let typ = match Frame::decode(&mut cursor) {
            Ok(t) => t,
            Err(_) => continue,
        };
        if typ != Frame::HEADERS {
            return Err(ConnectError::UnexpectedFrame(typ));
        }
        let size = match VarInt::decode(&mut cursor) {
            Ok(s) => s.into_inner() as usize,
            Err(_) => continue,
        };
        if cursor.remaining() < size {
            continue;
        }
        let mut limit = Buf::take(&mut cursor, size);
        let headers = Headers::decode(&mut limit)?;

        if headers.get(":method") != Some("CONNECT") {
            return Err(ConnectError::WrongMethod);
        }
        if headers.get(":protocol") != Some("webtransport") {
            return Err(ConnectError::WrongProtocol);
        }
        if headers.get(":scheme") != Some("https") {
            return Err(ConnectError::WrongScheme);
        }
        let authority = headers.get(":authority").ok_or(ConnectError::WrongAuthority)?;
        let path = headers.get(":path").ok_or(ConnectError::WrongPath)?;

        break Url::parse(&format!("https://{authority}{path}"))?;
    };

    Ok((send, recv, url))
}

/// Respond to a CONNECT request with a status code.
pub async fn respond(send: &mut quinn::SendStream, status: http::StatusCode) -> Result<(), ConnectError> {
    let mut headers = Headers::new();
    headers.set(":status", status.as_str());
    let buf = encode_frame(&headers);
    send.write_all(&buf).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_headers_match_section_6_table() {
        let url = Url::parse("https://example.com:4433/echo").unwrap();
        let headers = default_request_headers(&url, &Headers::new());

        assert_eq!(headers.get(":method"), Some("CONNECT"));
        assert_eq!(headers.get(":protocol"), Some("webtransport"));
        assert_eq!(headers.get(":scheme"), Some("https"));
        assert_eq!(headers.get(":path"), Some("/echo"));
        assert_eq!(headers.get(":authority"), Some("example.com:4433"));
        assert_eq!(headers.get("origin"), Some("https://example.com"));
    }

    #[test]
    fn default_headers_omit_port_when_absent() {
        let url = Url::parse("https://example.com/echo").unwrap();
        let headers = default_request_headers(&url, &Headers::new());
        assert_eq!(headers.get(":authority"), Some("example.com"));
    }

    #[test]
    fn extra_headers_override_defaults() {
        let url = Url::parse("https://example.com/echo").unwrap();
        let mut extra = Headers::new();
        extra.set(":path", "/overridden");
        let headers = default_request_headers(&url, &extra);
        assert_eq!(headers.get(":path"), Some("/overridden"));
    }

    #[test]
    fn headers_encode_decode_roundtrip() {
        let mut headers = Headers::new();
        headers.set(":method", "CONNECT");
        headers.set(":status", "200");

        let mut buf = Vec::new();
        headers.encode(&mut buf);

        let mut read = buf.as_slice();
        let decoded = Headers::decode(&mut read).unwrap();
        assert_eq!(decoded.get(":method"), Some("CONNECT"));
        assert_eq!(decoded.get(":status"), Some("200"));
    }
}
