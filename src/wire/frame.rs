use bytes::{Buf, BufMut};

use super::varint::{UnexpectedEnd, VarInt};

/// Sent as the first varint of a unidirectional stream, identifying its purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamUni(pub VarInt);

macro_rules! streams_uni {
    {$($name:ident = $val:expr,)*} => {
        impl StreamUni {
            $(pub const $name: StreamUni = StreamUni(VarInt::from_u32($val));)*
        }
    }
}

streams_uni! {
    CONTROL = 0x00,
    WEBTRANSPORT = 0x54,
}

impl StreamUni {
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, UnexpectedEnd> {
        Ok(StreamUni(VarInt::decode(buf)?))
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        self.0.encode(buf)
    }
}

/// Sent as the first varint of a bidirectional stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame(pub VarInt);

macro_rules! frames {
    {$($name:ident = $val:expr,)*} => {
        impl Frame {
            $(pub const $name: Frame = Frame(VarInt::from_u32($val));)*
        }
    }
}

frames! {
    HEADERS = 0x01,
    SETTINGS = 0x04,
    WEBTRANSPORT = 0x41,
}

impl Frame {
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, UnexpectedEnd> {
        Ok(Frame(VarInt::decode(buf)?))
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        self.0.encode(buf)
    }
}

/// Error codes are shared with HTTP/3's reserved error space; WebTransport
/// session codes must be translated before being handed to QUIC.
const ERROR_FIRST: u64 = 0x52e4a40fa8db;

pub fn error_to_http3(code: u32) -> u64 {
    ERROR_FIRST + code as u64 + code as u64 / 0x1e
}

pub fn error_from_http3(code: u64) -> Option<u32> {
    if code < ERROR_FIRST {
        return None;
    }
    if (code - 0x21) % 0x1f == 0 {
        return None;
    }
    let shifted = code - ERROR_FIRST;
    let value = shifted - shifted / 0x1f;
    value.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_roundtrip() {
        for code in [0u32, 1, 41, 420, 0xffff, 0xffff_ffff] {
            let http3 = error_to_http3(code);
            assert_eq!(error_from_http3(http3), Some(code));
        }
    }

    #[test]
    fn error_from_http3_rejects_below_range() {
        assert_eq!(error_from_http3(ERROR_FIRST - 1), None);
    }

    #[test]
    fn stream_uni_roundtrip() {
        for marker in [StreamUni::CONTROL, StreamUni::WEBTRANSPORT] {
            let mut buf = Vec::new();
            marker.encode(&mut buf);
            let mut read = buf.as_slice();
            assert_eq!(StreamUni::decode(&mut read).unwrap(), marker);
        }
    }

    #[test]
    fn frame_roundtrip() {
        for kind in [Frame::HEADERS, Frame::SETTINGS, Frame::WEBTRANSPORT] {
            let mut buf = Vec::new();
            kind.encode(&mut buf);
            let mut read = buf.as_slice();
            assert_eq!(Frame::decode(&mut read).unwrap(), kind);
        }
    }
}
