//! The one capsule this crate cares about: `CLOSE_WEBTRANSPORT_SESSION`,
//! sent on the CONNECT stream to carry a session's close code and reason
//! once the stream itself is not enough (a plain FIN loses the reason).
//! Adapted from `web-transport-proto`'s `capsule.rs` in the example pack.

use bytes::{Buf, BufMut};
use thiserror::Error;

use super::varint::{UnexpectedEnd, VarInt};

const CLOSE_WEBTRANSPORT_SESSION: u64 = 0x2843;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapsuleError {
    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("invalid utf-8 in close reason")]
    InvalidUtf8,
}

impl From<UnexpectedEnd> for CapsuleError {
    fn from(_: UnexpectedEnd) -> Self {
        CapsuleError::UnexpectedEnd
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capsule {
    Close { code: u32, reason: String },
    Unknown,
}

impl Capsule {
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, CapsuleError> {
        let typ = VarInt::decode(buf)?;
        let len = VarInt::decode(buf)?.into_inner() as usize;
        if buf.remaining() < len {
            return Err(CapsuleError::UnexpectedEnd);
        }

        if typ.into_inner() != CLOSE_WEBTRANSPORT_SESSION {
            buf.advance(len);
            return Ok(Capsule::Unknown);
        }

        if len < 4 {
            return Err(CapsuleError::UnexpectedEnd);
        }
        let code = buf.get_u32();
        let mut reason_bytes = vec![0u8; len - 4];
        buf.copy_to_slice(&mut reason_bytes);
        let reason = String::from_utf8(reason_bytes).map_err(|_| CapsuleError::InvalidUtf8)?;

        Ok(Capsule::Close { code, reason })
    }

    pub fn encode_close<B: BufMut>(code: u32, reason: &str, buf: &mut B) {
        VarInt::try_from_u64(CLOSE_WEBTRANSPORT_SESSION)
            .unwrap()
            .encode(buf);
        VarInt::from_u32(4 + reason.len() as u32).encode(buf);
        buf.put_u32(code);
        buf.put_slice(reason.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let mut buf = Vec::new();
        Capsule::encode_close(420, "nope", &mut buf);

        let mut read = buf.as_slice();
        let capsule = Capsule::decode(&mut read).unwrap();
        assert_eq!(
            capsule,
            Capsule::Close {
                code: 420,
                reason: "nope".to_string()
            }
        );
        assert_eq!(read.len(), 0);
    }

    #[test]
    fn empty_reason_roundtrips() {
        let mut buf = Vec::new();
        Capsule::encode_close(0, "", &mut buf);

        let mut read = buf.as_slice();
        let capsule = Capsule::decode(&mut read).unwrap();
        assert_eq!(
            capsule,
            Capsule::Close {
                code: 0,
                reason: String::new()
            }
        );
    }

    #[test]
    fn unknown_type_is_skipped_not_errored() {
        let mut buf = Vec::new();
        VarInt::from_u32(0x99).encode(&mut buf);
        VarInt::from_u32(3).encode(&mut buf);
        buf.extend_from_slice(b"abc");

        let mut read = buf.as_slice();
        assert_eq!(Capsule::decode(&mut read).unwrap(), Capsule::Unknown);
        assert_eq!(read.len(), 0);
    }

    #[test]
    fn truncated_input_is_unexpected_end() {
        let mut buf = Vec::new();
        VarInt::try_from_u64(CLOSE_WEBTRANSPORT_SESSION).unwrap().encode(&mut buf);
        VarInt::from_u32(8).encode(&mut buf);
        buf.extend_from_slice(b"\x00\x00\x01");

        let mut read = buf.as_slice();
        assert!(Capsule::decode(&mut read).is_err());
    }
}
