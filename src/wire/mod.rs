//! The HTTP/3-over-QUIC plumbing this crate needs to speak the
//! WebTransport-over-HTTP/3 extension: SETTINGS exchange, the CONNECT
//! request/response, and the session-close capsule. See spec.md section 1:
//! the full QUIC/HTTP/3 stack is treated as an external collaborator, and
//! `quinn` supplies the QUIC half; this module supplies only the thin
//! WebTransport-specific framing `quinn` does not.

pub mod capsule;
pub mod connect;
pub mod frame;
pub mod settings;
pub mod varint;

pub use capsule::Capsule;
pub use connect::Headers;
pub use frame::{error_from_http3, error_to_http3, Frame, StreamUni};
pub use varint::VarInt;
