//! HTTP/3 SETTINGS exchange, just enough to advertise and detect WebTransport
//! support. Adapted from the teacher's `src/h3.rs` + `src/settings.rs`.

use std::{collections::HashMap, io};

use bytes::Buf;
use thiserror::Error;
use tokio::{io::AsyncWriteExt, try_join};

use super::frame::{Frame, StreamUni};
use super::varint::VarInt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Setting(VarInt);

impl Setting {
    const ENABLE_CONNECT_PROTOCOL: Setting = Setting(VarInt::from_u32(0x8));
    const ENABLE_DATAGRAM: Setting = Setting(VarInt::from_u32(0x33));
    const WEBTRANSPORT_MAX_SESSIONS: Setting = Setting(VarInt::from_u32(0xc671706a));
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("unexpected end of stream")]
    UnexpectedEnd,

    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("failed to write settings: {0}")]
    WriteError(#[from] quinn::WriteError),

    #[error("failed to read settings: {0}")]
    ReadError(#[from] quinn::ReadError),

    #[error("peer does not advertise WebTransport support")]
    WebTransportUnsupported,
}

/// The locally-held settings of the peer, decoded off their control stream.
#[derive(Default, Debug)]
pub struct PeerSettings(HashMap<Setting, VarInt>);

impl PeerSettings {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, SettingsError> {
        let typ = StreamUni::decode(buf).map_err(|_| SettingsError::UnexpectedEnd)?;
        if typ != StreamUni::CONTROL {
            return Err(SettingsError::UnexpectedEnd);
        }

        let typ = Frame::decode(buf).map_err(|_| SettingsError::UnexpectedEnd)?;
        if typ != Frame::SETTINGS {
            return Err(SettingsError::UnexpectedEnd);
        }

        let size = VarInt::decode(buf).map_err(|_| SettingsError::UnexpectedEnd)?;
        let mut limit = Buf::take(buf, size.into_inner() as usize);
        if limit.remaining() < limit.limit() {
            return Err(SettingsError::UnexpectedEnd);
        }

        let mut settings = HashMap::new();
        while limit.has_remaining() {
            let id = VarInt::decode(&mut limit).map_err(|_| SettingsError::UnexpectedEnd)?;
            let value = VarInt::decode(&mut limit).map_err(|_| SettingsError::UnexpectedEnd)?;
            settings.insert(Setting(id), value);
        }

        Ok(PeerSettings(settings))
    }

    fn supports_webtransport(&self) -> bool {
        matches!(self.0.get(&Setting::ENABLE_CONNECT_PROTOCOL), Some(v) if v.into_inner() == 1)
            && matches!(self.0.get(&Setting::ENABLE_DATAGRAM), Some(v) if v.into_inner() == 1)
            && self
                .0
                .get(&Setting::WEBTRANSPORT_MAX_SESSIONS)
                .map(|v| v.into_inner() > 0)
                .unwrap_or(false)
    }
}

/// Perform the one-time HTTP/3 control-stream handshake: advertise
/// WebTransport support on an outgoing unidirectional stream and confirm the
/// peer advertises it back on an incoming one.
///
/// Both sides of the handshake run concurrently; on success the caller
/// receives nothing but a live control exchange in the background.
pub async fn exchange(conn: &quinn::Connection) -> Result<(), SettingsError> {
    try_join!(write_settings(conn), read_settings(conn))?;
    Ok(())
}

async fn write_settings(conn: &quinn::Connection) -> Result<(), SettingsError> {
    let mut buf = Vec::new();
    StreamUni::CONTROL.encode(&mut buf);
    Frame::SETTINGS.encode(&mut buf);

    let mut payload = Vec::new();
    Setting::ENABLE_CONNECT_PROTOCOL.0.encode(&mut payload);
    VarInt::from_u32(1).encode(&mut payload);
    Setting::ENABLE_DATAGRAM.0.encode(&mut payload);
    VarInt::from_u32(1).encode(&mut payload);
    Setting::WEBTRANSPORT_MAX_SESSIONS.0.encode(&mut payload);
    VarInt::from_u32(1).encode(&mut payload);

    VarInt::from_u32(payload.len() as u32).encode(&mut buf);
    buf.extend_from_slice(&payload);

    let mut send = conn.open_uni().await?;
    send.write_all(&buf).await?;
    Ok(())
}

async fn read_settings(conn: &quinn::Connection) -> Result<(), SettingsError> {
    let mut recv = conn.accept_uni().await?;
    let mut buf = Vec::new();

    loop {
        let chunk = recv.read_chunk(usize::MAX, true).await?;
        let chunk = chunk.ok_or(SettingsError::UnexpectedEnd)?;
        buf.extend_from_slice(&chunk.bytes);

        let mut cursor = io::Cursor::new(&buf);
        match PeerSettings::decode(&mut cursor) {
            Ok(settings) if settings.supports_webtransport() => return Ok(()),
            Ok(_) => return Err(SettingsError::WebTransportUnsupported),
            Err(SettingsError::UnexpectedEnd) => continue,
            Err(e) => return Err(e),
        }
    }
}
