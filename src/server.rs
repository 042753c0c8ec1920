//! Server Endpoint (component 6, section 4.6). Grounded on the teacher's
//! `web-transport-quinn/src/server.rs`: `ServerBuilder` loads the cert chain
//! and key, builds the QUIC server config, binds, and `accept()` loops over
//! incoming connections. The "WebTransport-only backend" of the original
//! source (any non-WebTransport request is unsupported) is implicit here:
//! this server only ever speaks the CONNECT handshake in `wire::connect`.

use std::fs;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::ServerError;
use crate::event_loop::EventLoop;
use crate::session::Session;
use crate::wire::{connect, settings};

pub const ALPN: &[u8] = b"h3";

pub struct ServerBuilder {
    addr: SocketAddr,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            addr: "[::]:4433".parse().unwrap(),
        }
    }

    /// Bind address (section 6): `HOST:PORT` over UDP; `HOST` may be
    /// `0.0.0.0` or `::`. Invalid strings are fatal at `initialize()`.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Load a full-chain PEM certificate file and a PEM private key file,
    /// build the TLS/QUIC config, and bind. Fatal errors are returned, not
    /// panicked on, but the caller is expected to terminate the process on
    /// failure per section 7's `BindFailed`/`CertLoadFailed` policy.
    pub fn with_certificate(
        self,
        chain_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Server, ServerError> {
        let chain = load_chain(chain_path.as_ref())?;
        let key = load_key(key_path.as_ref())?;
        self.with_certificate_der(chain, key)
    }

    /// As [`with_certificate`](Self::with_certificate), but from an
    /// already-parsed chain and key rather than file paths. Useful for
    /// tests and for callers that generate certificates in-process.
    pub fn with_certificate_der(
        self,
        chain: Vec<rustls::pki_types::CertificateDer<'static>>,
        key: rustls::pki_types::PrivateKeyDer<'static>,
    ) -> Result<Server, ServerError> {
        let mut tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(ServerError::Rustls)?;
        tls_config.alpn_protocols = vec![ALPN.to_vec()];

        let quic_tls = quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
            .map_err(|e| ServerError::Rustls(rustls::Error::General(e.to_string())))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_tls));

        let endpoint = quinn::Endpoint::server(server_config, self.addr)?;

        Ok(Server { endpoint })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn load_chain(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, ServerError> {
    let bytes = fs::read(path).map_err(|e| ServerError::CertLoadFailed(format!("{}: {e}", path.display())))?;
    let mut reader = std::io::Cursor::new(bytes);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::CertLoadFailed(format!("{}: {e}", path.display())))
}

fn load_key(path: &Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>, ServerError> {
    let bytes = fs::read(path).map_err(|e| ServerError::CertLoadFailed(format!("{}: {e}", path.display())))?;
    let mut reader = std::io::Cursor::new(bytes);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ServerError::CertLoadFailed(format!("{}: {e}", path.display())))?
        .ok_or_else(|| ServerError::CertLoadFailed(format!("no private key found in {}", path.display())))
}

/// A listening server. `accept()` drives one incoming WebTransport session
/// at a time; callers typically loop calling it from their own task.
pub struct Server {
    endpoint: quinn::Endpoint,
}

impl Server {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    /// Accept the next incoming connection, perform the SETTINGS exchange
    /// and CONNECT handshake, and return a `Request` awaiting an `ok()` or
    /// `close()` decision. Returns `None` once the endpoint is closed.
    pub async fn accept(&self, events: EventLoop) -> Option<Request> {
        loop {
            let incoming = self.endpoint.accept().await?;
            let conn = match incoming.await {
                Ok(conn) => conn,
                Err(e) => {
                    log::warn!("incoming connection failed: {e}");
                    continue;
                }
            };

            if let Err(e) = settings::exchange(&conn).await {
                log::warn!("settings exchange failed: {e}");
                continue;
            }

            match connect::accept(&conn).await {
                Ok((send, recv, url)) => {
                    return Some(Request {
                        conn,
                        send: Mutex::new(Some(send)),
                        recv: Mutex::new(Some(recv)),
                        path: url.path().to_string(),
                        events: events.clone(),
                    });
                }
                Err(e) => {
                    log::warn!("CONNECT handshake failed: {e}");
                    continue;
                }
            }
        }
    }

    /// Accept connections forever, spawning `handler` on each one (section
    /// 4.6 step 4: `listen()` calls `handle_events_forever`). Returns once
    /// the endpoint is closed.
    pub async fn listen<F, Fut>(&self, events: EventLoop, mut handler: F)
    where
        F: FnMut(Request) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        while let Some(request) = self.accept(events.clone()).await {
            tokio::spawn(handler(request));
        }
    }
}

/// One pending WebTransport session request, carrying the path observed at
/// CONNECT time (section 3: the server-side session identity).
pub struct Request {
    conn: quinn::Connection,
    send: Mutex<Option<quinn::SendStream>>,
    recv: Mutex<Option<quinn::RecvStream>>,
    path: String,
    events: EventLoop,
}

impl Request {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Accept the session: reply `200 OK` and wrap the connection as a
    /// [`Session`] in `BeforeReady` state, ready for `mark_ready`.
    pub async fn ok(&self) -> Result<Arc<Session>, ServerError> {
        let mut send = self.send.lock().await.take().expect("Request consumed twice");
        let recv = self.recv.lock().await.take().expect("Request consumed twice");

        connect::respond(&mut send, http::StatusCode::OK).await?;

        let send = crate::send::SendStream::new(send);
        let recv = crate::recv::RecvStream::new(recv);
        Ok(Session::new(self.conn.clone(), send, recv, self.path.clone(), self.events.clone()))
    }

    /// Reject the request outright, before any [`Session`] exists: respond
    /// with a rejection status and close the connection. No session
    /// callback is ever invoked for this connection attempt.
    pub async fn close(&self, status: http::StatusCode) -> Result<(), ServerError> {
        let mut send = self.send.lock().await.take().expect("Request consumed twice");
        connect::respond(&mut send, status).await?;
        self.conn.close(quinn::VarInt::from_u32(0), b"");
        Ok(())
    }
}
