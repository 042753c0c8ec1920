//! End-to-end tests against a real `quinn` QUIC connection over loopback,
//! covering the scenarios in spec section 8: datagram echo (A), session
//! reject by path (B), a bidi stream round trip (C), a certificate pin
//! mismatch (D), an interval-rate bound (E), and a FIN-only stream read
//! (F). Certs are generated in-process with `rcgen`, matching the
//! teacher's own dev-deps.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use url::Url;
use webtransport_endpoint::{parse_url, CertPolicy, ClientBuilder, EventLoop, ServerBuilder};

fn self_signed_cert() -> (Vec<rustls::pki_types::CertificateDer<'static>>, rustls::pki_types::PrivateKeyDer<'static>) {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string(), "127.0.0.1".to_string()]).unwrap();
    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(generated.signing_key.serialize_der());
    let cert_der: rustls::pki_types::CertificateDer<'static> = generated.cert.into();
    (vec![cert_der.clone()], rustls::pki_types::PrivateKeyDer::Pkcs8(key))
}

/// Continuously drains an `EventLoop`'s callback queue, standing in for the
/// `run_event_loop`/`listen` blocking loop described in section 4.6.
fn spawn_pump(events: EventLoop) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            events.run_once(Duration::from_millis(20)).await;
        }
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn datagram_echo_scenario_a() {
    let (chain, key) = self_signed_cert();
    let pin = chain[0].clone();

    let server = ServerBuilder::new()
        .with_addr("127.0.0.1:0".parse().unwrap())
        .with_certificate_der(chain, key)
        .expect("server config");
    let addr = server.local_addr().unwrap();

    let server_events = EventLoop::new();
    let server_pump = spawn_pump(server_events.clone());

    let server_task = tokio::spawn({
        let server_events = server_events.clone();
        async move {
            let request = server.accept(server_events.clone()).await.expect("one connection");
            assert_eq!(request.path(), "/echo");
            let session = request.ok().await.expect("accept session");

            let echo_session = session.clone();
            session.mark_ready(move |session, _path| {
                session.on_datagram(move |bytes| {
                    echo_session.send_datagram(&bytes);
                });
                true
            });

            // Keep the session (and its background tasks) alive for the test.
            tokio::time::sleep(Duration::from_secs(2)).await;
            let _ = session;
        }
    });

    let client = ClientBuilder::new()
        .with_certificate_policy(CertPolicy::pinned_der(pin))
        .build()
        .expect("client config");

    let client_events = EventLoop::new();
    let client_pump = spawn_pump(client_events.clone());

    let url = Url::parse(&format!("https://127.0.0.1:{}/echo", addr.port())).unwrap();
    let session = client.connect(url, client_events.clone()).await.expect("connect");

    let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let received_clone = received.clone();
    session.on_datagram(move |bytes| {
        received_clone.lock().unwrap().push(bytes);
    });

    session.send_datagram(&[0x01, 0x02, 0x03, 0x04]);
    session.send_datagram(&[0xff]);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if received.lock().unwrap().len() >= 2 || tokio::time::Instant::now() > deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let got = received.lock().unwrap().clone();
    assert_eq!(got, vec![vec![0x01, 0x02, 0x03, 0x04], vec![0xff]]);

    server_task.abort();
    server_pump.abort();
    client_pump.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn pin_mismatch_rejects_connection_scenario_d() {
    let (chain, key) = self_signed_cert();
    let (wrong_chain, _) = self_signed_cert();
    let wrong_pin = wrong_chain[0].clone();

    let server = ServerBuilder::new()
        .with_addr("127.0.0.1:0".parse().unwrap())
        .with_certificate_der(chain, key)
        .expect("server config");
    let addr = server.local_addr().unwrap();

    let server_events = EventLoop::new();
    let _server_pump = spawn_pump(server_events.clone());
    let server_task = tokio::spawn(async move {
        let _request = server.accept(server_events).await;
    });

    let client = ClientBuilder::new()
        .with_certificate_policy(CertPolicy::pinned_der(wrong_pin))
        .build()
        .expect("client config");

    let client_events = EventLoop::new();
    let _client_pump = spawn_pump(client_events.clone());

    let url = Url::parse(&format!("https://127.0.0.1:{}/echo", addr.port())).unwrap();
    let result = client.connect(url, client_events).await;

    assert!(result.is_err(), "pinned client must reject a mismatched certificate");

    server_task.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn fin_only_stream_read_scenario_f() {
    let (chain, key) = self_signed_cert();
    let pin = chain[0].clone();

    let server = ServerBuilder::new()
        .with_addr("127.0.0.1:0".parse().unwrap())
        .with_certificate_der(chain, key)
        .expect("server config");
    let addr = server.local_addr().unwrap();

    let server_events = EventLoop::new();
    let server_pump = spawn_pump(server_events.clone());

    let fin_reads: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let fin_reads_server = fin_reads.clone();

    let server_task = tokio::spawn(async move {
        let request = server.accept(server_events).await.expect("one connection");
        let session = request.ok().await.expect("accept session");

        session.mark_ready(move |session, _path| {
            let fin_reads_server = fin_reads_server.clone();
            session.on_bidi_stream(move |_session, stream, _path| {
                let fin_reads_server = fin_reads_server.clone();
                stream.on_read(move |bytes| {
                    fin_reads_server.lock().unwrap().push(bytes);
                });
            });
            true
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let client = ClientBuilder::new()
        .with_certificate_policy(CertPolicy::pinned_der(pin))
        .build()
        .expect("client config");

    let client_events = EventLoop::new();
    let client_pump = spawn_pump(client_events.clone());

    let url = Url::parse(&format!("https://127.0.0.1:{}/ping", addr.port())).unwrap();
    let session = client.connect(url, client_events).await.expect("connect");

    let stream = session.open_bidi().await.expect("open stream");
    stream.finish().await.expect("finish with no data");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if !fin_reads.lock().unwrap().is_empty() || tokio::time::Instant::now() > deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let reads = fin_reads.lock().unwrap().clone();
    assert_eq!(reads.len(), 1, "exactly one FIN delivery expected");
    assert!(reads[0].is_empty(), "FIN delivery must be an empty vector");

    server_task.abort();
    server_pump.abort();
    client_pump.abort();
}

/// Testable property 1: construction fails for any non-`https` scheme.
#[test]
fn non_https_scheme_is_rejected() {
    assert!(parse_url("http://example.com/echo").is_err());
    assert!(parse_url("ftp://example.com/echo").is_err());
    assert!(parse_url("https://example.com/echo").is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn session_reject_by_path_scenario_b() {
    let (chain, key) = self_signed_cert();
    let pin = chain[0].clone();

    let server = ServerBuilder::new()
        .with_addr("127.0.0.1:0".parse().unwrap())
        .with_certificate_der(chain, key)
        .expect("server config");
    let addr = server.local_addr().unwrap();

    let server_events = EventLoop::new();
    let server_pump = spawn_pump(server_events.clone());

    let server_task = tokio::spawn(async move {
        let request = server.accept(server_events).await.expect("one connection");
        let session = request.ok().await.expect("accept session");

        session.mark_ready(move |session, path| {
            if path == "/ok" {
                true
            } else {
                session.reject(401, "nope");
                false
            }
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let client = ClientBuilder::new()
        .with_certificate_policy(CertPolicy::pinned_der(pin))
        .build()
        .expect("client config");

    let client_events = EventLoop::new();
    let client_pump = spawn_pump(client_events.clone());

    let url = Url::parse(&format!("https://127.0.0.1:{}/denied", addr.port())).unwrap();
    let session = client.connect(url, client_events).await.expect("connect");

    let error_message: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let error_message_clone = error_message.clone();
    session.on_error(move |error| {
        *error_message_clone.lock().unwrap() = Some(error.to_string());
    });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if error_message.lock().unwrap().is_some() || tokio::time::Instant::now() > deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let message = error_message.lock().unwrap().clone().expect("session-error callback must fire");
    assert!(
        message.contains("401") || message.contains("nope"),
        "expected the rejection code or reason in: {message}"
    );

    server_task.abort();
    server_pump.abort();
    client_pump.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn bidi_stream_round_trip_scenario_c() {
    let (chain, key) = self_signed_cert();
    let pin = chain[0].clone();

    let server = ServerBuilder::new()
        .with_addr("127.0.0.1:0".parse().unwrap())
        .with_certificate_der(chain, key)
        .expect("server config");
    let addr = server.local_addr().unwrap();

    let server_events = EventLoop::new();
    let server_pump = spawn_pump(server_events.clone());

    let server_task = tokio::spawn(async move {
        let request = server.accept(server_events).await.expect("one connection");
        let session = request.ok().await.expect("accept session");

        session.mark_ready(move |session, _path| {
            session.on_bidi_stream(move |_session, stream, _path| {
                let received: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
                let received_for_read = received.clone();
                let stream_for_read = stream.clone();
                stream.on_read(move |bytes| {
                    if bytes.is_empty() {
                        let payload = received_for_read.lock().unwrap().clone();
                        let stream = stream_for_read.clone();
                        tokio::spawn(async move {
                            let _ = stream.send(&payload).await;
                            let _ = stream.finish().await;
                        });
                    } else {
                        received_for_read.lock().unwrap().extend_from_slice(&bytes);
                    }
                });
            });
            true
        });

        tokio::time::sleep(Duration::from_secs(3)).await;
    });

    let client = ClientBuilder::new()
        .with_certificate_policy(CertPolicy::pinned_der(pin))
        .build()
        .expect("client config");

    let client_events = EventLoop::new();
    let client_pump = spawn_pump(client_events.clone());

    let url = Url::parse(&format!("https://127.0.0.1:{}/echo", addr.port())).unwrap();
    let session = client.connect(url, client_events).await.expect("connect");

    let payload: Vec<u8> = (0..65_000u32).map(|i| (i % 256) as u8).collect();

    let stream = session.open_bidi().await.expect("open stream");

    let received: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let fin_count = Arc::new(AtomicUsize::new(0));
    let received_clone = received.clone();
    let fin_count_clone = fin_count.clone();
    stream.on_read(move |bytes| {
        if bytes.is_empty() {
            fin_count_clone.fetch_add(1, Ordering::SeqCst);
        } else {
            received_clone.lock().unwrap().extend_from_slice(&bytes);
        }
    });

    stream.send(&payload).await.expect("send 65000 bytes");
    stream.finish().await.expect("finish after send");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if fin_count.load(Ordering::SeqCst) >= 1 || tokio::time::Instant::now() > deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(fin_count.load(Ordering::SeqCst), 1, "exactly one FIN delivery expected");
    assert_eq!(received.lock().unwrap().as_slice(), payload.as_slice());

    server_task.abort();
    server_pump.abort();
    client_pump.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn interval_rate_scenario_e() {
    let (chain, key) = self_signed_cert();
    let pin = chain[0].clone();

    let server = ServerBuilder::new()
        .with_addr("127.0.0.1:0".parse().unwrap())
        .with_certificate_der(chain, key)
        .expect("server config");
    let addr = server.local_addr().unwrap();

    let server_events = EventLoop::new();
    let server_pump = spawn_pump(server_events.clone());

    let server_task = tokio::spawn(async move {
        let request = server.accept(server_events).await.expect("one connection");
        let session = request.ok().await.expect("accept session");
        session.mark_ready(|_session, _path| true);
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let client = ClientBuilder::new()
        .with_certificate_policy(CertPolicy::pinned_der(pin))
        .build()
        .expect("client config");

    let client_events = EventLoop::new();
    let client_pump = spawn_pump(client_events.clone());

    let url = Url::parse(&format!("https://127.0.0.1:{}/idle", addr.port())).unwrap();
    let session = client.connect(url, client_events).await.expect("connect");

    let stream = session.open_bidi().await.expect("open stream");

    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = counter.clone();
    stream.set_interval(10, move || {
        counter_clone.fetch_add(1, Ordering::SeqCst);
    });

    tokio::time::sleep(Duration::from_millis(500)).await;
    stream.cancel_interval();

    let fired = counter.load(Ordering::SeqCst);
    assert!(fired >= 40 && fired <= 60, "expected 40..=60 fires in 500ms, got {fired}");

    server_task.abort();
    server_pump.abort();
    client_pump.abort();
}
