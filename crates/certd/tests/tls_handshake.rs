//! Certificate selection over real TLS connections

mod common;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use snicert::acme::ChallengeManager;
use snicert::{App, CertificateRecord, MemoryRecordStore, RecordStore};
use snicert_config::Config;

use common::{domain, material_for, ScriptedProvider};

#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn connector() -> TlsConnector {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

async fn connect(addr: std::net::SocketAddr, name: ServerName<'static>) -> TlsStream<TcpStream> {
    let tcp = TcpStream::connect(addr).await.unwrap();
    connector().connect(name, tcp).await.unwrap()
}

fn peer_leaf(stream: &TlsStream<TcpStream>) -> CertificateDer<'static> {
    stream.get_ref().1.peer_certificates().unwrap()[0].clone().into_owned()
}

fn dns(name: &str) -> ServerName<'static> {
    ServerName::try_from(name.to_string()).unwrap()
}

/// Send a request and return the status line
async fn status_line(stream: &mut TlsStream<TcpStream>, path: &str, host: &str) -> String {
    let request = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    while !received.windows(2).any(|w| w == b"\r\n") {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "connection closed before a response");
        received.extend_from_slice(&buf[..n]);
    }
    let text = String::from_utf8_lossy(&received);
    text.lines().next().unwrap_or_default().to_string()
}

#[tokio::test]
async fn handshake_presents_certificate_by_server_name() {
    let store = Arc::new(MemoryRecordStore::new());
    let record = store
        .put(
            CertificateRecord::new(
                domain("example.test"),
                "a@b.test",
                material_for("example.test", 60),
            )
            .unwrap(),
        )
        .unwrap();

    let mut config = Config::default();
    config.renewal.initial_delay_secs = 3600;
    config.server.shutdown_grace_secs = 1;

    let app = App::with_parts(
        config,
        store,
        ScriptedProvider::new(90),
        ChallengeManager::new(),
    )
    .unwrap();
    let default_leaf = app.default_certificate().certified_key().cert[0].clone();
    let domain_leaf = record.material().certified_key().unwrap().cert[0].clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(app.run_with_listeners(listener, None, shutdown.clone()));

    let mut known = connect(addr, dns("example.test")).await;
    assert_eq!(peer_leaf(&known), domain_leaf);
    assert_eq!(
        status_line(&mut known, "/test", "example.test").await,
        "HTTP/1.1 200 OK"
    );

    let mut unknown = connect(addr, dns("unknown.test")).await;
    assert_eq!(peer_leaf(&unknown), default_leaf);
    assert_eq!(
        status_line(&mut unknown, "/test", "unknown.test").await,
        "HTTP/1.1 404 Not Found"
    );

    // IP literals carry no SNI extension
    let no_sni = connect(addr, ServerName::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST).into())).await;
    assert_eq!(peer_leaf(&no_sni), default_leaf);

    drop((known, unknown, no_sni));
    shutdown.cancel();
    server.await.unwrap().unwrap();
}
