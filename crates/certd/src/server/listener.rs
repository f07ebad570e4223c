//! HTTPS listener
//!
//! Certificate selection happens per handshake through the injected
//! resolver; everything after the handshake is plain HTTP handled by the
//! admin API.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ServerBuilder;
use rustls::server::ResolvesServerCert;
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use snicert_config::TlsVersion;

/// Build the rustls configuration used by the listener
///
/// TLS 1.2 is the lowest version ever negotiated; `min_version` can raise it
/// to 1.3.
pub fn tls_server_config(
    resolver: Arc<dyn ResolvesServerCert>,
    min_version: TlsVersion,
) -> Result<ServerConfig, rustls::Error> {
    let versions: &[&'static rustls::SupportedProtocolVersion] = match min_version {
        TlsVersion::Tls12 => &[&rustls::version::TLS13, &rustls::version::TLS12],
        TlsVersion::Tls13 => &[&rustls::version::TLS13],
    };

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(versions)?
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

/// Accept loop for the HTTPS server
///
/// Each connection completes the TLS handshake, then is served by `handler`.
/// Handshake failures are logged and never stop the loop. On shutdown,
/// connections get `grace` to finish in-flight requests.
pub async fn serve_tls<H, Fut>(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    handler: H,
    shutdown: CancellationToken,
    grace: Duration,
) where
    H: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "HTTPS listener started");
    }

    let connections = TaskTracker::new();

    loop {
        let (stream, peer) = tokio::select! {
            result = listener.accept() => match result {
                Ok(v) => v,
                Err(e) => {
                    debug!(error = %e, "HTTPS accept error");
                    continue;
                }
            },
            _ = shutdown.cancelled() => break,
        };

        let acceptor = acceptor.clone();
        let handler = handler.clone();
        let shutdown = shutdown.clone();

        connections.spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    debug!(addr = %peer, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let service = service_fn(move |req: Request<Incoming>| {
                let handler = handler.clone();
                async move { Ok::<_, Infallible>(handler(req).await) }
            });

            let builder = ServerBuilder::new(TokioExecutor::new());
            let conn = builder.serve_connection(TokioIo::new(tls_stream), service);
            tokio::pin!(conn);

            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(e) = result {
                        debug!(addr = %peer, error = %e, "HTTPS connection error");
                    }
                }
                _ = shutdown.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    match tokio::time::timeout(grace, conn).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => debug!(addr = %peer, error = %e, "HTTPS drain error"),
                        Err(_) => debug!(addr = %peer, "HTTPS drain timeout"),
                    }
                }
            }
        });
    }

    connections.close();
    if tokio::time::timeout(grace, connections.wait()).await.is_err() {
        warn!(
            remaining = connections.len(),
            "HTTPS connections still open after grace period"
        );
    }
    info!("HTTPS listener stopped");
}
