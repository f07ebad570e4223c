//! HTTP-01 challenge responses
//!
//! Pending challenges are published at
//! `/.well-known/acme-challenge/<token>` on the challenge listener while an
//! order is being validated.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Token to key-authorization table shared by the provider and the listener
#[derive(Debug, Clone, Default)]
pub struct ChallengeManager {
    challenges: Arc<DashMap<String, String>>,
}

impl ChallengeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the response for `token`
    pub fn add_challenge(&self, token: &str, key_authorization: &str) {
        debug!(token = %token, "Registering ACME HTTP-01 challenge");
        self.challenges
            .insert(token.to_string(), key_authorization.to_string());
    }

    pub fn remove_challenge(&self, token: &str) {
        if self.challenges.remove(token).is_some() {
            debug!(token = %token, "Removed ACME challenge");
        }
    }

    pub fn get_response(&self, token: &str) -> Option<String> {
        self.challenges.get(token).map(|v| v.clone())
    }

    /// The token in a challenge request path
    pub fn extract_token(path: &str) -> Option<&str> {
        path.strip_prefix(ACME_CHALLENGE_PREFIX)
            .filter(|token| !token.is_empty() && !token.contains('/'))
    }

    pub fn pending_count(&self) -> usize {
        self.challenges.len()
    }

    /// Answer one request on the challenge listener
    pub fn respond<B>(&self, req: &Request<B>) -> Response<Full<Bytes>> {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n");
        }

        let Some(token) = Self::extract_token(req.uri().path()) else {
            return text_response(StatusCode::NOT_FOUND, "not found\n");
        };

        match self.get_response(token) {
            Some(key_authorization) => {
                trace!(token = %token, "Serving ACME challenge response");
                text_response(StatusCode::OK, key_authorization)
            }
            None => {
                trace!(token = %token, "ACME challenge token not found");
                text_response(StatusCode::NOT_FOUND, "not found\n")
            }
        }
    }
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain"),
    );
    response
}

/// Serve HTTP-01 challenges on `listener` until `shutdown` is cancelled
pub async fn serve_http01(
    listener: TcpListener,
    manager: ChallengeManager,
    shutdown: CancellationToken,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Serving ACME HTTP-01 challenges");
    }

    loop {
        let (stream, peer) = tokio::select! {
            result = listener.accept() => match result {
                Ok(v) => v,
                Err(e) => {
                    debug!(error = %e, "Challenge listener accept error");
                    continue;
                }
            },
            _ = shutdown.cancelled() => break,
        };

        let manager = manager.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let response = manager.respond(&req);
                async move { Ok::<_, Infallible>(response) }
            });

            let conn = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service);
            tokio::pin!(conn);

            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(e) = result {
                        debug!(addr = %peer, error = %e, "Challenge connection error");
                    }
                }
                _ = shutdown.cancelled() => conn.as_mut().graceful_shutdown(),
            }
        });
    }

    debug!("Challenge listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(path: &str) -> Request<()> {
        Request::builder().uri(path).body(()).unwrap()
    }

    #[test]
    fn test_add_and_get_challenge() {
        let manager = ChallengeManager::new();
        manager.add_challenge("test-token", "test-key-auth");
        assert_eq!(manager.get_response("test-token"), Some("test-key-auth".to_string()));

        manager.remove_challenge("test-token");
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(manager.get_response("test-token"), None);
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(
            ChallengeManager::extract_token("/.well-known/acme-challenge/abc123"),
            Some("abc123")
        );
        assert_eq!(ChallengeManager::extract_token("/.well-known/acme-challenge/"), None);
        assert_eq!(ChallengeManager::extract_token("/.well-known/acme-challenge/a/b"), None);
        assert_eq!(ChallengeManager::extract_token("/other/path"), None);
    }

    #[test]
    fn test_clone_shares_state() {
        let manager = ChallengeManager::new();
        let other = manager.clone();
        manager.add_challenge("token", "auth");
        assert_eq!(other.get_response("token"), Some("auth".to_string()));
    }

    #[test]
    fn test_respond() {
        let manager = ChallengeManager::new();
        manager.add_challenge("tok", "tok.thumbprint");

        let found = manager.respond(&get("/.well-known/acme-challenge/tok"));
        assert_eq!(found.status(), StatusCode::OK);

        let missing = manager.respond(&get("/.well-known/acme-challenge/other"));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let elsewhere = manager.respond(&get("/"));
        assert_eq!(elsewhere.status(), StatusCode::NOT_FOUND);

        let post = Request::builder()
            .method(Method::POST)
            .uri("/.well-known/acme-challenge/tok")
            .body(())
            .unwrap();
        assert_eq!(manager.respond(&post).status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
