//! Administrative HTTP API
//!
//! | Route | Method | Purpose |
//! |-------|--------|---------|
//! | `/generate-cert` | POST | Issue (or reissue) a certificate |
//! | `/test` | any | Whether the `Host` domain has a certificate |
//! | `/metrics` | GET | Prometheus text exposition |

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{CONTENT_TYPE, HOST};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use snicert_common::DomainName;

use crate::error::{IssuanceError, IssuanceFailure};
use crate::issuance::{IssuanceCoordinator, IssuanceProvider};
use crate::metrics::Metrics;

/// `POST /generate-cert` body
#[derive(Debug, Deserialize)]
pub struct GenerateCertRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub domain: String,
}

/// `POST /generate-cert` success body
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateCertResponse {
    pub message: String,
    pub domain: String,
    pub email: String,
    pub issued_at: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

/// Request router for the administrative endpoints
pub struct AdminApi<P: IssuanceProvider> {
    coordinator: IssuanceCoordinator<P>,
    metrics: Option<Arc<Metrics>>,
    max_body_bytes: usize,
}

impl<P: IssuanceProvider> AdminApi<P> {
    pub fn new(coordinator: IssuanceCoordinator<P>, max_body_bytes: usize) -> Self {
        Self {
            coordinator,
            metrics: None,
            max_body_bytes,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        debug!(method = %req.method(), path = %req.uri().path(), "Admin request");

        match req.uri().path() {
            "/generate-cert" => {
                if req.method() != Method::POST {
                    return error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
                }
                self.generate_cert(req).await
            }
            "/test" => self.test_domain(&req),
            "/metrics" if req.method() == Method::GET => match &self.metrics {
                Some(metrics) => text_response(StatusCode::OK, metrics.render()),
                None => error_response(StatusCode::NOT_FOUND, "Metrics disabled"),
            },
            _ => error_response(StatusCode::NOT_FOUND, "Not found"),
        }
    }

    async fn generate_cert<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let body = match Limited::new(req.into_body(), self.max_body_bytes)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read request body: {e}"),
                )
            }
        };

        let request: GenerateCertRequest = match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, format!("Invalid JSON: {e}"))
            }
        };

        let email = request.email.trim();
        let domain = request.domain.trim();
        if email.is_empty() || domain.is_empty() {
            return error_response(StatusCode::BAD_REQUEST, "Email and domain are required");
        }
        let domain = match DomainName::parse(domain) {
            Ok(domain) => domain,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        };

        info!(domain = %domain, email = %email, "Certificate requested");

        match self.coordinator.issue(domain, email).await {
            Ok(record) => json_response(
                StatusCode::OK,
                &GenerateCertResponse {
                    message: "Certificate created successfully".to_string(),
                    domain: record.domain().to_string(),
                    email: record.email().to_string(),
                    issued_at: record.issued_at(),
                    not_after: record.not_after(),
                },
            ),
            Err(e) => issuance_error_response(&e),
        }
    }

    fn test_domain<B>(&self, req: &Request<B>) -> Response<Full<Bytes>> {
        let Some(host) = request_host(req) else {
            return error_response(StatusCode::BAD_REQUEST, "Missing Host header");
        };

        let domain = match DomainName::parse(host) {
            Ok(domain) => domain,
            Err(_) => {
                return error_response(StatusCode::NOT_FOUND, format!("Domain {host} is not registered"))
            }
        };

        match self.coordinator.store().get(&domain) {
            Ok(Some(_)) => json_response(
                StatusCode::OK,
                &serde_json::json!({
                    "message": format!("Domain {domain} is active and registered"),
                }),
            ),
            Ok(None) => {
                error_response(StatusCode::NOT_FOUND, format!("Domain {domain} is not registered"))
            }
            Err(e) => {
                warn!(domain = %domain, error = %e, "Record lookup failed");
                error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
        }
    }
}

impl<P: IssuanceProvider> std::fmt::Debug for AdminApi<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminApi")
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}

/// `Host` header, else the URI authority (HTTP/2)
fn request_host<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .map(str::trim)
        .filter(|h| !h.is_empty())
}

/// HTTP status for an issuance failure
pub fn issuance_status(failure: &IssuanceFailure) -> StatusCode {
    match failure {
        IssuanceFailure::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        IssuanceFailure::ProviderRejected(_) | IssuanceFailure::ValidationFailed(_) => {
            StatusCode::BAD_GATEWAY
        }
        IssuanceFailure::Store(_) | IssuanceFailure::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        IssuanceFailure::KeyGenerationFailed(_)
        | IssuanceFailure::InvalidMaterial(_)
        | IssuanceFailure::Abandoned => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn issuance_error_response(err: &IssuanceError) -> Response<Full<Bytes>> {
    json_response(
        issuance_status(&err.cause),
        &ErrorResponse {
            error: err.to_string(),
            domain: Some(err.domain.to_string()),
            cause: Some(err.cause.kind().to_string()),
        },
    )
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response<Full<Bytes>> {
    json_response(
        status,
        &ErrorResponse {
            error: message.into(),
            domain: None,
            cause: None,
        },
    )
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(bytes) => {
            let mut response = Response::new(Full::new(Bytes::from(bytes)));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => text_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode response: {e}\n"),
        ),
    }
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}
