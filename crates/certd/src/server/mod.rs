//! Network surface: the HTTPS listener and the admin API it serves

mod admin;
mod listener;

pub use admin::{issuance_status, AdminApi, ErrorResponse, GenerateCertRequest, GenerateCertResponse};
pub use listener::{serve_tls, tls_server_config};
