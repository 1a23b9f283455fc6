//! HTTP/REST API layer for Stepflow.
//!
//! Axum-based REST API at `/api/v1/` with the envelope response format and
//! CORS support. There is no authentication layer.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
