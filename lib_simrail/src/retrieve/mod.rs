//! # Data Retrieval Module
//!
//! Generic HTTP plumbing shared by every upstream call. Retries with
//! exponential backoff live here so that the source client only deals with
//! payload shapes.

/// HTTP API client with retry middleware.
pub mod ky_http;

pub use ky_http::{ApiClient, ApiResponse};
