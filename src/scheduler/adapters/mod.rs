//! Adapter implementations for scheduler ports.
//!
//! [`memory`] backs tests and local runs; [`github`] and [`gemini`] talk to
//! the hosted services over HTTP.

pub mod gemini;
pub mod github;
pub mod memory;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;

/// Errors raised while constructing an HTTP adapter.
#[derive(Debug, Error)]
pub enum HttpClientError {
    /// A configured credential cannot be sent as a header.
    #[error("invalid value for header '{0}'")]
    InvalidHeader(&'static str),
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Inserts a header; `name` must be lower case.
fn insert_header(
    headers: &mut HeaderMap,
    name: &'static str,
    value: &str,
    sensitive: bool,
) -> Result<(), HttpClientError> {
    let mut header_value =
        HeaderValue::from_str(value).map_err(|_| HttpClientError::InvalidHeader(name))?;
    header_value.set_sensitive(sensitive);
    headers.insert(HeaderName::from_static(name), header_value);
    Ok(())
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
