//! Bounded retrieval of remote documents for bagsmith.
//!
//! Profiles and remote mapper modules are referenced by URL. This crate
//! provides the `Fetcher` trait, an HTTP/file implementation (`HttpFetcher`)
//! enforcing a timeout and a maximum body size, and its configuration.

pub mod config;
pub mod http;

pub use config::{FetchConfig, DEFAULT_FETCH_MAX_BYTES, DEFAULT_FETCH_TIMEOUT_SECS};
pub use http::HttpFetcher;

use thiserror::Error;

/// Sent as `User-Agent` on every HTTP request.
pub const USER_AGENT: &str = concat!("bagsmith/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("I/O error reading '{location}': {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("timed out fetching '{0}'")]
    Timeout(String),
    #[error("'{location}' exceeds the maximum size of {limit} bytes")]
    TooLarge { location: String, limit: u64 },
    #[error("unsupported location scheme: {0}")]
    UnsupportedScheme(String),
    #[error("'{0}' is not valid UTF-8")]
    NotUtf8(String),
}

/// Source of documents addressed by location (URL or local path).
pub trait Fetcher: Send + Sync {
    /// Retrieve the raw bytes at `location`.
    fn fetch(&self, location: &str) -> Result<Vec<u8>, RemoteError>;

    /// Retrieve `location` as UTF-8 text.
    fn fetch_text(&self, location: &str) -> Result<String, RemoteError> {
        let bytes = self.fetch(location)?;
        String::from_utf8(bytes).map_err(|_| RemoteError::NotUtf8(location.to_owned()))
    }
}
