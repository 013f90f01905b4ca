/**
 * Helper functions for creating common error types
 */
use crate::error::Error;
use std::path::Path;

/// Create an error for a store whose cluster directory cannot be prepared
#[must_use]
pub fn cache_dir_error(dir: &Path, source: &std::io::Error) -> Error {
    Error::Custom(format!("cannot create cache directory {}: {source}", dir.display()))
}

/// Create an error for a response that carries no `Last-Modified` header
#[must_use]
pub fn missing_last_modified_error(resource: &str) -> Error {
    Error::Custom(format!("no Last-Modified header in response for {resource}"))
}

/// Create an error for a `Last-Modified` value that does not follow the HTTP date format
#[must_use]
pub fn invalid_last_modified_error(value: &str, reason: impl std::fmt::Display) -> Error {
    Error::Custom(format!("invalid lastModified timestamp {value:?}: {reason}"))
}

/// Create an error for a non-success HTTP status from the remote cache endpoint
#[must_use]
pub fn unexpected_status_error(url: &str, status: reqwest::StatusCode) -> Error {
    Error::Custom(format!("unexpected status {status} from {url}"))
}
