//! Error types for catalog operations.
//!
//! # Error Handling Strategy
//!
//! Every failure that reaches a consumer is a [`CatalogError`], classified into one
//! of the five [`ErrorKind`] categories. Classification happens in exactly one place:
//! the catalog adapters. The cache layer and the cached service propagate the
//! classified error unchanged.
//!
//! - [`CodecError`]: an identifier did not decode. Adapters report it as
//!   [`ErrorKind::NotFound`], since a malformed id cannot name an existing entity.
//!
//! - [`CacheError`]: a cache backend failed. It never escapes
//!   [`crate::cache::CacheStore`], which degrades to a cache miss instead.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Client-facing failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credential rejected or expired.
    Auth,
    /// Entity absent upstream, or identifier malformed.
    NotFound,
    /// Upstream did not respond within budget.
    Timeout,
    /// Any other upstream-reported failure, including malformed responses.
    Upstream,
    /// Caller input failed local validation and never reached upstream.
    InvalidArgument,
}

impl ErrorKind {
    /// Stable wire name, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::Upstream => "upstream",
            Self::InvalidArgument => "invalid_argument",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified catalog failure.
///
/// Cloneable so a single in-flight fetch can hand the same outcome to every
/// waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct CatalogError {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human-readable error message.
    pub message: String,
    /// Upstream request identifier, when the upstream response carried one.
    pub request_id: Option<String>,
}

impl CatalogError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            request_id: None,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Attaches the upstream request identifier, if any.
    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Convenience alias for catalog results.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Identifier decoding failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("invalid identifier '{id}': {reason}")]
    InvalidIdentifier { id: String, reason: &'static str },
}

impl From<CodecError> for CatalogError {
    fn from(err: CodecError) -> Self {
        CatalogError::not_found(err.to_string())
    }
}

/// Cache backend failure. Only ever observed by the cache store itself.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache backend error: {0}")]
    Backend(String),
}
