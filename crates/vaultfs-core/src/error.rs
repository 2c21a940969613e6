//! Unified application error types for vaultfs.
//!
//! All crates map their internal errors into [`AppError`] for consistent
//! propagation through the ? operator. The [`ErrorKind`] decides both how
//! the broker treats a failure (retry or not) and what a user gets to see.

use std::fmt;
use thiserror::Error;

/// Text shown to users for every backend or internal failure.
pub const STORAGE_UNAVAILABLE_MESSAGE: &str = "storage temporarily unavailable";

/// Top-level error kind categorization used across the entire engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// A file, entity, policy, session, link or job does not exist.
    NotFound,
    /// Ownership or ACL violation.
    Forbidden,
    /// The operation does not apply to the target (e.g. downloading a directory).
    InvalidOperation,
    /// Input validation failed.
    Validation,
    /// A name collision or concurrent modification.
    Conflict,
    /// A signed URL or token failed verification.
    SignatureInvalid,
    /// A signed URL or token is past its expiry.
    LinkExpired,
    /// The provider has no native implementation of the requested feature.
    FeatureNotSupported,
    /// The owner's storage quota would be exceeded.
    QuotaExceeded,
    /// Transient backend failure (timeouts, 5xx, rate limits).
    BackendUnavailable,
    /// Assembled upload disagrees with its declared size or hash.
    ChecksumMismatch,
    /// A metadata store error occurred.
    Database,
    /// A configuration error occurred.
    Configuration,
    /// A serialization/deserialization error occurred.
    Serialization,
    /// The request was cancelled before the operation finished.
    Cancelled,
    /// An internal error occurred.
    Internal,
}

impl ErrorKind {
    /// Return the stable upper-case code for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::InvalidOperation => "INVALID_OPERATION",
            Self::Validation => "VALIDATION",
            Self::Conflict => "CONFLICT",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::LinkExpired => "LINK_EXPIRED",
            Self::FeatureNotSupported => "FEATURE_NOT_SUPPORTED",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::BackendUnavailable => "BACKEND_UNAVAILABLE",
            Self::ChecksumMismatch => "CHECKSUM_MISMATCH",
            Self::Database => "DATABASE",
            Self::Configuration => "CONFIGURATION",
            Self::Serialization => "SERIALIZATION",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unified application error used throughout vaultfs.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    /// The category of error.
    pub kind: ErrorKind,
    /// A human-readable error message. May contain internal detail.
    pub message: String,
    /// Optional underlying cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new application error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new application error with an underlying cause.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Create a forbidden error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// Create an invalid-operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidOperation, message)
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Create a signature-invalid error.
    pub fn signature_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SignatureInvalid, message)
    }

    /// Create a link-expired error.
    pub fn link_expired(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LinkExpired, message)
    }

    /// Create a feature-not-supported error.
    pub fn feature_not_supported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FeatureNotSupported, message)
    }

    /// Create a quota-exceeded error.
    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, message)
    }

    /// Create a backend-unavailable error.
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendUnavailable, message)
    }

    /// Create a checksum-mismatch error.
    pub fn checksum_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ChecksumMismatch, message)
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Create a cancelled error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Whether this error is worth retrying later.
    ///
    /// Background jobs retry transient errors with backoff; request-path
    /// callers get them immediately and decide for themselves.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::BackendUnavailable | ErrorKind::Database)
    }

    /// Whether this error has the given kind.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// The message safe to show to an end user.
    ///
    /// Quota, permission and input errors keep their specific reason.
    /// Backend, database and internal failures collapse to a generic text
    /// so credentials and physical paths never leak.
    pub fn public_message(&self) -> String {
        match self.kind {
            ErrorKind::NotFound
            | ErrorKind::Forbidden
            | ErrorKind::InvalidOperation
            | ErrorKind::Validation
            | ErrorKind::Conflict
            | ErrorKind::SignatureInvalid
            | ErrorKind::LinkExpired
            | ErrorKind::FeatureNotSupported
            | ErrorKind::QuotaExceeded
            | ErrorKind::ChecksumMismatch
            | ErrorKind::Cancelled => self.message.clone(),
            ErrorKind::BackendUnavailable
            | ErrorKind::Database
            | ErrorKind::Configuration
            | ErrorKind::Serialization
            | ErrorKind::Internal => STORAGE_UNAVAILABLE_MESSAGE.to_string(),
        }
    }
}

impl Clone for AppError {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            source: None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(
            ErrorKind::Serialization,
            format!("JSON serialization error: {err}"),
            err,
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::Forbidden,
            _ => ErrorKind::BackendUnavailable,
        };
        Self::with_source(kind, format!("I/O error: {err}"), err)
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_source(
            ErrorKind::Configuration,
            format!("Configuration error: {err}"),
            err,
        )
    }
}
