use std::fmt;

/// The single error sum type every fallible pvault operation returns.
///
/// Every crossing of a boundary (blob-store adapter, codec, index parse)
/// converts whatever foreign error it encountered into a `CoreError`,
/// attaching a `context` string describing what was being attempted.
/// Upper layers match on `kind`, never on the source error's concrete type.
#[derive(Debug, thiserror::Error)]
pub struct CoreError {
    kind: ErrorKind,
    context: String,
    #[source]
    source: Option<anyhow::Error>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: context.into(),
            source: None,
        }
    }

    pub fn wrap(kind: ErrorKind, context: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            kind,
            context: context.into(),
            source: Some(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Whether a generic retry wrapper is allowed to retry the call that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::BlobStoreTransient)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.context)
    }
}

/// Error classification used by every layer above the blob-store boundary.
///
/// This is a *kind*, not a source-type tag: two calls that fail for
/// unrelated underlying reasons but the same user-visible reason share a
/// variant here.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    NotFound,
    AuthenticationFailed,
    Corrupted,
    InvalidRange,
    InvalidArgument,
    BlobStoreTransient,
    ImmutableDueToPolicy,
    UpgradeInProgress,
    UpgradeCoordinatorUnavailable,
    RepositoryReadOnly,
    NotOwned,
    Canceled,
    UnknownAlgorithm,
    Unsupported,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::AuthenticationFailed => "authentication failed",
            ErrorKind::Corrupted => "corrupted",
            ErrorKind::InvalidRange => "invalid range",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::BlobStoreTransient => "transient blob store error",
            ErrorKind::ImmutableDueToPolicy => "immutable due to retention policy",
            ErrorKind::UpgradeInProgress => "upgrade in progress",
            ErrorKind::UpgradeCoordinatorUnavailable => "upgrade coordinator unavailable",
            ErrorKind::RepositoryReadOnly => "repository read-only",
            ErrorKind::NotOwned => "maintenance not owned by this host",
            ErrorKind::Canceled => "canceled",
            ErrorKind::UnknownAlgorithm => "unknown algorithm",
            ErrorKind::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_never_retryable() {
        let err = CoreError::new(ErrorKind::NotFound, "content abc123 missing");
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn transient_is_retryable_and_wraps_source() {
        let source = anyhow::anyhow!("connection reset");
        let err = CoreError::wrap(ErrorKind::BlobStoreTransient, "PUT p0123", source);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("PUT p0123"));
    }
}
