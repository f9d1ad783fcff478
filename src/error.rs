//! Error types for the chartconv library.
//!
//! Three layers mirror the three places a conversion can go wrong:
//!
//! * [`FetchError`]: a single resource fetch was denied by the access
//!   policy or failed in transport. Produced by
//!   [`crate::access::ResourceFetcher`].
//!
//! * [`EngineError`]: returned by a [`crate::engine::ConversionEngine`].
//!   Either a fetch error bubbled up through the engine, or the engine itself
//!   rejected the spec.
//!
//! * [`ConvertError`]: what callers of [`crate::Converter`] and
//!   [`crate::AsyncConverter`] see. Every lower-level error maps onto exactly
//!   one variant, so a permission problem is always distinguishable from a
//!   broken network or a bad spec.

use thiserror::Error;

/// All errors returned by the public conversion and configuration API.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Policy errors ─────────────────────────────────────────────────────
    /// A resource was denied by the access policy or the filesystem sandbox.
    ///
    /// Never retried. The resource is unreachable under the current policy.
    #[error("Access denied: {reason}")]
    PermissionDenied { reason: String },

    // ── Caller errors ─────────────────────────────────────────────────────
    /// A configuration value or per-call option is malformed.
    ///
    /// Raised before any work is submitted to the pool.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ── Transport errors ──────────────────────────────────────────────────
    /// A network or filesystem fetch failed for reasons other than policy.
    #[error("Failed to load '{resource}': {reason}")]
    TransportFailure { resource: String, reason: String },

    // ── Engine errors ─────────────────────────────────────────────────────
    /// The conversion engine rejected the spec.
    #[error("Conversion failed: {0}")]
    EngineFailure(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Worker-side failure unrelated to the request (engine panic, worker
    /// thread could not be spawned, worker vanished before replying).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// `true` for [`ConvertError::PermissionDenied`].
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, ConvertError::PermissionDenied { .. })
    }

    /// `true` for [`ConvertError::InvalidArgument`].
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, ConvertError::InvalidArgument(_))
    }
}

/// Failure of a single resource fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The access policy denied the resource (initial request or a redirect hop).
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The resource was allowed but could not be retrieved.
    #[error("failed to load '{resource}': {reason}")]
    Transport { resource: String, reason: String },
}

impl FetchError {
    pub(crate) fn transport(resource: impl Into<String>, reason: impl ToString) -> Self {
        FetchError::Transport {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }
}

/// Error returned by a [`crate::engine::ConversionEngine`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// A resource fetch failed while the engine was running.
    #[error(transparent)]
    Resource(#[from] FetchError),

    /// The engine could not compile or render the input.
    #[error("{0}")]
    Failed(String),
}

impl EngineError {
    pub fn failed(message: impl Into<String>) -> Self {
        EngineError::Failed(message.into())
    }
}

impl From<FetchError> for ConvertError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::AccessDenied(reason) => ConvertError::PermissionDenied { reason },
            FetchError::Transport { resource, reason } => {
                ConvertError::TransportFailure { resource, reason }
            }
        }
    }
}

impl From<EngineError> for ConvertError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Resource(fetch) => fetch.into(),
            EngineError::Failed(message) => ConvertError::EngineFailure(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_display() {
        let e = ConvertError::PermissionDenied {
            reason: "HTTP access disabled".into(),
        };
        assert!(e.to_string().contains("HTTP access disabled"));
        assert!(e.is_permission_denied());
        assert!(!e.is_invalid_argument());
    }

    #[test]
    fn transport_failure_display() {
        let e = ConvertError::TransportFailure {
            resource: "http://example.com/data.csv".into(),
            reason: "HTTP 404 Not Found".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("example.com/data.csv"), "got: {msg}");
        assert!(msg.contains("404"), "got: {msg}");
    }

    #[test]
    fn fetch_denial_maps_to_permission_denied() {
        let e: ConvertError = FetchError::AccessDenied("outside filesystem_root".into()).into();
        assert!(e.is_permission_denied());
    }

    #[test]
    fn engine_resource_error_keeps_its_kind() {
        let denied: ConvertError =
            EngineError::from(FetchError::AccessDenied("nope".into())).into();
        assert!(denied.is_permission_denied());

        let transport: ConvertError =
            EngineError::from(FetchError::transport("file:///x.csv", "not found")).into();
        assert!(matches!(transport, ConvertError::TransportFailure { .. }));
    }

    #[test]
    fn engine_failure_carries_message() {
        let e: ConvertError = EngineError::failed("unknown mark type 'blob'").into();
        match e {
            ConvertError::EngineFailure(msg) => assert!(msg.contains("blob")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
