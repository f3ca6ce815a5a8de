use thiserror::Error;

use crate::db::MaterializeError;

/// Fixed marker prepended to every masked backend failure. Transport layers
/// match on this prefix to select a server-fault (5xx) status; everything
/// else in the taxonomy is client-correctable (4xx).
pub const INTERNAL_ERROR_PREFIX: &str = "Internal Server Error: ";

/// Call-time errors surfaced by [`crate::engine::QueryStore`].
///
/// Validation errors carry the complete set of offending parameter names so
/// a caller can fix the request in one round trip. Backend failures are
/// logged in full internally and replaced with a generic message here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unable to run the undefined service/method requested: {service}/{method}")]
    MethodNotFound { service: String, method: String },

    #[error("unable to run request due to missing required parameter(s): {}", .names.join(", "))]
    MissingParameters { names: Vec<String> },

    #[error("unable to run request due to invalid input parameter(s) detected on request: {}", .names.join(", "))]
    UnexpectedParameters { names: Vec<String> },

    #[error("error decoding value for parameter {name}: {reason}")]
    BindDecode { name: String, reason: String },

    #[error(
        "{INTERNAL_ERROR_PREFIX}A backend system error occurred in the queries service. Please check the logs"
    )]
    Backend,

    #[error("error encountered while processing query results: {source}")]
    Materialize {
        #[source]
        source: MaterializeError,
    },

    #[error("error encountered marshalling results returned for the query: {message}")]
    Serialization { message: String },
}

impl EngineError {
    /// True when the caller can self-correct the request (maps to a 4xx
    /// status at the transport layer).
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            EngineError::MethodNotFound { .. }
                | EngineError::MissingParameters { .. }
                | EngineError::UnexpectedParameters { .. }
                | EngineError::BindDecode { .. }
        )
    }

    /// Best-effort response body to hand a caller alongside this error.
    ///
    /// Materialization and serialization failures happen after a statement
    /// already executed; a caller that ignores the error still gets a
    /// well-formed body rather than malformed JSON.
    pub fn fallback_body(&self) -> Option<Vec<u8>> {
        match self {
            EngineError::Materialize { .. } => Some(b"[]".to_vec()),
            EngineError::Serialization { message } => Some(message.clone().into_bytes()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_starts_with_internal_prefix() {
        let msg = EngineError::Backend.to_string();
        assert!(msg.starts_with(INTERNAL_ERROR_PREFIX));
    }

    #[test]
    fn test_missing_parameters_lists_all_names() {
        let err = EngineError::MissingParameters {
            names: vec!["id".into(), "state".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("id, state"));
    }

    #[test]
    fn test_client_fault_classification() {
        assert!(EngineError::MethodNotFound {
            service: "svc".into(),
            method: "m".into()
        }
        .is_client_fault());
        assert!(EngineError::MissingParameters { names: vec![] }.is_client_fault());
        assert!(EngineError::UnexpectedParameters { names: vec![] }.is_client_fault());
        assert!(EngineError::BindDecode {
            name: "id".into(),
            reason: "bad".into()
        }
        .is_client_fault());
        assert!(!EngineError::Backend.is_client_fault());
        assert!(!EngineError::Serialization {
            message: "oops".into()
        }
        .is_client_fault());
    }

    #[test]
    fn test_fallback_bodies() {
        let err = EngineError::Materialize {
            source: MaterializeError::UnsupportedType {
                type_name: "xml".into(),
            },
        };
        assert_eq!(err.fallback_body().as_deref(), Some(&b"[]"[..]));

        let err = EngineError::Serialization {
            message: "oops".into(),
        };
        assert_eq!(err.fallback_body().as_deref(), Some(&b"oops"[..]));

        assert!(EngineError::Backend.fallback_body().is_none());
    }
}
