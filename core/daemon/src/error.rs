//! Error types for the daemon.
//!
//! Every variant here is per-event or per-startup. Nothing in this module is
//! fatal to a running daemon: ingestion errors are logged and the event is
//! dropped.

use std::path::PathBuf;

use formtrace_protocol::ErrorInfo;

// ═══════════════════════════════════════════════════════════════════════════════
// Session Store
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("session {session_id} not found for {website_url}")]
    NotFound {
        website_url: String,
        session_id: String,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event Ingestion
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    /// Body was not JSON, or a required field was missing, empty or mistyped.
    #[error("bad request ({}): {}", .0.code, .0.message)]
    BadRequest(ErrorInfo),

    #[error("method {method} not allowed on {path}")]
    MethodNotAllowed { method: String, path: String },

    #[error("session {session_id} not found for {website_url}")]
    SessionNotFound {
        website_url: String,
        session_id: String,
    },
}

impl IngestError {
    pub fn code(&self) -> &str {
        match self {
            IngestError::BadRequest(info) => &info.code,
            IngestError::MethodNotAllowed { .. } => "method_not_allowed",
            IngestError::SessionNotFound { .. } => "session_not_found",
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            IngestError::BadRequest(info) => info.clone(),
            other => ErrorInfo::new(other.code(), other.to_string()),
        }
    }
}

impl From<ErrorInfo> for IngestError {
    fn from(info: ErrorInfo) -> Self {
        IngestError::BadRequest(info)
    }
}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound {
                website_url,
                session_id,
            } => IngestError::SessionNotFound {
                website_url,
                session_id,
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Home directory not found")]
    HomeNotFound,

    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid listen address {addr}: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_session_not_found() {
        let err: IngestError = StoreError::NotFound {
            website_url: "site.com".to_string(),
            session_id: "xyz".to_string(),
        }
        .into();
        assert_eq!(err.code(), "session_not_found");
        assert_eq!(
            err.to_error_info().message,
            "session xyz not found for site.com"
        );
    }

    #[test]
    fn bad_request_keeps_validation_code() {
        let err = IngestError::from(ErrorInfo::new("missing_field", "formId is required"));
        assert_eq!(err.code(), "missing_field");
        assert_eq!(err.to_error_info().message, "formId is required");
    }
}
