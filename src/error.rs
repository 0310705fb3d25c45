use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid seed specifier: {0}")]
    InvalidSpecifier(String),

    #[error("invalid seed URL: {0}")]
    InvalidSeedUrl(String),

    #[error("missing config file maris-rh.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("config missing required seed portal URL")]
    MissingSeedUrl,

    #[error("portal request failed: {0}")]
    PortalHttp(String),

    #[error("portal returned status {status}: {message}")]
    PortalStatus { status: u16, message: String },

    #[error("code search request failed: {0}")]
    CodeSearchHttp(String),

    #[error("code search returned status {status}: {message}")]
    CodeSearchStatus { status: u16, message: String },

    #[error("code search quota exhausted")]
    CodeSearchQuota,

    #[error("records request failed: {0}")]
    RecordsHttp(String),

    #[error("records returned status {status}: {message}")]
    RecordsStatus { status: u16, message: String },

    #[error("fetch failed: {0}")]
    FetchHttp(String),

    #[error("fetch returned status {status}: {message}")]
    FetchStatus { status: u16, message: String },

    #[error("download cancelled")]
    Cancelled,

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl HarvestError {
    pub fn is_transient(&self) -> bool {
        match self {
            HarvestError::PortalHttp(_)
            | HarvestError::CodeSearchHttp(_)
            | HarvestError::RecordsHttp(_)
            | HarvestError::FetchHttp(_) => true,
            HarvestError::PortalStatus { status, .. }
            | HarvestError::CodeSearchStatus { status, .. }
            | HarvestError::RecordsStatus { status, .. }
            | HarvestError::FetchStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        match self {
            HarvestError::CodeSearchQuota => true,
            HarvestError::CodeSearchStatus { status, .. } => matches!(status, 403 | 429),
            HarvestError::PortalStatus { status, .. }
            | HarvestError::RecordsStatus { status, .. }
            | HarvestError::FetchStatus { status, .. } => *status == 429,
            _ => false,
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

pub fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_retry_classes() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(403));
    }

    #[test]
    fn transient_classification() {
        let timeout = HarvestError::FetchHttp("timed out".to_string());
        assert!(timeout.is_transient());

        let not_found = HarvestError::FetchStatus {
            status: 404,
            message: "missing".to_string(),
        };
        assert!(!not_found.is_transient());

        let bad_gateway = HarvestError::FetchStatus {
            status: 502,
            message: "upstream".to_string(),
        };
        assert!(bad_gateway.is_transient());
    }

    #[test]
    fn rate_limit_classification() {
        let quota = HarvestError::CodeSearchQuota;
        assert!(quota.is_rate_limit());

        let forbidden = HarvestError::CodeSearchStatus {
            status: 403,
            message: "API rate limit exceeded".to_string(),
        };
        assert!(forbidden.is_rate_limit());

        let records_forbidden = HarvestError::RecordsStatus {
            status: 403,
            message: "forbidden".to_string(),
        };
        assert!(!records_forbidden.is_rate_limit());
    }
}
