use thiserror::Error;

/// Precondition failures detected before any probe is dispatched.
///
/// Per-unit network failures (refused, timed out, unreachable) never surface as errors;
/// they simply produce no result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("could not resolve host: {host}")]
    UnresolvableHost { host: String },

    #[error("no ports to scan")]
    EmptyPortList,

    #[error("invalid port list: {0}")]
    InvalidPorts(String),

    #[error("invalid pacing bounds: {0}")]
    InvalidPacing(String),

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("invalid target expression: {0}")]
    InvalidTarget(String),
}

pub type ScanResult<T> = std::result::Result<T, ScanError>;
