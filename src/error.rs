use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Messages RPC providers return when the node behind them is down or
/// overloaded. Retrying the same endpoint rarely helps with these.
static UNHEALTHY_ENDPOINT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)no backend is currently healthy|could not coalesce error|\b(502|503|504)\b|bad gateway|service unavailable|gateway timeout|connection refused|connection reset|error sending request",
    )
    .ok()
});

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("endpoint unhealthy: {0}")]
    Unhealthy(String),

    #[error("rpc request failed: {0}")]
    Transport(String),

    #[error("block {0} not found")]
    BlockNotFound(u64),

    #[error("invalid rpc url: {0}")]
    InvalidUrl(String),

    #[error("at least one rpc url must be provided")]
    NoEndpoints,
}

impl RpcError {
    /// Wraps a raw provider error, sorting it into the unhealthy class when
    /// its message carries one of the known signatures.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let unhealthy = UNHEALTHY_ENDPOINT
            .as_ref()
            .is_some_and(|re| re.is_match(&message));
        if unhealthy {
            RpcError::Unhealthy(message)
        } else {
            RpcError::Transport(message)
        }
    }

    pub fn is_endpoint_unhealthy(&self) -> bool {
        matches!(self, RpcError::Unhealthy(_))
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to open database {path}: {source}")]
    Connect {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database connection is closed")]
    Closed,

    #[error("invalid value in database: {0}")]
    InvalidValue(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("polling was stopped and cannot be restarted")]
    Stopped,
}

impl SyncError {
    pub fn is_endpoint_unhealthy(&self) -> bool {
        matches!(self, SyncError::Rpc(e) if e.is_endpoint_unhealthy())
    }
}

/// Outcomes of a lottery assignment that the API layer maps onto its
/// responses. A conditional update that matches nothing is reported as
/// `Conflict`, never as an internal failure.
#[derive(Error, Debug)]
pub enum AssignError {
    #[error("no matching transfer found")]
    NotFound,

    #[error("transfer {0} is no longer pending")]
    Conflict(String),

    #[error("validation error: {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("internal error: {0}")]
    Internal(#[from] StoreError),
}

impl AssignError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        AssignError::Validation {
            field,
            message: message.into(),
        }
    }
}
