use thiserror::Error;

/// Ledger client errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Transport-level errors (network, connection, timeout)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    /// Non-success HTTP status
    #[error("HTTP status {status} (endpoint: {endpoint})")]
    Http { endpoint: String, status: u16 },

    /// Response body could not be decoded
    #[error("Decode error: {message} (endpoint: {endpoint})")]
    Decode { endpoint: String, message: String },

    /// The node answered with an application-level error
    #[error("Node error {code}: {message}")]
    Node { code: String, message: String },

    /// The node does not implement the energy estimation call
    #[error("Node does not support estimate energy")]
    EstimateEnergyUnsupported,
}

impl LedgerError {
    /// Check if retrying the same call might succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Transport { .. } => true,
            LedgerError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            LedgerError::Decode { .. } => false,
            LedgerError::Node { .. } => false,
            LedgerError::EstimateEnergyUnsupported => false,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            LedgerError::Transport { .. } => "transport",
            LedgerError::Http { .. } => "http",
            LedgerError::Decode { .. } => "decode",
            LedgerError::Node { .. } => "node",
            LedgerError::EstimateEnergyUnsupported => "unsupported",
        }
    }
}
