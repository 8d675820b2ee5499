//! Transaction records, the state machine, and the external status view

use crate::address::TronAddress;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle state of a managed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxState {
    Pending,
    Broadcasted,
    Confirmed,
    Finalized,
    Errored,
    FatallyErrored,
}

impl TxState {
    pub const ALL: [TxState; 6] = [
        TxState::Pending,
        TxState::Broadcasted,
        TxState::Confirmed,
        TxState::Finalized,
        TxState::Errored,
        TxState::FatallyErrored,
    ];

    /// Transition table. `Errored -> Broadcasted` is the rebroadcast edge.
    pub fn can_transition_to(self, to: TxState) -> bool {
        use TxState::*;
        matches!(
            (self, to),
            (Pending, Broadcasted)
                | (Pending, Errored)
                | (Pending, FatallyErrored)
                | (Broadcasted, Confirmed)
                | (Broadcasted, Errored)
                | (Confirmed, Finalized)
                | (Confirmed, FatallyErrored)
                | (Confirmed, Broadcasted)
                | (Errored, FatallyErrored)
                | (Errored, Broadcasted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TxState::Finalized | TxState::FatallyErrored)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TxState::Pending => "Pending",
            TxState::Broadcasted => "Broadcasted",
            TxState::Confirmed => "Confirmed",
            TxState::Finalized => "Finalized",
            TxState::Errored => "Errored",
            TxState::FatallyErrored => "FatallyErrored",
        }
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse status handed to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    Unknown,
    Pending,
    Unconfirmed,
    Finalized,
    Fatal,
}

impl From<TxState> for TransactionStatus {
    fn from(state: TxState) -> Self {
        match state {
            TxState::Pending | TxState::Errored => TransactionStatus::Pending,
            TxState::Broadcasted | TxState::Confirmed => TransactionStatus::Unconfirmed,
            TxState::Finalized => TransactionStatus::Finalized,
            TxState::FatallyErrored => TransactionStatus::Fatal,
        }
    }
}

/// Cross-cutting correlation data attached to a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMeta {
    #[serde(default)]
    pub message_ids: Option<Vec<String>>,
}

impl TxMeta {
    /// The single correlated message id, if there is exactly one
    pub fn single_message_id(&self) -> Option<&str> {
        match self.message_ids.as_deref() {
            Some([id]) => Some(id.as_str()),
            _ => None,
        }
    }
}

/// Caller's description of a contract call to submit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRequest {
    /// Generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub from: TronAddress,
    pub contract: TronAddress,
    pub method: String,
    /// Flat `[type, value, ...]` list
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    pub meta: Option<TxMeta>,
}

impl TxRequest {
    pub fn new(from: TronAddress, contract: TronAddress, method: impl Into<String>) -> Self {
        Self {
            id: None,
            from,
            contract,
            method: method.into(),
            params: Vec::new(),
            meta: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_meta(mut self, meta: TxMeta) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// One logical transaction and its retry counters
#[derive(Debug, Clone, PartialEq)]
pub struct TronTx {
    pub id: String,
    pub from_address: TronAddress,
    pub contract_address: TronAddress,
    pub method: String,
    pub params: Vec<Value>,
    /// Starts at 1
    pub attempt: u32,
    pub energy_bump_times: u32,
    pub out_of_time_errors: u32,
    pub create_ts: DateTime<Utc>,
    pub state: TxState,
    pub meta: Option<TxMeta>,
    pub idempotency_key: Option<String>,
}

impl TronTx {
    pub fn new(id: String, request: TxRequest) -> Self {
        Self {
            id,
            from_address: request.from,
            contract_address: request.contract,
            method: request.method,
            params: request.params,
            attempt: 1,
            energy_bump_times: 0,
            out_of_time_errors: 0,
            create_ts: Utc::now(),
            state: TxState::Pending,
            meta: request.meta,
            idempotency_key: None,
        }
    }
}

/// External message-status lookup used to build idempotency keys
#[async_trait]
pub trait StatusChecker: Send + Sync {
    /// Statuses of transactions already sent for `message_id`, and how many
    /// times the message has been retried
    async fn check_message_status(
        &self,
        message_id: &str,
    ) -> anyhow::Result<(Vec<TransactionStatus>, u32)>;
}

/// `"{message_id}-{retry_count + 1}"`
pub fn idempotency_key(message_id: &str, retry_count: u32) -> String {
    format!("{}-{}", message_id, retry_count.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in [TxState::Finalized, TxState::FatallyErrored] {
            for to in TxState::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_transition_table_size() {
        let allowed = TxState::ALL
            .iter()
            .flat_map(|a| TxState::ALL.iter().map(move |b| (*a, *b)))
            .filter(|(a, b)| a.can_transition_to(*b))
            .count();
        assert_eq!(allowed, 10);
        assert!(!TxState::Broadcasted.can_transition_to(TxState::FatallyErrored));
        assert!(!TxState::Pending.can_transition_to(TxState::Pending));
    }

    #[test]
    fn test_external_status_mapping() {
        assert_eq!(TransactionStatus::from(TxState::Errored), TransactionStatus::Pending);
        assert_eq!(
            TransactionStatus::from(TxState::Confirmed),
            TransactionStatus::Unconfirmed
        );
        assert_eq!(
            TransactionStatus::from(TxState::FatallyErrored),
            TransactionStatus::Fatal
        );
    }

    #[test]
    fn test_single_message_id() {
        let meta = TxMeta {
            message_ids: Some(vec!["m1".into()]),
        };
        assert_eq!(meta.single_message_id(), Some("m1"));
        let meta = TxMeta {
            message_ids: Some(vec!["m1".into(), "m2".into()]),
        };
        assert_eq!(meta.single_message_id(), None);
        assert_eq!(TxMeta::default().single_message_id(), None);
        assert_eq!(idempotency_key("m1", 0), "m1-1");
    }
}
