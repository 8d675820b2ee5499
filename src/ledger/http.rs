//! `reqwest` client for the TRON full-node HTTP API
//!
//! Requests are sent with `visible: true` so addresses travel as base58.
//! Node messages are frequently hex-encoded UTF-8; `decode_message` undoes
//! that where it can.

use super::{
    BlockHeader, BroadcastReturn, ChainView, ContractCall, EstimateEnergyResponse,
    FullNodeClient, LedgerError, TransactionInfo, TriggerConstantResponse,
};
use crate::tx_builder::SignedTransaction;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const UNSUPPORTED_ESTIMATE: &str = "does not support estimate energy";
const API_KEY_HEADER: &str = "TRON-PRO-API-KEY";

/// Connection settings for [`HttpFullNodeClient`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// Full node base URL, e.g. `https://api.trongrid.io`
    pub full_node_url: String,
    /// Solidity node base URL; defaults to the full node
    #[serde(default)]
    pub solidity_node_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_timeout_secs() -> u64 {
    10
}

impl HttpClientConfig {
    pub fn new(full_node_url: impl Into<String>) -> Self {
        Self {
            full_node_url: full_node_url.into(),
            solidity_node_url: None,
            timeout_secs: default_timeout_secs(),
            api_key: None,
        }
    }
}

pub struct HttpFullNodeClient {
    client: Client,
    full_node_url: String,
    solidity_node_url: String,
}

impl HttpFullNodeClient {
    pub fn new(config: &HttpClientConfig) -> Result<Self, LedgerError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(key).map_err(|e| LedgerError::Transport {
                endpoint: config.full_node_url.clone(),
                message: format!("invalid api key header: {e}"),
            })?;
            headers.insert(API_KEY_HEADER, value);
        }

        let client = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| LedgerError::Transport {
                endpoint: config.full_node_url.clone(),
                message: e.to_string(),
            })?;

        let full_node_url = config.full_node_url.trim_end_matches('/').to_string();
        let solidity_node_url = config
            .solidity_node_url
            .as_deref()
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| full_node_url.clone());

        Ok(Self {
            client,
            full_node_url,
            solidity_node_url,
        })
    }

    async fn post<B, R>(&self, endpoint: String, body: &B) -> Result<R, LedgerError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        debug!(endpoint = %endpoint, "POST");
        let response = self
            .client
            .post(endpoint.as_str())
            .json(body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport {
                endpoint: endpoint.clone(),
                message: e.to_string(),
            })?;
        Self::decode(endpoint, response).await
    }

    async fn get<R: DeserializeOwned>(&self, endpoint: String) -> Result<R, LedgerError> {
        debug!(endpoint = %endpoint, "GET");
        let response = self
            .client
            .get(endpoint.as_str())
            .send()
            .await
            .map_err(|e| LedgerError::Transport {
                endpoint: endpoint.clone(),
                message: e.to_string(),
            })?;
        Self::decode(endpoint, response).await
    }

    async fn decode<R: DeserializeOwned>(
        endpoint: String,
        response: reqwest::Response,
    ) -> Result<R, LedgerError> {
        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Http {
                endpoint,
                status: status.as_u16(),
            });
        }
        let body = response.text().await.map_err(|e| LedgerError::Transport {
            endpoint: endpoint.clone(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&body).map_err(|e| LedgerError::Decode {
            endpoint,
            message: e.to_string(),
        })
    }

    fn wallet(&self, path: &str) -> String {
        format!("{}/wallet/{path}", self.full_node_url)
    }
}

#[async_trait]
impl FullNodeClient for HttpFullNodeClient {
    async fn estimate_energy(
        &self,
        call: &ContractCall,
    ) -> Result<EstimateEnergyResponse, LedgerError> {
        let wire: WireEstimateEnergy = self
            .post(self.wallet("estimateenergy"), &VisibleCall::from(call))
            .await?;
        wire.into_response()
    }

    async fn trigger_constant_contract(
        &self,
        call: &ContractCall,
    ) -> Result<TriggerConstantResponse, LedgerError> {
        let wire: WireTriggerConstant = self
            .post(
                self.wallet("triggerconstantcontract"),
                &VisibleCall::from(call),
            )
            .await?;
        wire.into_response()
    }

    async fn get_energy_prices(&self) -> Result<String, LedgerError> {
        let wire: WireEnergyPrices = self.get(self.wallet("getenergyprices")).await?;
        Ok(wire.prices)
    }

    async fn get_now_block(&self) -> Result<BlockHeader, LedgerError> {
        let endpoint = self.wallet("getnowblock");
        let wire: WireBlock = self.post(endpoint.clone(), &serde_json::json!({})).await?;
        wire.into_header(endpoint)
    }

    async fn broadcast_transaction(
        &self,
        tx: &SignedTransaction,
    ) -> Result<BroadcastReturn, LedgerError> {
        let wire: WireBroadcast = self.post(self.wallet("broadcasttransaction"), tx).await?;
        Ok(wire.into())
    }

    async fn get_transaction_info_by_id(
        &self,
        hash: &str,
        view: ChainView,
    ) -> Result<Option<TransactionInfo>, LedgerError> {
        let endpoint = match view {
            ChainView::Tip => self.wallet("gettransactioninfobyid"),
            ChainView::Solid => format!(
                "{}/walletsolidity/gettransactioninfobyid",
                self.solidity_node_url
            ),
        };
        let wire: WireTransactionInfo = self
            .post(endpoint, &serde_json::json!({ "value": hash }))
            .await?;
        Ok(wire.into_info())
    }
}

/// Node messages are hex-encoded UTF-8 more often than not
pub fn decode_message(raw: &str) -> String {
    hex::decode(raw)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| raw.to_string())
}

#[derive(Serialize)]
struct VisibleCall<'a> {
    owner_address: String,
    contract_address: String,
    function_selector: &'a str,
    parameter: &'a str,
    #[serde(skip_serializing_if = "is_zero")]
    call_value: i64,
    visible: bool,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl<'a> From<&'a ContractCall> for VisibleCall<'a> {
    fn from(call: &'a ContractCall) -> Self {
        Self {
            owner_address: call.owner_address.to_base58(),
            contract_address: call.contract_address.to_base58(),
            function_selector: &call.function_selector,
            parameter: &call.parameter,
            call_value: call.call_value,
            visible: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireReturn {
    #[serde(default)]
    result: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl WireReturn {
    fn into_error(self) -> LedgerError {
        let message = self.message.as_deref().map(decode_message).unwrap_or_default();
        if message.contains(UNSUPPORTED_ESTIMATE) {
            return LedgerError::EstimateEnergyUnsupported;
        }
        LedgerError::Node {
            code: self.code.unwrap_or_else(|| "OTHER_ERROR".to_string()),
            message,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireEstimateEnergy {
    #[serde(default)]
    result: WireReturn,
    #[serde(default)]
    energy_required: i64,
}

impl WireEstimateEnergy {
    fn into_response(self) -> Result<EstimateEnergyResponse, LedgerError> {
        if !self.result.result {
            return Err(self.result.into_error());
        }
        Ok(EstimateEnergyResponse {
            energy_required: self.energy_required,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireRet {
    #[serde(default)]
    ret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireConstantTransaction {
    #[serde(default)]
    ret: Vec<WireRet>,
}

#[derive(Debug, Deserialize)]
struct WireTriggerConstant {
    #[serde(default)]
    result: WireReturn,
    #[serde(default)]
    energy_used: i64,
    #[serde(default)]
    energy_penalty: i64,
    #[serde(default)]
    constant_result: Vec<String>,
    #[serde(default)]
    transaction: Option<WireConstantTransaction>,
}

impl WireTriggerConstant {
    fn into_response(self) -> Result<TriggerConstantResponse, LedgerError> {
        if !self.result.result {
            return Err(self.result.into_error());
        }
        let reverted = self
            .transaction
            .as_ref()
            .and_then(|tx| tx.ret.first())
            .and_then(|r| r.ret.as_deref())
            == Some("FAILED");
        let revert_message = reverted.then(|| {
            self.result
                .message
                .as_deref()
                .map(decode_message)
                .unwrap_or_else(|| "REVERT".to_string())
        });
        Ok(TriggerConstantResponse {
            energy_used: self.energy_used,
            energy_penalty: self.energy_penalty,
            constant_result: self.constant_result,
            revert_message,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireEnergyPrices {
    #[serde(default)]
    prices: String,
}

#[derive(Debug, Deserialize)]
struct WireBlockRaw {
    #[serde(default)]
    number: i64,
    #[serde(default)]
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct WireBlockHeader {
    raw_data: WireBlockRaw,
}

#[derive(Debug, Deserialize)]
struct WireBlock {
    #[serde(rename = "blockID", default)]
    block_id: String,
    block_header: Option<WireBlockHeader>,
}

impl WireBlock {
    fn into_header(self, endpoint: String) -> Result<BlockHeader, LedgerError> {
        let header = self.block_header.ok_or_else(|| LedgerError::Decode {
            endpoint,
            message: "missing block_header".to_string(),
        })?;
        Ok(BlockHeader {
            number: header.raw_data.number,
            id: self.block_id,
            timestamp_ms: header.raw_data.timestamp,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireBroadcast {
    #[serde(default)]
    result: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    txid: Option<String>,
}

impl From<WireBroadcast> for BroadcastReturn {
    fn from(wire: WireBroadcast) -> Self {
        Self {
            result: wire.result,
            code: wire.code,
            message: wire.message.as_deref().map(decode_message),
            txid: wire.txid,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireReceipt {
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTransactionInfo {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    block_number: i64,
    #[serde(default)]
    block_time_stamp: i64,
    #[serde(default)]
    receipt: Option<WireReceipt>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    res_message: Option<String>,
}

impl WireTransactionInfo {
    /// The node answers `{}` for unknown ids
    fn into_info(self) -> Option<TransactionInfo> {
        let id = self.id?;
        Some(TransactionInfo {
            id,
            block_number: self.block_number,
            block_timestamp: self.block_time_stamp,
            receipt_result: self.receipt.and_then(|r| r.result),
            result: self.result,
            res_message: self.res_message.as_deref().map(decode_message),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_message() {
        // "REVERT opcode executed"
        assert_eq!(
            decode_message("524556455254206f70636f6465206578656375746564"),
            "REVERT opcode executed"
        );
        assert_eq!(decode_message("plain text"), "plain text");
    }

    #[test]
    fn test_empty_transaction_info_is_none() {
        let wire: WireTransactionInfo = serde_json::from_str("{}").unwrap();
        assert!(wire.into_info().is_none());
    }

    #[test]
    fn test_transaction_info_decoding() {
        let body = r#"{
            "id": "abcd",
            "blockNumber": 60941505,
            "blockTimeStamp": 1700000000000,
            "receipt": {"energy_usage_total": 1000, "result": "OUT_OF_ENERGY"},
            "result": "FAILED",
            "resMessage": "6f7574206f6620656e65726779"
        }"#;
        let wire: WireTransactionInfo = serde_json::from_str(body).unwrap();
        let info = wire.into_info().unwrap();
        assert_eq!(info.block_number, 60_941_505);
        assert_eq!(info.receipt_result.as_deref(), Some("OUT_OF_ENERGY"));
        assert!(info.is_failed());
        assert_eq!(info.res_message.as_deref(), Some("out of energy"));
    }

    #[test]
    fn test_estimate_energy_unsupported() {
        let body = r#"{"result":{"code":"OTHER_ERROR","message":"this node does not support estimate energy"}}"#;
        let wire: WireEstimateEnergy = serde_json::from_str(body).unwrap();
        assert_eq!(
            wire.into_response(),
            Err(LedgerError::EstimateEnergyUnsupported)
        );

        let body = r#"{"result":{"result":true},"energy_required":1082}"#;
        let wire: WireEstimateEnergy = serde_json::from_str(body).unwrap();
        assert_eq!(wire.into_response().unwrap().energy_required, 1082);
    }

    #[test]
    fn test_trigger_constant_decoding() {
        let body = r#"{
            "result": {"result": true},
            "energy_used": 14000,
            "energy_penalty": 200,
            "constant_result": ["00"],
            "transaction": {"ret": [{}]}
        }"#;
        let wire: WireTriggerConstant = serde_json::from_str(body).unwrap();
        let resp = wire.into_response().unwrap();
        assert_eq!(resp.energy_used + resp.energy_penalty, 14_200);
        assert!(resp.revert_message.is_none());

        let body = r#"{
            "result": {"result": true, "message": "7265766572746564"},
            "energy_used": 100,
            "transaction": {"ret": [{"ret": "FAILED"}]}
        }"#;
        let wire: WireTriggerConstant = serde_json::from_str(body).unwrap();
        assert_eq!(
            wire.into_response().unwrap().revert_message.as_deref(),
            Some("reverted")
        );
    }

    #[test]
    fn test_block_and_broadcast_decoding() {
        let body = r#"{"blockID":"00ff","block_header":{"raw_data":{"number":7,"timestamp":99}}}"#;
        let wire: WireBlock = serde_json::from_str(body).unwrap();
        let header = wire.into_header("x".into()).unwrap();
        assert_eq!((header.number, header.timestamp_ms), (7, 99));

        let body = r#"{"code":"SERVER_BUSY","message":"736572766572206275737921","txid":"ab"}"#;
        let wire: WireBroadcast = serde_json::from_str(body).unwrap();
        let ret: BroadcastReturn = wire.into();
        assert!(ret.is_busy());
        assert_eq!(ret.message.as_deref(), Some("server busy!"));
    }

    #[test]
    fn test_client_config_defaults() {
        let config: HttpClientConfig =
            serde_json::from_str(r#"{"full_node_url":"http://127.0.0.1:8090/"}"#).unwrap();
        assert_eq!(config.timeout_secs, 10);
        let client = HttpFullNodeClient::new(&config).unwrap();
        assert_eq!(
            client.wallet("getnowblock"),
            "http://127.0.0.1:8090/wallet/getnowblock"
        );
    }
}
