//! End-to-end tests against a mocked full node speaking the HTTP wallet API

#[cfg(test)]
mod http_node_tests {
    use mockito::{Mock, Request, Server, ServerGuard};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tron_relayer::txm::TxState;
    use tron_relayer::{
        HttpClientConfig, HttpFullNodeClient, LocalKeystore, TronAddress, TronTxmConfig,
        TxRequest, Txm, TxmBuilder,
    };

    const BLOCK: i64 = 61_000_000;
    const API_KEY: &str = "test-key";

    fn request_json(req: &Request) -> Value {
        req.body()
            .ok()
            .and_then(|body| serde_json::from_slice(body).ok())
            .unwrap_or(Value::Null)
    }

    /// Mocks shared by every scenario; broadcast bodies land in `sent`
    async fn mock_node(server: &mut ServerGuard, sent: Arc<Mutex<Vec<Value>>>) -> Vec<Mock> {
        let now_block = server
            .mock("POST", "/wallet/getnowblock")
            .match_header("tron-pro-api-key", API_KEY)
            .with_header("content-type", "application/json")
            .with_body_from_request(|_| {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or_default();
                json!({
                    "blockID": format!("{:016x}{}", BLOCK, "ab".repeat(24)),
                    "block_header": {"raw_data": {"number": BLOCK, "timestamp": now}}
                })
                .to_string()
                .into_bytes()
            })
            .create_async()
            .await;

        let prices = server
            .mock("GET", "/wallet/getenergyprices")
            .match_header("tron-pro-api-key", API_KEY)
            .with_body(json!({"prices": "0:100,1606537680000:420"}).to_string())
            .create_async()
            .await;

        let broadcast = server
            .mock("POST", "/wallet/broadcasttransaction")
            .match_header("tron-pro-api-key", API_KEY)
            .with_body_from_request(move |req| {
                let body = request_json(req);
                let txid = body["txID"].as_str().unwrap_or_default().to_string();
                sent.lock().push(body);
                json!({"result": true, "txid": txid}).to_string().into_bytes()
            })
            .create_async()
            .await;

        let mut mocks = vec![now_block, prices, broadcast];
        for path in [
            "/wallet/gettransactioninfobyid",
            "/walletsolidity/gettransactioninfobyid",
        ] {
            let receipt = server
                .mock("POST", path)
                .match_header("tron-pro-api-key", API_KEY)
                .with_body_from_request(|req| {
                    let hash = request_json(req)["value"].as_str().unwrap_or_default().to_string();
                    json!({
                        "id": hash,
                        "blockNumber": BLOCK + 1,
                        "blockTimeStamp": 0,
                        "receipt": {"energy_usage_total": 14000, "result": "SUCCESS"}
                    })
                    .to_string()
                    .into_bytes()
                })
                .expect_at_least(1)
                .create_async()
                .await;
            mocks.push(receipt);
        }
        mocks
    }

    fn relayer(url: &str) -> (Txm, TronAddress) {
        let mut http = HttpClientConfig::new(url);
        http.api_key = Some(API_KEY.to_string());
        let client = HttpFullNodeClient::new(&http).unwrap();

        let mut keystore = LocalKeystore::new();
        let from = keystore.add_key(&[7u8; 32]).unwrap();

        let config = TronTxmConfig {
            confirm_poll_secs: 1,
            ..Default::default()
        };
        let txm = TxmBuilder::new(config, Arc::new(client), Arc::new(keystore))
            .name("http-it")
            .build()
            .unwrap();
        (txm, from)
    }

    async fn wait_for(txm: &Txm, id: &str, state: TxState) -> bool {
        for _ in 0..100 {
            if txm.get_state(id) == Some(state) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        false
    }

    fn transfer(from: TronAddress) -> TxRequest {
        let to = TronAddress::from_evm_bytes(&[0x42; 20]);
        TxRequest::new(from, TronAddress::from_evm_bytes(&[0xcc; 20]), "transfer(address,uint256)")
            .with_params(vec![
                "address".into(),
                to.to_base58().into(),
                "uint256".into(),
                "1000000".into(),
            ])
    }

    /// Test: one call goes estimate -> broadcast -> confirm -> finalize over HTTP
    ///
    /// Requirements:
    /// - the broadcast body is the signed JSON form with `visible: true`
    /// - the fee limit is energy x unit price with no padding on the first attempt
    /// - finality is checked against the solidity endpoint
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_contract_call_reaches_finality() {
        let mut server = Server::new_async().await;
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mocks = mock_node(&mut server, sent.clone()).await;
        let estimate = server
            .mock("POST", "/wallet/estimateenergy")
            .match_header("tron-pro-api-key", API_KEY)
            .with_body(json!({"result": {"result": true}, "energy_required": 14000}).to_string())
            .expect(1)
            .create_async()
            .await;

        let (txm, from) = relayer(&server.url());
        txm.start().unwrap();
        let id = txm.enqueue(transfer(from)).await.unwrap();
        assert!(wait_for(&txm, &id, TxState::Finalized).await);
        txm.close().await;

        estimate.assert_async().await;
        for mock in &mocks {
            assert!(mock.matched_async().await);
        }

        let sent = sent.lock();
        assert_eq!(sent.len(), 1);
        let tx = &sent[0];
        assert_eq!(tx["visible"], json!(true));
        assert_eq!(tx["raw_data"]["fee_limit"], json!(14_000 * 420));
        assert_eq!(tx["signature"][0].as_str().unwrap().len(), 130);
        let contract = &tx["raw_data"]["contract"][0];
        assert_eq!(contract["type"], json!("TriggerSmartContract"));
        assert_eq!(
            contract["parameter"]["value"]["owner_address"],
            json!(from.to_base58())
        );
        // selector of transfer(address,uint256)
        assert!(contract["parameter"]["value"]["data"]
            .as_str()
            .unwrap()
            .starts_with("a9059cbb"));
    }

    /// Test: a node without estimateenergy is asked once, then dry runs take over
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_estimate_fallback_to_dry_run() {
        let mut server = Server::new_async().await;
        let sent = Arc::new(Mutex::new(Vec::new()));
        let _mocks = mock_node(&mut server, sent.clone()).await;
        let estimate = server
            .mock("POST", "/wallet/estimateenergy")
            .with_body(
                json!({
                    "result": {
                        "code": "OTHER_ERROR",
                        "message": hex::encode("this node does not support estimate energy")
                    }
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let dry_run = server
            .mock("POST", "/wallet/triggerconstantcontract")
            .with_body(
                json!({
                    "result": {"result": true},
                    "energy_used": 13000,
                    "energy_penalty": 1000,
                    "constant_result": ["00"],
                    "transaction": {"ret": [{}]}
                })
                .to_string(),
            )
            .expect(2)
            .create_async()
            .await;

        let (txm, from) = relayer(&server.url());
        txm.start().unwrap();
        let first = txm.enqueue(transfer(from)).await.unwrap();
        let second = txm.enqueue(transfer(from)).await.unwrap();
        assert!(wait_for(&txm, &first, TxState::Finalized).await);
        assert!(wait_for(&txm, &second, TxState::Finalized).await);
        txm.close().await;

        assert!(!txm.estimator().estimate_energy_enabled());
        estimate.assert_async().await;
        dry_run.assert_async().await;

        let sent = sent.lock();
        // energy_used + energy_penalty
        assert!(sent
            .iter()
            .all(|tx| tx["raw_data"]["fee_limit"] == json!(14_000 * 420)));
        let hashes: HashSet<&str> = sent.iter().filter_map(|tx| tx["txID"].as_str()).collect();
        assert_eq!(hashes.len(), 2);
    }

    /// Test: a 5xx answer is a retryable HTTP failure
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_http_error_status_is_transport_failure() {
        let mut server = Server::new_async().await;
        let _block = server
            .mock("POST", "/wallet/getnowblock")
            .with_status(503)
            .create_async()
            .await;

        let client = HttpFullNodeClient::new(&HttpClientConfig::new(server.url())).unwrap();
        let err = tron_relayer::FullNodeClient::get_now_block(&client)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.category(), "http");
    }
}
