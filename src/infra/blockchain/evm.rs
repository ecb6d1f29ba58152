//! JSON-RPC client for the notarization contract on an EVM chain.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, instrument, warn};

use super::encoding::{
    LegacyTransaction, RATING_RECORDED_EVENT, TRADE_RECORDED_EVENT, encode_record_rating,
    encode_record_trade, event_topic, keccak256, parse_address, parse_quantity,
    to_hex_prefixed,
};
use crate::domain::{
    AppError, BlockchainError, BroadcastObserver, LedgerClient, LedgerOutcome, RatingRecord,
    ReceiptStatus, TradeRecord, TransactionSigner,
};

/// Configuration for the EVM client
#[derive(Debug, Clone)]
pub struct EvmClientConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// How long a write waits for its receipt before reporting `Unconfirmed`
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    /// Used when `eth_estimateGas` fails
    pub gas_limit: u64,
    /// Fetched with `eth_chainId` when unset
    pub chain_id: Option<u64>,
}

impl Default for EvmClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            confirmation_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            gas_limit: 500_000,
            chain_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct TransactionReceipt {
    status: Option<String>,
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
    #[serde(default)]
    logs: Vec<ReceiptLog>,
}

#[derive(Debug, Deserialize)]
struct ReceiptLog {
    address: String,
    #[serde(default)]
    topics: Vec<String>,
}

impl TransactionReceipt {
    fn succeeded(&self) -> bool {
        self.status
            .as_deref()
            .and_then(|s| parse_quantity(s).ok())
            .is_some_and(|s| s == 1)
    }

    fn has_event(&self, contract: &[u8; 20], topic: &[u8; 32]) -> bool {
        let contract = to_hex_prefixed(contract);
        let topic = to_hex_prefixed(topic);
        self.logs.iter().any(|log| {
            log.address.eq_ignore_ascii_case(&contract)
                && log
                    .topics
                    .first()
                    .is_some_and(|t| t.eq_ignore_ascii_case(&topic))
        })
    }
}

/// Ledger client writing to one deployed notarization contract.
///
/// The funding account and contract address are fixed at construction.
pub struct EvmLedgerClient {
    http_client: Client,
    rpc_url: String,
    contract: [u8; 20],
    signer: Arc<dyn TransactionSigner>,
    config: EvmClientConfig,
    /// Serializes nonce allocation and broadcast
    submit_lock: Mutex<()>,
    chain_id: OnceCell<u64>,
}

impl EvmLedgerClient {
    /// Create a new EVM ledger client with custom configuration
    pub fn new(
        rpc_url: &str,
        contract_address: &str,
        signer: Arc<dyn TransactionSigner>,
        config: EvmClientConfig,
    ) -> Result<Self, AppError> {
        let contract = parse_address(contract_address)?;
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Blockchain(BlockchainError::Connection(e.to_string())))?;

        info!(
            rpc_url = %rpc_url,
            contract = %to_hex_prefixed(&contract),
            funding_account = %to_hex_prefixed(&signer.address()),
            "Created ledger client"
        );

        Ok(Self {
            http_client,
            rpc_url: rpc_url.to_string(),
            contract,
            signer,
            config,
            submit_lock: Mutex::new(()),
            chain_id: OnceCell::new(),
        })
    }

    /// Create a new EVM ledger client with default configuration
    pub fn with_defaults(
        rpc_url: &str,
        contract_address: &str,
        signer: Arc<dyn TransactionSigner>,
    ) -> Result<Self, AppError> {
        Self::new(rpc_url, contract_address, signer, EvmClientConfig::default())
    }

    /// Funding account address as `0x` hex
    #[must_use]
    pub fn funding_address(&self) -> String {
        to_hex_prefixed(&self.signer.address())
    }

    /// Make an RPC call with retries
    #[instrument(skip(self, params))]
    async fn rpc_call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R, AppError> {
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }
            match self.do_rpc_call(method, &params).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    warn!(attempt = attempt, error = ?e, method = %method, "RPC call failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            AppError::Blockchain(BlockchainError::RpcError("Unknown error".to_string()))
        }))
    }

    /// Execute a single RPC call. A `null` result deserializes into `Option::None`.
    async fn do_rpc_call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: &Value,
    ) -> Result<R, AppError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Blockchain(BlockchainError::Timeout(e.to_string()))
                } else {
                    AppError::Blockchain(BlockchainError::Connection(e.to_string()))
                }
            })?;

        let rpc_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| AppError::Blockchain(BlockchainError::RpcError(e.to_string())))?;

        if let Some(error) = rpc_response.error {
            if error.message.to_ascii_lowercase().contains("insufficient funds") {
                return Err(AppError::Blockchain(BlockchainError::InsufficientFunds));
            }
            return Err(AppError::Blockchain(BlockchainError::RpcError(format!(
                "{}: {}",
                error.code, error.message
            ))));
        }

        serde_json::from_value(rpc_response.result.unwrap_or(Value::Null)).map_err(|e| {
            AppError::Blockchain(BlockchainError::RpcError(format!(
                "Unexpected {} result: {}",
                method, e
            )))
        })
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<u128, AppError> {
        let raw: String = self.rpc_call(method, params).await?;
        Ok(parse_quantity(&raw)?)
    }

    async fn chain_id(&self) -> Result<u64, AppError> {
        if let Some(id) = self.config.chain_id {
            return Ok(id);
        }
        self.chain_id
            .get_or_try_init(|| async {
                let id = self.quantity("eth_chainId", json!([])).await?;
                u64::try_from(id).map_err(|_| {
                    AppError::Blockchain(BlockchainError::Encoding(format!(
                        "chain id {} out of range",
                        id
                    )))
                })
            })
            .await
            .copied()
    }

    /// Estimate gas with a 20% margin, falling back to the configured limit.
    async fn gas_limit(&self, from: &str, data: &[u8]) -> u64 {
        let params = json!([{
            "from": from,
            "to": to_hex_prefixed(&self.contract),
            "data": to_hex_prefixed(data),
        }]);
        match self.quantity("eth_estimateGas", params).await {
            Ok(estimate) => u64::try_from(estimate.saturating_mul(120) / 100)
                .unwrap_or(self.config.gas_limit),
            Err(e) => {
                warn!(error = ?e, fallback = self.config.gas_limit, "Gas estimation failed");
                self.config.gas_limit
            }
        }
    }

    /// Sign and broadcast a contract call, returning its transaction hash.
    ///
    /// An error means nothing reached the node. Once the observer has the
    /// hash, a lost reply is not an error: the transaction may be in the
    /// mempool and only a receipt can tell.
    async fn submit(
        &self,
        data: Vec<u8>,
        observer: &dyn BroadcastObserver,
    ) -> Result<String, AppError> {
        let chain_id = self.chain_id().await?;
        let from = self.funding_address();

        let _guard = self.submit_lock.lock().await;

        let nonce = self
            .quantity("eth_getTransactionCount", json!([from, "pending"]))
            .await?;
        let gas_price = self.quantity("eth_gasPrice", json!([])).await?;
        let gas_limit = self.gas_limit(&from, &data).await;

        let tx = LegacyTransaction {
            nonce: u64::try_from(nonce).map_err(|_| {
                AppError::Blockchain(BlockchainError::Encoding("nonce out of range".to_string()))
            })?,
            gas_price,
            gas_limit,
            to: self.contract,
            value: 0,
            data,
            chain_id,
        };

        let signature = self.signer.sign_digest(&tx.signing_hash()).await?;
        let raw = tx.encode_signed(&signature);
        let tx_hash = to_hex_prefixed(&keccak256(&raw));
        observer.before_broadcast(&tx_hash).await?;
        debug!(nonce = tx.nonce, gas_limit, tx_hash = %tx_hash, "Broadcasting transaction");

        // Broadcast once; a retry could double-spend the nonce on a flaky node.
        match self
            .do_rpc_call::<String>("eth_sendRawTransaction", &json!([to_hex_prefixed(&raw)]))
            .await
        {
            Ok(returned) => {
                if !returned.eq_ignore_ascii_case(&tx_hash) {
                    warn!(local = %tx_hash, node = %returned, "Node returned a different hash");
                }
            }
            Err(AppError::Blockchain(BlockchainError::RpcError(msg)))
                if msg.to_ascii_lowercase().contains("already known") =>
            {
                debug!(tx_hash = %tx_hash, "Transaction already known to node");
            }
            Err(AppError::Blockchain(
                BlockchainError::Timeout(reason) | BlockchainError::Connection(reason),
            )) => {
                warn!(tx_hash = %tx_hash, error = %reason, "Broadcast reply lost, waiting for receipt");
            }
            Err(e) => return Err(e),
        }

        Ok(tx_hash)
    }

    async fn fetch_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>, AppError> {
        self.rpc_call("eth_getTransactionReceipt", json!([tx_hash]))
            .await
    }

    /// Poll for a receipt until the confirmation timeout elapses.
    async fn wait_for_receipt(&self, tx_hash: &str) -> Option<TransactionReceipt> {
        let start = Instant::now();
        while start.elapsed() < self.config.confirmation_timeout {
            match self.fetch_receipt(tx_hash).await {
                Ok(Some(receipt)) if receipt.block_number.is_some() => return Some(receipt),
                Ok(_) => debug!(tx_hash = %tx_hash, "Transaction not yet mined"),
                Err(e) => warn!(tx_hash = %tx_hash, error = ?e, "Error fetching receipt"),
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
        None
    }

    async fn write(
        &self,
        kind: &'static str,
        data: Vec<u8>,
        event: &str,
        observer: &dyn BroadcastObserver,
    ) -> LedgerOutcome {
        let start = Instant::now();
        let outcome = match self.submit(data, observer).await {
            Err(e) => LedgerOutcome::Failed(e.to_string()),
            Ok(tx_hash) => match self.wait_for_receipt(&tx_hash).await {
                None => {
                    warn!(
                        tx_hash = %tx_hash,
                        timeout = ?self.config.confirmation_timeout,
                        "Receipt not seen within confirmation window"
                    );
                    LedgerOutcome::Unconfirmed(tx_hash)
                }
                Some(receipt) if !receipt.succeeded() => LedgerOutcome::Failed(
                    BlockchainError::Reverted(tx_hash).to_string(),
                ),
                Some(receipt) => {
                    if !receipt.has_event(&self.contract, &event_topic(event)) {
                        warn!(tx_hash = %tx_hash, event = %event, "Confirmed without expected event log");
                    }
                    LedgerOutcome::Confirmed(tx_hash)
                }
            },
        };

        metrics::counter!("ledger_writes_total", "kind" => kind, "outcome" => outcome.label())
            .increment(1);
        metrics::histogram!("ledger_write_duration_seconds", "kind" => kind)
            .record(start.elapsed().as_secs_f64());

        match &outcome {
            LedgerOutcome::Confirmed(hash) => info!(kind, tx_hash = %hash, "Ledger write confirmed"),
            LedgerOutcome::Unconfirmed(_) => {}
            LedgerOutcome::Failed(reason) => warn!(kind, reason = %reason, "Ledger write failed"),
        }
        outcome
    }
}

#[async_trait]
impl LedgerClient for EvmLedgerClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let _: String = self.rpc_call("eth_blockNumber", json!([])).await?;
        Ok(())
    }

    #[instrument(skip(self, record, observer), fields(trade_id = %record.trade_id))]
    async fn record_trade(
        &self,
        record: &TradeRecord,
        observer: &dyn BroadcastObserver,
    ) -> LedgerOutcome {
        let data = encode_record_trade(
            &record.trade_id,
            &record.buyer_identity,
            &record.seller_identity,
            &record.item_description,
            record.amount,
        );
        self.write("trade", data, TRADE_RECORDED_EVENT, observer).await
    }

    #[instrument(skip(self, record, observer), fields(score = record.score))]
    async fn record_rating(
        &self,
        record: &RatingRecord,
        observer: &dyn BroadcastObserver,
    ) -> LedgerOutcome {
        let data = encode_record_rating(&record.rated_user_identity, record.score, &record.comment);
        self.write("rating", data, RATING_RECORDED_EVENT, observer).await
    }

    #[instrument(skip(self))]
    async fn receipt_status(&self, tx_hash: &str) -> Result<ReceiptStatus, AppError> {
        Ok(match self.fetch_receipt(tx_hash).await? {
            Some(receipt) if receipt.block_number.is_some() => {
                if receipt.succeeded() {
                    ReceiptStatus::Confirmed
                } else {
                    ReceiptStatus::Reverted
                }
            }
            _ => {
                let known: Option<Value> = self
                    .rpc_call("eth_getTransactionByHash", json!([tx_hash]))
                    .await?;
                if known.is_some() {
                    ReceiptStatus::Pending
                } else {
                    ReceiptStatus::Dropped
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IgnoreBroadcast;
    use crate::infra::blockchain::LocalSigner;
    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use secrecy::SecretString;
    use std::sync::Mutex as StdMutex;

    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";

    /// Minimal JSON-RPC node answering the calls the client makes.
    #[derive(Default)]
    struct FakeNode {
        receipt_status: StdMutex<Option<&'static str>>,
        emit_event: StdMutex<bool>,
        send_error: StdMutex<Option<String>>,
        /// Accepts the transaction but replies only after this delay
        send_delay: StdMutex<Option<Duration>>,
        raw_transactions: StdMutex<Vec<String>>,
        methods: StdMutex<Vec<String>>,
    }

    async fn handle(State(node): State<Arc<FakeNode>>, Json(req): Json<Value>) -> Json<Value> {
        let method = req["method"].as_str().unwrap_or_default().to_string();
        node.methods.lock().unwrap().push(method.clone());

        let result = match method.as_str() {
            "eth_blockNumber" => json!("0x10"),
            "eth_chainId" => json!("0x7a69"),
            "eth_getTransactionCount" => json!("0x5"),
            "eth_gasPrice" => json!("0x3b9aca00"),
            "eth_estimateGas" => json!("0x186a0"),
            "eth_sendRawTransaction" => {
                if let Some(message) = node.send_error.lock().unwrap().clone() {
                    return Json(json!({
                        "jsonrpc": "2.0", "id": 1,
                        "error": {"code": -32000, "message": message}
                    }));
                }
                let raw = req["params"][0].as_str().unwrap().to_string();
                let bytes = hex::decode(raw.trim_start_matches("0x")).unwrap();
                node.raw_transactions.lock().unwrap().push(raw);
                let delay = *node.send_delay.lock().unwrap();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                json!(to_hex_prefixed(&keccak256(&bytes)))
            }
            "eth_getTransactionByHash" => {
                let hash = req["params"][0].as_str().unwrap_or_default();
                let known = node.raw_transactions.lock().unwrap().iter().any(|raw| {
                    let bytes = hex::decode(raw.trim_start_matches("0x")).unwrap();
                    to_hex_prefixed(&keccak256(&bytes)) == hash
                });
                if known { json!({"hash": hash}) } else { Value::Null }
            }
            "eth_getTransactionReceipt" => match *node.receipt_status.lock().unwrap() {
                None => Value::Null,
                Some(status) => {
                    let logs = if *node.emit_event.lock().unwrap() {
                        json!([{
                            "address": CONTRACT,
                            "topics": [to_hex_prefixed(&event_topic(TRADE_RECORDED_EVENT))]
                        }])
                    } else {
                        json!([])
                    };
                    json!({"status": status, "blockNumber": "0x11", "logs": logs})
                }
            },
            _ => Value::Null,
        };
        Json(json!({"jsonrpc": "2.0", "id": 1, "result": result}))
    }

    async fn start_node(node: Arc<FakeNode>) -> String {
        let app = Router::new().route("/", post(handle)).with_state(node);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn test_config() -> EvmClientConfig {
        EvmClientConfig {
            timeout: Duration::from_secs(5),
            max_retries: 0,
            retry_delay: Duration::from_millis(10),
            confirmation_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(20),
            gas_limit: 300_000,
            chain_id: None,
        }
    }

    fn signer() -> Arc<dyn TransactionSigner> {
        Arc::new(LocalSigner::new(SecretString::from(DEV_KEY.to_string())).unwrap())
    }

    /// Keeps every hash handed over before broadcast.
    #[derive(Default)]
    struct RecordingObserver {
        hashes: StdMutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl BroadcastObserver for RecordingObserver {
        async fn before_broadcast(&self, tx_hash: &str) -> Result<(), AppError> {
            if self.fail {
                return Err(AppError::Database(crate::domain::DatabaseError::Query(
                    "store down".to_string(),
                )));
            }
            self.hashes.lock().unwrap().push(tx_hash.to_string());
            Ok(())
        }
    }

    fn raw_hash(raw: &str) -> String {
        let bytes = hex::decode(raw.trim_start_matches("0x")).unwrap();
        to_hex_prefixed(&keccak256(&bytes))
    }

    fn trade_record() -> TradeRecord {
        TradeRecord {
            trade_id: "T1".to_string(),
            buyer_identity: "b@x.com".to_string(),
            seller_identity: "s@x.com".to_string(),
            item_description: "Trade of item A for B".to_string(),
            amount: 0,
        }
    }

    #[test]
    fn test_client_creation() {
        let client = EvmLedgerClient::with_defaults("http://localhost:8545", CONTRACT, signer());
        assert!(client.is_ok());
        assert_eq!(
            client.unwrap().funding_address(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn test_client_rejects_bad_contract_address() {
        let client = EvmLedgerClient::with_defaults("http://localhost:8545", "0x1234", signer());
        assert!(matches!(
            client,
            Err(AppError::Blockchain(BlockchainError::Encoding(_)))
        ));
    }

    #[test]
    fn test_config_default() {
        let config = EvmClientConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.confirmation_timeout, Duration::from_secs(60));
        assert!(config.chain_id.is_none());
    }

    #[test]
    fn test_receipt_event_matching() {
        let receipt: TransactionReceipt = serde_json::from_value(json!({
            "status": "0x1",
            "blockNumber": "0x2",
            "logs": [{
                "address": "0x5FbDB2315678afecb367f032d93F642f64180aa3",
                "topics": [to_hex_prefixed(&event_topic(RATING_RECORDED_EVENT))]
            }]
        }))
        .unwrap();
        let contract = parse_address(CONTRACT).unwrap();

        assert!(receipt.succeeded());
        assert!(receipt.has_event(&contract, &event_topic(RATING_RECORDED_EVENT)));
        assert!(!receipt.has_event(&contract, &event_topic(TRADE_RECORDED_EVENT)));
    }

    #[tokio::test]
    async fn test_record_trade_confirmed() {
        let node = Arc::new(FakeNode::default());
        *node.receipt_status.lock().unwrap() = Some("0x1");
        *node.emit_event.lock().unwrap() = true;
        let url = start_node(node.clone()).await;

        let client = EvmLedgerClient::new(&url, CONTRACT, signer(), test_config()).unwrap();
        let observer = RecordingObserver::default();
        let outcome = client.record_trade(&trade_record(), &observer).await;

        let raw = node.raw_transactions.lock().unwrap()[0].clone();
        assert_eq!(outcome, LedgerOutcome::Confirmed(raw_hash(&raw)));
        assert_eq!(*observer.hashes.lock().unwrap(), vec![raw_hash(&raw)]);

        // the call data carries the recordTrade selector
        assert!(raw.contains("2d6f5d92"));
        let methods = node.methods.lock().unwrap();
        assert!(methods.contains(&"eth_chainId".to_string()));
        assert!(methods.contains(&"eth_estimateGas".to_string()));
    }

    #[tokio::test]
    async fn test_record_rating_reverted() {
        let node = Arc::new(FakeNode::default());
        *node.receipt_status.lock().unwrap() = Some("0x0");
        let url = start_node(node).await;

        let client = EvmLedgerClient::new(&url, CONTRACT, signer(), test_config()).unwrap();
        let outcome = client
            .record_rating(&RatingRecord {
                rated_user_identity: "u2@x.com".to_string(),
                score: 5,
                comment: "great".to_string(),
            }, &IgnoreBroadcast)
            .await;

        assert!(matches!(outcome, LedgerOutcome::Failed(reason) if reason.contains("reverted")));
    }

    #[tokio::test]
    async fn test_missing_receipt_is_unconfirmed() {
        let node = Arc::new(FakeNode::default());
        let url = start_node(node.clone()).await;

        let client = EvmLedgerClient::new(&url, CONTRACT, signer(), test_config()).unwrap();
        let outcome = client.record_trade(&trade_record(), &IgnoreBroadcast).await;

        assert!(matches!(outcome, LedgerOutcome::Unconfirmed(_)));
        assert_eq!(node.raw_transactions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_error_is_failure() {
        let node = Arc::new(FakeNode::default());
        *node.send_error.lock().unwrap() = Some("insufficient funds for gas * price + value".into());
        let url = start_node(node).await;

        let client = EvmLedgerClient::new(&url, CONTRACT, signer(), test_config()).unwrap();
        let outcome = client.record_trade(&trade_record(), &IgnoreBroadcast).await;

        assert_eq!(
            outcome,
            LedgerOutcome::Failed(BlockchainError::InsufficientFunds.to_string())
        );
    }

    #[tokio::test]
    async fn test_observer_failure_aborts_broadcast() {
        let node = Arc::new(FakeNode::default());
        *node.receipt_status.lock().unwrap() = Some("0x1");
        let url = start_node(node.clone()).await;

        let client = EvmLedgerClient::new(&url, CONTRACT, signer(), test_config()).unwrap();
        let observer = RecordingObserver {
            fail: true,
            ..RecordingObserver::default()
        };
        let outcome = client.record_trade(&trade_record(), &observer).await;

        assert!(matches!(outcome, LedgerOutcome::Failed(reason) if reason.contains("store down")));
        assert!(node.raw_transactions.lock().unwrap().is_empty());
        assert!(!node.methods.lock().unwrap().contains(&"eth_sendRawTransaction".to_string()));
    }

    #[tokio::test]
    async fn test_lost_broadcast_reply_is_unconfirmed() {
        let node = Arc::new(FakeNode::default());
        *node.send_delay.lock().unwrap() = Some(Duration::from_secs(2));
        let url = start_node(node.clone()).await;

        let config = EvmClientConfig {
            timeout: Duration::from_millis(300),
            ..test_config()
        };
        let client = EvmLedgerClient::new(&url, CONTRACT, signer(), config).unwrap();
        let observer = RecordingObserver::default();
        let outcome = client.record_trade(&trade_record(), &observer).await;

        // The node kept the transaction even though its reply never arrived.
        let raw = node.raw_transactions.lock().unwrap()[0].clone();
        assert_eq!(outcome, LedgerOutcome::Unconfirmed(raw_hash(&raw)));
        assert_eq!(*observer.hashes.lock().unwrap(), vec![raw_hash(&raw)]);
        assert_eq!(
            client.receipt_status(&raw_hash(&raw)).await.unwrap(),
            ReceiptStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_lost_broadcast_reply_then_mined_is_confirmed() {
        let node = Arc::new(FakeNode::default());
        *node.send_delay.lock().unwrap() = Some(Duration::from_secs(2));
        *node.receipt_status.lock().unwrap() = Some("0x1");
        let url = start_node(node.clone()).await;

        let config = EvmClientConfig {
            timeout: Duration::from_millis(300),
            ..test_config()
        };
        let client = EvmLedgerClient::new(&url, CONTRACT, signer(), config).unwrap();
        let outcome = client.record_trade(&trade_record(), &IgnoreBroadcast).await;

        assert!(matches!(outcome, LedgerOutcome::Confirmed(_)));
        assert_eq!(node.raw_transactions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_already_known_counts_as_broadcast() {
        let node = Arc::new(FakeNode::default());
        *node.send_error.lock().unwrap() = Some("already known".into());
        *node.receipt_status.lock().unwrap() = Some("0x1");
        let url = start_node(node).await;

        let client = EvmLedgerClient::new(&url, CONTRACT, signer(), test_config()).unwrap();
        let outcome = client.record_trade(&trade_record(), &IgnoreBroadcast).await;

        assert!(matches!(outcome, LedgerOutcome::Confirmed(_)));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_failure() {
        let config = EvmClientConfig {
            timeout: Duration::from_millis(200),
            ..test_config()
        };
        let client = EvmLedgerClient::new("http://127.0.0.1:1", CONTRACT, signer(), config).unwrap();

        assert!(matches!(
            client.record_trade(&trade_record(), &IgnoreBroadcast).await,
            LedgerOutcome::Failed(_)
        ));
        assert!(client.health_check().await.is_err());
    }

    #[tokio::test]
    async fn test_receipt_status_lookup() {
        let node = Arc::new(FakeNode::default());
        let url = start_node(node.clone()).await;
        let client = EvmLedgerClient::new(&url, CONTRACT, signer(), test_config()).unwrap();

        assert_eq!(client.receipt_status("0xabc").await.unwrap(), ReceiptStatus::Dropped);

        *node.receipt_status.lock().unwrap() = Some("0x1");
        assert_eq!(client.receipt_status("0xabc").await.unwrap(), ReceiptStatus::Confirmed);

        *node.receipt_status.lock().unwrap() = Some("0x0");
        assert_eq!(client.receipt_status("0xabc").await.unwrap(), ReceiptStatus::Reverted);
    }

    #[tokio::test]
    async fn test_health_check() {
        let node = Arc::new(FakeNode::default());
        let url = start_node(node).await;
        let client = EvmLedgerClient::new(&url, CONTRACT, signer(), test_config()).unwrap();
        assert!(client.health_check().await.is_ok());
    }
}
