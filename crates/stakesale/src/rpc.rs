//! JSON-RPC connector for an EIP-1193 style endpoint.
//!
//! Talks to a node or a wallet bridge that exposes the standard `eth_*`
//! methods over HTTP. Wallet events are produced by [`JsonRpcConnector::poll_changes`],
//! which the embedding application calls on its own schedule.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use num_bigint::BigUint;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::connector::{ChainConnector, WalletEvent};
use crate::error::{ConfigError, Error};
use crate::types::address::Address;
use crate::types::transaction::{Receipt, TxHash, TxRequest};

const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// The user declined the request in the wallet (EIP-1193).
const USER_REJECTED: i64 = 4001;
const METHOD_NOT_FOUND: i64 = -32601;
const UNSUPPORTED_METHOD: i64 = 4200;

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// Endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub url: String,
    /// Receipt polling interval.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl RpcConfig {
    pub fn new(url: impl Into<String>) -> Result<Self, ConfigError> {
        let config = Self {
            url: url.into(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !validate_url(&self.url) {
            return Err(ConfigError::InvalidUrl(self.url.clone()));
        }
        Ok(())
    }
}

/// Validate that a URL is well-formed and uses HTTP or HTTPS.
pub fn validate_url(url: &str) -> bool {
    match reqwest::Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            (scheme == "http" || scheme == "https") && parsed.host().is_some()
        }
        Err(_) => false,
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    #[serde(default)]
    status: Option<String>,
    gas_used: String,
    block_number: String,
}

/// Why a single request failed, before mapping onto [`Error`].
#[derive(Debug)]
enum Failure {
    Transport(String),
    Rpc(JsonRpcError),
    Decode(String),
}

fn rpc_error(method: &str, error: &JsonRpcError) -> Error {
    match error.code {
        USER_REJECTED => Error::UserRejected,
        code => Error::NetworkError(format!("{method} failed ({code}): {}", error.message)),
    }
}

/// Parse a `0x`-prefixed hex quantity.
fn parse_quantity(value: &str) -> Result<u64, Error> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| Error::NetworkError(format!("not a hex quantity: {value}")))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| Error::NetworkError(format!("invalid quantity {value}: {e}")))
}

/// Parse `0x`-prefixed hex data.
fn parse_data(value: &str) -> Result<Vec<u8>, Error> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(digits).map_err(|e| Error::NetworkError(format!("invalid hex data: {e}")))
}

fn big_quantity(value: &BigUint) -> String {
    format!("0x{}", value.to_str_radix(16))
}

fn tx_object(tx: &TxRequest) -> Value {
    let mut object = json!({
        "from": tx.from.to_hex(),
        "to": tx.to.to_hex(),
        "data": format!("0x{}", hex::encode(&tx.data)),
        "value": big_quantity(&tx.value),
    });
    if let Some(gas) = tx.gas {
        object["gas"] = Value::String(format!("{gas:#x}"));
    }
    object
}

fn parse_accounts(raw: Vec<String>) -> Result<Vec<Address>, Error> {
    raw.iter()
        .map(|a| {
            a.parse()
                .map_err(|e| Error::NetworkError(format!("invalid account {a}: {e}")))
        })
        .collect()
}

fn parse_receipt(raw: RawReceipt) -> Result<Receipt, Error> {
    Ok(Receipt {
        hash: TxHash(raw.transaction_hash),
        // pre-Byzantium receipts carry no status
        success: raw.status.as_deref().map_or(true, |s| s == "0x1"),
        gas_used: parse_quantity(&raw.gas_used)?,
        block_number: parse_quantity(&raw.block_number)?,
    })
}

#[derive(Debug, Default)]
struct Observed {
    chain_id: Option<u64>,
    accounts: Option<Vec<Address>>,
}

/// [`ChainConnector`] over HTTP JSON-RPC.
pub struct JsonRpcConnector {
    config: RpcConfig,
    client: reqwest::Client,
    next_id: AtomicU64,
    has_account: AtomicBool,
    observed: Mutex<Observed>,
    events: broadcast::Sender<WalletEvent>,
}

impl JsonRpcConnector {
    pub fn new(config: RpcConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events, _) = broadcast::channel(16);
        Ok(Self {
            config,
            client: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
            has_account: AtomicBool::new(false),
            observed: Mutex::new(Observed::default()),
            events,
        })
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    async fn raw_request(&self, method: &str, params: Value) -> Result<Value, Failure> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };
        debug!(method, id, "rpc request");

        let response = self
            .client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Failure::Transport(e.to_string()))?;
        let response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| Failure::Decode(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(Failure::Rpc(error));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    fn map_failure(&self, method: &str, failure: Failure) -> Error {
        match failure {
            Failure::Rpc(error) => rpc_error(method, &error),
            Failure::Transport(msg) if !self.has_account.load(Ordering::Relaxed) => {
                warn!(method, error = %msg, "endpoint unreachable");
                Error::WalletUnavailable
            }
            Failure::Transport(msg) => Error::NetworkError(format!("{method}: {msg}")),
            Failure::Decode(msg) => Error::NetworkError(format!("{method}: bad response: {msg}")),
        }
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, Error> {
        let value = self
            .raw_request(method, params)
            .await
            .map_err(|f| self.map_failure(method, f))?;
        serde_json::from_value(value)
            .map_err(|e| Error::NetworkError(format!("{method}: unexpected result: {e}")))
    }

    async fn accounts(&self) -> Result<Vec<Address>, Error> {
        let raw: Vec<String> = self.request("eth_accounts", json!([])).await?;
        parse_accounts(raw)
    }

    /// Compare the endpoint's network and accounts with what was last seen and
    /// broadcast a [`WalletEvent`] for each difference.
    pub async fn poll_changes(&self) -> Result<Vec<WalletEvent>, Error> {
        let chain_id = self.chain_id().await?;
        let accounts = self.accounts().await?;
        let mut observed = self.observed.lock().await;
        let mut changes = Vec::new();

        if observed.chain_id.is_some_and(|seen| seen != chain_id) {
            changes.push(WalletEvent::ChainChanged(chain_id));
        }
        if observed.accounts.as_ref().is_some_and(|seen| *seen != accounts) {
            changes.push(WalletEvent::AccountsChanged(accounts.clone()));
        }
        observed.chain_id = Some(chain_id);
        observed.accounts = Some(accounts);
        drop(observed);

        for event in &changes {
            info!(event = ?event, "wallet change observed");
            let _ = self.events.send(event.clone());
        }
        Ok(changes)
    }
}

#[async_trait]
impl ChainConnector for JsonRpcConnector {
    async fn request_accounts(&self) -> Result<Vec<Address>, Error> {
        let raw: Vec<String> = match self.raw_request("eth_requestAccounts", json!([])).await {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| Error::NetworkError(format!("eth_requestAccounts: {e}")))?,
            Err(Failure::Rpc(e)) if e.code == METHOD_NOT_FOUND || e.code == UNSUPPORTED_METHOD => {
                debug!("eth_requestAccounts unsupported, using eth_accounts");
                self.request("eth_accounts", json!([])).await?
            }
            Err(failure) => return Err(self.map_failure("eth_requestAccounts", failure)),
        };
        let accounts = parse_accounts(raw)?;

        if !accounts.is_empty() {
            self.has_account.store(true, Ordering::Relaxed);
        }
        self.observed.lock().await.accounts = Some(accounts.clone());
        Ok(accounts)
    }

    async fn chain_id(&self) -> Result<u64, Error> {
        let raw: String = self.request("eth_chainId", json!([])).await?;
        let chain_id = parse_quantity(&raw)?;
        let mut observed = self.observed.lock().await;
        if observed.chain_id.is_none() {
            observed.chain_id = Some(chain_id);
        }
        Ok(chain_id)
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, Error> {
        let params = json!([
            { "to": to.to_hex(), "data": format!("0x{}", hex::encode(&data)) },
            "latest"
        ]);
        let raw: String = self.request("eth_call", params).await?;
        parse_data(&raw)
    }

    async fn estimate_gas(&self, tx: &TxRequest) -> Result<u64, Error> {
        let raw: String = self.request("eth_estimateGas", json!([tx_object(tx)])).await?;
        parse_quantity(&raw)
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<TxHash, Error> {
        let raw: String = self
            .request("eth_sendTransaction", json!([tx_object(&tx)]))
            .await?;
        Ok(TxHash(raw))
    }

    async fn wait_for_receipt(&self, hash: &TxHash) -> Result<Receipt, Error> {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            let raw: Option<RawReceipt> = self
                .request("eth_getTransactionReceipt", json!([hash.0]))
                .await?;
            match raw {
                Some(raw) => return parse_receipt(raw),
                None => {
                    debug!(hash = %hash, "receipt pending");
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for JsonRpcConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcConnector")
            .field("url", &self.config.url)
            .finish()
    }
}
