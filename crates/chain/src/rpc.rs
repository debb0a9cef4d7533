//! Ledger node RPC transport.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use derive_more::{Display, Error};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::transaction::{Footprint, SignedTransaction, Transaction, TxHash};

/// Ledger RPC errors.
#[derive(Debug, Display, Error)]
pub enum RpcError {
    /// Connection to the node was never established, so nothing was delivered.
    #[display(fmt = "ledger node is unreachable: {}", _0)]
    Unreachable(#[error(not(source))] String),

    /// Request may have been delivered, but no usable response was received.
    #[display(fmt = "ledger transport error: {}", _0)]
    Transport(#[error(not(source))] String),

    /// Node responded with a JSON-RPC error.
    #[display(fmt = "ledger rpc error {}: {}", code, message)]
    Remote { code: i64, message: String },

    /// Node responded with neither result nor error.
    #[display(fmt = "empty ledger rpc response")]
    EmptyResponse,

    /// Unable to encode a request.
    Json(serde_json::Error),
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_builder() {
            RpcError::Unreachable(err.to_string())
        } else {
            RpcError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Json(err)
    }
}

/// Transaction simulation result.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Simulation {
    /// Contract or host error, if the call was rejected.
    #[serde(default)]
    pub error: Option<String>,

    /// Decoded return value.
    #[serde(default)]
    pub result: Option<Value>,

    #[serde(default)]
    pub footprint: Footprint,

    /// Resource fee required to include the transaction.
    #[serde(default)]
    pub min_resource_fee: u64,
}

/// Broadcast acknowledgement status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendStatus {
    Pending,
    Duplicate,
    TryAgainLater,
    Error,
}

/// Broadcast acknowledgement.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub hash: TxHash,
    pub status: SendStatus,

    #[serde(default)]
    pub error: Option<String>,
}

/// Transaction finality status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Success,
    Failed,
    NotFound,
}

/// Transaction status lookup result.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub status: TransactionStatus,

    #[serde(default)]
    pub return_value: Option<Value>,

    /// Ledger-reported failure reason.
    #[serde(default)]
    pub error: Option<String>,
}

/// Request/response contract of a ledger node.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Current sequence number of the provided account.
    async fn account_sequence(&self, address: &str) -> Result<u64, RpcError>;

    /// Sequence number of the latest closed ledger.
    async fn latest_ledger(&self) -> Result<u64, RpcError>;

    async fn simulate(&self, transaction: &Transaction) -> Result<Simulation, RpcError>;

    async fn send(&self, transaction: &SignedTransaction) -> Result<SendResponse, RpcError>;

    async fn transaction(&self, hash: &TxHash) -> Result<TransactionResponse, RpcError>;
}

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct Response<R> {
    result: Option<R>,
    error: Option<ResponseError>,
}

#[derive(Deserialize)]
struct ResponseError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct Sequence {
    sequence: u64,
}

/// JSON-RPC 2.0 client of a ledger node.
pub struct HttpLedgerRpc {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpLedgerRpc {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        debug!(%method, id, "sending ledger rpc request");

        let response: Response<R> = self
            .client
            .post(&self.url)
            .json(&Request {
                jsonrpc: "2.0",
                id,
                method,
                params,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match response {
            Response {
                error: Some(ResponseError { code, message }),
                ..
            } => Err(RpcError::Remote { code, message }),
            Response {
                result: Some(result),
                ..
            } => Ok(result),
            _ => Err(RpcError::EmptyResponse),
        }
    }
}

#[async_trait]
impl LedgerRpc for HttpLedgerRpc {
    async fn account_sequence(&self, address: &str) -> Result<u64, RpcError> {
        let account: Sequence = self.call("getAccount", json!({ "address": address })).await?;
        Ok(account.sequence)
    }

    async fn latest_ledger(&self) -> Result<u64, RpcError> {
        let ledger: Sequence = self.call("getLatestLedger", json!({})).await?;
        Ok(ledger.sequence)
    }

    async fn simulate(&self, transaction: &Transaction) -> Result<Simulation, RpcError> {
        self.call(
            "simulateTransaction",
            json!({ "transaction": transaction.envelope()? }),
        )
        .await
    }

    async fn send(&self, transaction: &SignedTransaction) -> Result<SendResponse, RpcError> {
        self.call(
            "sendTransaction",
            json!({ "transaction": transaction.envelope()? }),
        )
        .await
    }

    async fn transaction(&self, hash: &TxHash) -> Result<TransactionResponse, RpcError> {
        self.call("getTransaction", json!({ "hash": hash })).await
    }
}
