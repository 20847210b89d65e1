//! Legacy (type 0) transaction construction and the JSON-RPC client.
//!
//! Transactions are RLP-encoded by hand and signed with k256 under EIP-155
//! replay protection. Read calls go through `eth_call`; writes are
//! broadcast raw and polled for a receipt.

use k256::ecdsa::SigningKey;
use reqwest::Client;
use sha3::{Digest, Keccak256};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from transaction plumbing.
#[derive(Debug, Error)]
pub enum TxError {
    #[error("signing failed: {0}")]
    Signing(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Node rejected the transaction; message carried verbatim.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// The transaction mined but reverted.
    #[error("transaction reverted: {0}")]
    Reverted(String),

    #[error("timed out waiting for receipt of {0}")]
    ReceiptTimeout(String),

    #[error("invalid private key: {0}")]
    InvalidKey(String),
}

// =============================================================================
// RLP
// =============================================================================

fn rlp_bytes(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] < 0x80 {
        vec![data[0]]
    } else if data.len() <= 55 {
        let mut out = Vec::with_capacity(1 + data.len());
        out.push(0x80 + data.len() as u8);
        out.extend_from_slice(data);
        out
    } else {
        let len = minimal_be(data.len() as u64);
        let mut out = Vec::with_capacity(1 + len.len() + data.len());
        out.push(0xb7 + len.len() as u8);
        out.extend_from_slice(&len);
        out.extend_from_slice(data);
        out
    }
}

fn rlp_u64(val: u64) -> Vec<u8> {
    if val == 0 {
        rlp_bytes(&[])
    } else {
        rlp_bytes(&minimal_be(val))
    }
}

fn rlp_uint(val: &[u8]) -> Vec<u8> {
    let start = val.iter().position(|&b| b != 0).unwrap_or(val.len());
    rlp_bytes(&val[start..])
}

fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload: Vec<u8> = items.iter().flatten().copied().collect();
    if payload.len() <= 55 {
        let mut out = Vec::with_capacity(1 + payload.len());
        out.push(0xc0 + payload.len() as u8);
        out.extend_from_slice(&payload);
        out
    } else {
        let len = minimal_be(payload.len() as u64);
        let mut out = Vec::with_capacity(1 + len.len() + payload.len());
        out.push(0xf7 + len.len() as u8);
        out.extend_from_slice(&len);
        out.extend_from_slice(&payload);
        out
    }
}

fn minimal_be(val: u64) -> Vec<u8> {
    let bytes = val.to_be_bytes();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    bytes[start..].to_vec()
}

// =============================================================================
// Signing
// =============================================================================

/// An unsigned legacy transaction.
#[derive(Debug, Clone)]
pub struct LegacyTx {
    pub nonce: u64,
    pub gas_price: u64,
    pub gas_limit: u64,
    pub to: [u8; 20],
    /// Value in wei; zero for every CTF call.
    pub value: u64,
    pub data: Vec<u8>,
}

/// Signs `tx` under EIP-155, returning the raw broadcastable bytes.
pub fn sign_legacy_tx(
    tx: &LegacyTx,
    chain_id: u64,
    private_key_hex: &str,
) -> Result<Vec<u8>, TxError> {
    let unsigned = rlp_list(&[
        rlp_u64(tx.nonce),
        rlp_u64(tx.gas_price),
        rlp_u64(tx.gas_limit),
        rlp_bytes(&tx.to),
        rlp_u64(tx.value),
        rlp_bytes(&tx.data),
        rlp_u64(chain_id),
        rlp_bytes(&[]),
        rlp_bytes(&[]),
    ]);
    let hash = Keccak256::digest(&unsigned);

    let key_hex = private_key_hex.strip_prefix("0x").unwrap_or(private_key_hex);
    let key_bytes = hex::decode(key_hex).map_err(|e| TxError::InvalidKey(e.to_string()))?;
    let key =
        SigningKey::from_slice(&key_bytes).map_err(|e| TxError::InvalidKey(e.to_string()))?;

    let (signature, recovery_id) = key
        .sign_prehash_recoverable(&hash)
        .map_err(|e| TxError::Signing(e.to_string()))?;

    let v = chain_id * 2 + 35 + u64::from(recovery_id.to_byte());
    Ok(rlp_list(&[
        rlp_u64(tx.nonce),
        rlp_u64(tx.gas_price),
        rlp_u64(tx.gas_limit),
        rlp_bytes(&tx.to),
        rlp_u64(tx.value),
        rlp_bytes(&tx.data),
        rlp_u64(v),
        rlp_uint(signature.r().to_bytes().as_slice()),
        rlp_uint(signature.s().to_bytes().as_slice()),
    ]))
}

// =============================================================================
// RPC client
// =============================================================================

/// Thin JSON-RPC client over one node URL.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: Client,
    url: String,
}

impl RpcClient {
    /// Creates a client for the given node URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            url: url.into(),
        }
    }

    /// The node URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, TxError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        let resp: serde_json::Value =
            self.http.post(&self.url).json(&body).send().await?.json().await?;
        if let Some(error) = resp.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown rpc error");
            return Err(TxError::Rpc(message.to_string()));
        }
        resp.get("result")
            .cloned()
            .ok_or_else(|| TxError::Rpc("missing result".to_string()))
    }

    async fn request_u64(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<u64, TxError> {
        let result = self.request(method, params).await?;
        parse_hex_u64(&result)
    }

    /// Pending-inclusive nonce for an address.
    pub async fn nonce(&self, address: &str) -> Result<u64, TxError> {
        self.request_u64(
            "eth_getTransactionCount",
            serde_json::json!([address, "pending"]),
        )
        .await
    }

    /// Current gas price in wei.
    pub async fn gas_price(&self) -> Result<u64, TxError> {
        self.request_u64("eth_gasPrice", serde_json::json!([])).await
    }

    /// Native-token balance in wei.
    pub async fn balance(&self, address: &str) -> Result<u128, TxError> {
        let result = self
            .request("eth_getBalance", serde_json::json!([address, "latest"]))
            .await?;
        parse_hex_u128(&result)
    }

    /// Gas estimate for a call; surfaces the node's revert reason verbatim.
    pub async fn estimate_gas(
        &self,
        from: &str,
        to: &str,
        data: &[u8],
    ) -> Result<u64, TxError> {
        let params = serde_json::json!([{
            "from": from,
            "to": to,
            "data": format!("0x{}", hex::encode(data)),
        }]);
        match self.request_u64("eth_estimateGas", params).await {
            Ok(gas) => Ok(gas),
            Err(TxError::Rpc(message)) => Err(TxError::Reverted(message)),
            Err(other) => Err(other),
        }
    }

    /// Read-only `eth_call`, returning the raw result bytes.
    pub async fn call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>, TxError> {
        let params = serde_json::json!([{
            "to": to,
            "data": format!("0x{}", hex::encode(data)),
        }, "latest"]);
        let result = self.request("eth_call", params).await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| TxError::Rpc("non-string call result".to_string()))?;
        hex::decode(hex_str.strip_prefix("0x").unwrap_or(hex_str))
            .map_err(|e| TxError::Rpc(format!("bad call result hex: {e}")))
    }

    /// Broadcasts raw signed bytes, returning the transaction hash.
    pub async fn send_raw(&self, signed: &[u8]) -> Result<String, TxError> {
        let tx_hex = format!("0x{}", hex::encode(signed));
        match self
            .request("eth_sendRawTransaction", serde_json::json!([tx_hex]))
            .await
        {
            Ok(result) => result
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| TxError::Rpc("no tx hash in response".to_string())),
            Err(TxError::Rpc(message)) => Err(TxError::Rejected(message)),
            Err(other) => Err(other),
        }
    }

    /// Polls for the receipt every 2s up to `timeout`.
    ///
    /// # Errors
    ///
    /// [`TxError::Reverted`] when the transaction mined with status 0,
    /// [`TxError::ReceiptTimeout`] when no receipt arrives in time.
    pub async fn wait_for_receipt(
        &self,
        tx_hash: &str,
        timeout: Duration,
    ) -> Result<(), TxError> {
        let start = Instant::now();
        loop {
            if start.elapsed() > timeout {
                return Err(TxError::ReceiptTimeout(tx_hash.to_string()));
            }
            let result = self
                .request(
                    "eth_getTransactionReceipt",
                    serde_json::json!([tx_hash]),
                )
                .await?;
            if !result.is_null() {
                let status = result
                    .get("status")
                    .and_then(|s| s.as_str())
                    .unwrap_or("0x0");
                if status == "0x1" {
                    info!(tx_hash, "transaction confirmed");
                    return Ok(());
                }
                debug!(tx_hash, "transaction reverted");
                return Err(TxError::Reverted(format!("status 0 for {tx_hash}")));
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }
}

fn parse_hex_u64(result: &serde_json::Value) -> Result<u64, TxError> {
    let s = result
        .as_str()
        .ok_or_else(|| TxError::Rpc("non-string numeric result".to_string()))?;
    u64::from_str_radix(s.strip_prefix("0x").unwrap_or(s), 16)
        .map_err(|e| TxError::Rpc(format!("bad hex '{s}': {e}")))
}

fn parse_hex_u128(result: &serde_json::Value) -> Result<u128, TxError> {
    let s = result
        .as_str()
        .ok_or_else(|| TxError::Rpc("non-string numeric result".to_string()))?;
    u128::from_str_radix(s.strip_prefix("0x").unwrap_or(s), 16)
        .map_err(|e| TxError::Rpc(format!("bad hex '{s}': {e}")))
}
