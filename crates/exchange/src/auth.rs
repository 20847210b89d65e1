//! CLOB authentication.
//!
//! Two layers: L1 signs a ClobAuth EIP-712 attestation with the wallet key
//! and is only used to derive or create the L2 credential triple; L2 signs
//! every trading request with HMAC-SHA256 over
//! `{timestamp}{method}{path}{body}` using the derived secret.

use crate::eip712::{
    clob_auth_domain_separator, clob_auth_struct_hash, sign_hash, signing_hash, Eip712Error,
    POLYGON_CHAIN_ID,
};
use base64::{
    engine::general_purpose::{STANDARD as BASE64_STANDARD, URL_SAFE as BASE64_URL_SAFE},
    Engine,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Errors from either authentication layer.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("eip712: {0}")]
    Eip712(#[from] Eip712Error),

    #[error("hmac: {0}")]
    Hmac(String),

    #[error("base64: {0}")]
    Base64(String),
}

/// The L2 credential triple returned by the derive endpoint.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClobCredentials {
    pub api_key: String,
    /// Base64 HMAC secret.
    pub secret: String,
    pub passphrase: String,
}

/// Header set for an L1-authenticated request.
#[derive(Debug, Clone)]
pub struct L1Headers {
    pub address: String,
    pub signature: String,
    pub timestamp: String,
    pub nonce: String,
}

impl L1Headers {
    /// Header pairs in wire form.
    #[must_use]
    pub fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            ("POLY_ADDRESS", &self.address),
            ("POLY_SIGNATURE", &self.signature),
            ("POLY_TIMESTAMP", &self.timestamp),
            ("POLY_NONCE", &self.nonce),
        ]
    }
}

/// Signs the ClobAuth attestation for L1 authentication.
pub fn sign_l1_headers(
    address: &str,
    private_key_hex: &str,
    nonce: u64,
) -> Result<L1Headers, AuthError> {
    let timestamp = Utc::now().timestamp().to_string();
    let domain = clob_auth_domain_separator(POLYGON_CHAIN_ID);
    let struct_hash = clob_auth_struct_hash(address, &timestamp, nonce)?;
    let signature = sign_hash(&signing_hash(&domain, &struct_hash), private_key_hex)?;

    Ok(L1Headers {
        address: address.to_string(),
        signature,
        timestamp,
        nonce: nonce.to_string(),
    })
}

/// Header set for an L2-authenticated request.
#[derive(Debug, Clone)]
pub struct L2Headers {
    pub address: String,
    pub signature: String,
    pub timestamp: String,
    pub api_key: String,
    pub passphrase: String,
}

impl L2Headers {
    /// Header pairs in wire form.
    #[must_use]
    pub fn pairs(&self) -> [(&'static str, &str); 5] {
        [
            ("POLY_ADDRESS", &self.address),
            ("POLY_SIGNATURE", &self.signature),
            ("POLY_TIMESTAMP", &self.timestamp),
            ("POLY_API_KEY", &self.api_key),
            ("POLY_PASSPHRASE", &self.passphrase),
        ]
    }
}

/// L2 signer bound to one credential triple and signing address.
#[derive(Debug, Clone)]
pub struct L2Signer {
    credentials: ClobCredentials,
    address: String,
}

impl L2Signer {
    /// Creates a signer from derived credentials.
    #[must_use]
    pub fn new(credentials: ClobCredentials, address: impl Into<String>) -> Self {
        Self {
            credentials,
            address: address.into(),
        }
    }

    /// The API key in use.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.credentials.api_key
    }

    /// Builds headers for one request.
    pub fn headers(&self, method: &str, path: &str, body: &str) -> Result<L2Headers, AuthError> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.hmac(&timestamp, method, path, body)?;
        Ok(L2Headers {
            address: self.address.clone(),
            signature,
            timestamp,
            api_key: self.credentials.api_key.clone(),
            passphrase: self.credentials.passphrase.clone(),
        })
    }

    /// HMAC-SHA256 over `{timestamp}{method}{path}{body}`, URL-safe base64
    /// in and out to match the reference clients.
    fn hmac(&self, timestamp: &str, method: &str, path: &str, body: &str) -> Result<String, AuthError> {
        let secret = BASE64_URL_SAFE
            .decode(&self.credentials.secret)
            .or_else(|_| BASE64_STANDARD.decode(&self.credentials.secret))
            .map_err(|e| AuthError::Base64(e.to_string()))?;

        let mut message = format!("{timestamp}{method}{path}");
        if !body.is_empty() {
            message.push_str(body);
        }

        let mut mac = HmacSha256::new_from_slice(&secret)
            .map_err(|e| AuthError::Hmac(e.to_string()))?;
        mac.update(message.as_bytes());
        Ok(BASE64_URL_SAFE.encode(mac.finalize().into_bytes()))
    }
}
