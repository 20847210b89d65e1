//! EIP-712 hashing and signing for CLOB orders.
//!
//! Orders are signed against the CTF exchange contracts with plain k256
//! ECDSA over hand-rolled ABI encoding; no chain SDK is involved. The
//! neg-risk flag selects the verifying contract, which changes the domain
//! separator and therefore the signature.

use rand::Rng;
use rust_decimal::Decimal;
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// EIP-712 domain name of the CTF exchange.
const DOMAIN_NAME: &str = "Polymarket CTF Exchange";
/// EIP-712 domain version.
const DOMAIN_VERSION: &str = "1";

/// Polygon mainnet chain id.
pub const POLYGON_CHAIN_ID: u64 = 137;

/// Standard CTF exchange contract.
pub const STANDARD_EXCHANGE: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";
/// Negative-risk CTF exchange contract.
pub const NEG_RISK_EXCHANGE: &str = "0xC5d563A36AE78145C45a50134d48A1215220f80a";

/// Domain name used by ClobAuth attestations.
pub const CLOB_AUTH_DOMAIN_NAME: &str = "ClobAuthDomain";
/// Fixed attestation message for L1 authentication.
pub const CLOB_AUTH_MESSAGE: &str = "This message attests that I control the given wallet";

/// USDC raw-unit scale (6 decimals).
const USDC_DECIMALS: u32 = 6;

/// Wire value for BUY.
pub const SIDE_BUY: u8 = 0;
/// Wire value for SELL.
pub const SIDE_SELL: u8 = 1;

/// Order-signature scheme selector carried in the signed struct.
///
/// The wire values 0/1/2 are exchange-defined and preserved verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SignatureType {
    /// Direct EOA signature.
    Eoa,
    /// Legacy proxy wallet.
    PolyProxy,
    /// Email/social-login gnosis-safe proxy.
    PolyGnosisSafe,
}

impl SignatureType {
    /// Wire integer.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Eoa => 0,
            Self::PolyProxy => 1,
            Self::PolyGnosisSafe => 2,
        }
    }

    /// Parses the wire integer; unknown values are rejected.
    #[must_use]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Eoa),
            1 => Some(Self::PolyProxy),
            2 => Some(Self::PolyGnosisSafe),
            _ => None,
        }
    }
}

/// Errors from hashing, amount math, or signing.
#[derive(Debug, Error)]
pub enum Eip712Error {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("amount error: {0}")]
    AmountError(String),
}

/// Signing context: chain plus the neg-risk contract switch.
#[derive(Debug, Clone, Copy)]
pub struct SigningContext {
    pub chain_id: u64,
    pub neg_risk: bool,
}

impl Default for SigningContext {
    fn default() -> Self {
        Self {
            chain_id: POLYGON_CHAIN_ID,
            neg_risk: false,
        }
    }
}

impl SigningContext {
    /// The verifying exchange contract for this context.
    #[must_use]
    pub fn exchange_address(&self) -> &'static str {
        if self.neg_risk {
            NEG_RISK_EXCHANGE
        } else {
            STANDARD_EXCHANGE
        }
    }
}

/// The order struct as hashed on-chain.
#[derive(Debug, Clone)]
pub struct SignableOrder {
    pub salt: u64,
    pub maker: [u8; 20],
    pub signer: [u8; 20],
    pub taker: [u8; 20],
    /// Decimal-string ERC1155 token id.
    pub token_id: String,
    /// USDC raw units the maker spends at most.
    pub maker_amount: u64,
    /// Raw units the taker pays at minimum.
    pub taker_amount: u64,
    /// Unix expiry, 0 for GTC.
    pub expiration: u64,
    pub nonce: u64,
    pub fee_rate_bps: u16,
    pub side: u8,
    pub signature_type: u8,
}

// =============================================================================
// Keccak helpers and ABI words
// =============================================================================

pub(crate) fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

fn keccak256_str(s: &str) -> [u8; 32] {
    keccak256(s.as_bytes())
}

fn word_from_u64(v: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&v.to_be_bytes());
    out
}

fn word_from_address(addr: &[u8; 20]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(addr);
    out
}

/// Parses a `0x`-prefixed or bare hex address.
pub fn parse_address(address: &str) -> Result<[u8; 20], Eip712Error> {
    let hex_part = address.strip_prefix("0x").unwrap_or(address);
    let bytes =
        hex::decode(hex_part).map_err(|e| Eip712Error::InvalidAddress(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| Eip712Error::InvalidAddress(format!("wrong length: {address}")))
}

/// Encodes a decimal-string token id as a 32-byte big-endian word.
///
/// Token ids are 256-bit numbers printed in base 10; this does the
/// schoolbook base conversion without a bigint dependency.
pub fn token_id_word(token_id: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    for ch in token_id.bytes() {
        if !ch.is_ascii_digit() {
            continue;
        }
        let digit = ch - b'0';
        // out = out * 10 + digit
        let mut carry = digit as u16;
        for byte in out.iter_mut().rev() {
            let v = (*byte as u16) * 10 + carry;
            *byte = (v & 0xff) as u8;
            carry = v >> 8;
        }
    }
    out
}

// =============================================================================
// Type and domain hashes
// =============================================================================

fn domain_type_hash() -> [u8; 32] {
    keccak256_str(
        "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
    )
}

fn order_type_hash() -> [u8; 32] {
    keccak256_str(
        "Order(uint256 salt,address maker,address signer,address taker,\
         uint256 tokenId,uint256 makerAmount,uint256 takerAmount,\
         uint256 expiration,uint256 nonce,uint256 feeRateBps,\
         uint8 side,uint8 signatureType)",
    )
}

/// Type hash for the ClobAuth attestation struct.
pub fn clob_auth_type_hash() -> [u8; 32] {
    keccak256_str("ClobAuth(address address,string timestamp,uint256 nonce,string message)")
}

/// Domain separator for order signing against `exchange_address`.
pub fn order_domain_separator(
    chain_id: u64,
    exchange_address: &str,
) -> Result<[u8; 32], Eip712Error> {
    let contract = parse_address(exchange_address)?;
    let mut encoded = Vec::with_capacity(5 * 32);
    encoded.extend_from_slice(&domain_type_hash());
    encoded.extend_from_slice(&keccak256_str(DOMAIN_NAME));
    encoded.extend_from_slice(&keccak256_str(DOMAIN_VERSION));
    encoded.extend_from_slice(&word_from_u64(chain_id));
    encoded.extend_from_slice(&word_from_address(&contract));
    Ok(keccak256(&encoded))
}

/// Domain separator for ClobAuth (no verifying contract field).
pub fn clob_auth_domain_separator(chain_id: u64) -> [u8; 32] {
    let mut encoded = Vec::with_capacity(4 * 32);
    encoded.extend_from_slice(&keccak256_str(
        "EIP712Domain(string name,string version,uint256 chainId)",
    ));
    encoded.extend_from_slice(&keccak256_str(CLOB_AUTH_DOMAIN_NAME));
    encoded.extend_from_slice(&keccak256_str(DOMAIN_VERSION));
    encoded.extend_from_slice(&word_from_u64(chain_id));
    keccak256(&encoded)
}

/// Struct hash of an order.
pub fn order_struct_hash(order: &SignableOrder) -> [u8; 32] {
    let mut encoded = Vec::with_capacity(13 * 32);
    encoded.extend_from_slice(&order_type_hash());
    encoded.extend_from_slice(&word_from_u64(order.salt));
    encoded.extend_from_slice(&word_from_address(&order.maker));
    encoded.extend_from_slice(&word_from_address(&order.signer));
    encoded.extend_from_slice(&word_from_address(&order.taker));
    encoded.extend_from_slice(&token_id_word(&order.token_id));
    encoded.extend_from_slice(&word_from_u64(order.maker_amount));
    encoded.extend_from_slice(&word_from_u64(order.taker_amount));
    encoded.extend_from_slice(&word_from_u64(order.expiration));
    encoded.extend_from_slice(&word_from_u64(order.nonce));
    encoded.extend_from_slice(&word_from_u64(order.fee_rate_bps as u64));
    encoded.extend_from_slice(&word_from_u64(order.side as u64));
    encoded.extend_from_slice(&word_from_u64(order.signature_type as u64));
    keccak256(&encoded)
}

/// Struct hash of a ClobAuth attestation.
pub fn clob_auth_struct_hash(
    address: &str,
    timestamp: &str,
    nonce: u64,
) -> Result<[u8; 32], Eip712Error> {
    let addr = parse_address(address)?;
    let mut encoded = Vec::with_capacity(5 * 32);
    encoded.extend_from_slice(&clob_auth_type_hash());
    encoded.extend_from_slice(&word_from_address(&addr));
    encoded.extend_from_slice(&keccak256_str(timestamp));
    encoded.extend_from_slice(&word_from_u64(nonce));
    encoded.extend_from_slice(&keccak256_str(CLOB_AUTH_MESSAGE));
    Ok(keccak256(&encoded))
}

/// Final signing hash: `keccak256(0x1901 || domain || struct)`.
pub fn signing_hash(domain_separator: &[u8; 32], struct_hash: &[u8; 32]) -> [u8; 32] {
    let mut data = Vec::with_capacity(66);
    data.push(0x19);
    data.push(0x01);
    data.extend_from_slice(domain_separator);
    data.extend_from_slice(struct_hash);
    keccak256(&data)
}

// =============================================================================
// ECDSA
// =============================================================================

/// Signs a 32-byte hash, returning `0x{r}{s}{v}` with v in {27, 28}.
pub fn sign_hash(hash: &[u8; 32], private_key_hex: &str) -> Result<String, Eip712Error> {
    use k256::ecdsa::SigningKey;

    let key_hex = private_key_hex.strip_prefix("0x").unwrap_or(private_key_hex);
    let key_bytes =
        hex::decode(key_hex).map_err(|e| Eip712Error::InvalidKey(e.to_string()))?;
    let signing_key = SigningKey::from_slice(&key_bytes)
        .map_err(|e| Eip712Error::InvalidKey(e.to_string()))?;

    let (signature, recovery_id) = signing_key
        .sign_prehash_recoverable(hash)
        .map_err(|e| Eip712Error::SigningFailed(e.to_string()))?;

    let mut sig = Vec::with_capacity(65);
    sig.extend_from_slice(&signature.r().to_bytes());
    sig.extend_from_slice(&signature.s().to_bytes());
    sig.push(recovery_id.to_byte() + 27);
    Ok(format!("0x{}", hex::encode(sig)))
}

/// Signs an order for the context's exchange contract.
pub fn sign_order(
    order: &SignableOrder,
    ctx: &SigningContext,
    private_key_hex: &str,
) -> Result<String, Eip712Error> {
    let domain = order_domain_separator(ctx.chain_id, ctx.exchange_address())?;
    let hash = signing_hash(&domain, &order_struct_hash(order));
    sign_hash(&hash, private_key_hex)
}

/// Derives the checksummed-free lowercase address for a private key.
pub fn address_from_key(private_key_hex: &str) -> Result<String, Eip712Error> {
    use k256::ecdsa::SigningKey;
    use k256::elliptic_curve::sec1::ToEncodedPoint;

    let key_hex = private_key_hex.strip_prefix("0x").unwrap_or(private_key_hex);
    let key_bytes =
        hex::decode(key_hex).map_err(|e| Eip712Error::InvalidKey(e.to_string()))?;
    let signing_key = SigningKey::from_slice(&key_bytes)
        .map_err(|e| Eip712Error::InvalidKey(e.to_string()))?;

    let public = signing_key.verifying_key().to_encoded_point(false);
    // Address = last 20 bytes of keccak(uncompressed pubkey sans 0x04 prefix).
    let hash = keccak256(&public.as_bytes()[1..]);
    Ok(format!("0x{}", hex::encode(&hash[12..])))
}

// =============================================================================
// Amounts
// =============================================================================

/// Converts `(side, price, size)` into raw maker/taker amounts.
///
/// Sizes round down to the tick's size precision, prices round to the tick.
/// For a BUY the maker pays USDC and takes shares; a SELL is the mirror.
pub fn calculate_amounts(
    side: u8,
    price: Decimal,
    size: Decimal,
    tick_decimals: u32,
) -> Result<(u64, u64), Eip712Error> {
    if price <= Decimal::ZERO || price >= Decimal::ONE {
        return Err(Eip712Error::AmountError(format!(
            "price must be in (0, 1), got {price}"
        )));
    }
    if size <= Decimal::ZERO {
        return Err(Eip712Error::AmountError("size must be positive".into()));
    }

    let scale = Decimal::from(10u64.pow(USDC_DECIMALS));
    let price_rounded = round_to(price, tick_decimals);
    let size_rounded = round_down(size, 2);

    let shares_raw = to_u64((size_rounded * scale).floor())?;
    let usdc_raw = to_u64((size_rounded * price_rounded * scale).floor())?;

    Ok(if side == SIDE_BUY {
        (usdc_raw, shares_raw)
    } else {
        (shares_raw, usdc_raw)
    })
}

fn round_down(value: Decimal, dp: u32) -> Decimal {
    let factor = Decimal::from(10u64.pow(dp));
    (value * factor).floor() / factor
}

fn round_to(value: Decimal, dp: u32) -> Decimal {
    let factor = Decimal::from(10u64.pow(dp));
    (value * factor).round() / factor
}

fn to_u64(d: Decimal) -> Result<u64, Eip712Error> {
    d.to_string()
        .split('.')
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Eip712Error::AmountError(format!("cannot convert {d}")))
}

/// Random order salt, small enough for a JSON integer.
#[must_use]
pub fn generate_salt() -> u64 {
    let now = chrono::Utc::now().timestamp() as u64;
    let r: f64 = rand::thread_rng().gen();
    (now as f64 * r).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const TEST_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn sample_order() -> SignableOrder {
        SignableOrder {
            salt: 12345,
            maker: [0x11; 20],
            signer: [0x11; 20],
            taker: [0u8; 20],
            token_id: "123456789".to_string(),
            maker_amount: 5_000_000,
            taker_amount: 10_000_000,
            expiration: 0,
            nonce: 0,
            fee_rate_bps: 0,
            side: SIDE_BUY,
            signature_type: SignatureType::Eoa.as_u8(),
        }
    }

    #[test]
    fn signature_type_round_trips() {
        for v in 0..=2u8 {
            assert_eq!(SignatureType::from_u8(v).unwrap().as_u8(), v);
        }
        assert!(SignatureType::from_u8(3).is_none());
    }

    #[test]
    fn token_id_word_small_values() {
        let word = token_id_word("255");
        assert_eq!(word[31], 255);
        assert!(word[..31].iter().all(|&b| b == 0));
    }

    #[test]
    fn token_id_word_large_value() {
        // 2^64 = 18446744073709551616: one past the u64 range.
        let word = token_id_word("18446744073709551616");
        assert_eq!(word[23], 1);
        assert!(word[24..].iter().all(|&b| b == 0));
    }

    #[test]
    fn domain_separator_differs_by_contract() {
        let std = order_domain_separator(POLYGON_CHAIN_ID, STANDARD_EXCHANGE).unwrap();
        let neg = order_domain_separator(POLYGON_CHAIN_ID, NEG_RISK_EXCHANGE).unwrap();
        assert_ne!(std, neg);
    }

    #[test]
    fn order_hash_is_deterministic_and_field_sensitive() {
        let order = sample_order();
        assert_eq!(order_struct_hash(&order), order_struct_hash(&order));

        let mut other = sample_order();
        other.side = SIDE_SELL;
        assert_ne!(order_struct_hash(&order), order_struct_hash(&other));
    }

    #[test]
    fn sign_order_produces_65_byte_signature() {
        let sig = sign_order(&sample_order(), &SigningContext::default(), TEST_KEY).unwrap();
        assert!(sig.starts_with("0x"));
        assert_eq!(sig.len(), 132);
        let v = u8::from_str_radix(&sig[130..], 16).unwrap();
        assert!(v == 27 || v == 28);
    }

    #[test]
    fn neg_risk_changes_the_signature() {
        let order = sample_order();
        let std_sig = sign_order(&order, &SigningContext::default(), TEST_KEY).unwrap();
        let neg_sig = sign_order(
            &order,
            &SigningContext {
                chain_id: POLYGON_CHAIN_ID,
                neg_risk: true,
            },
            TEST_KEY,
        )
        .unwrap();
        assert_ne!(std_sig, neg_sig);
    }

    #[test]
    fn address_from_key_matches_known_vector() {
        // Well-known test vector for this key.
        let addr = address_from_key(TEST_KEY).unwrap();
        assert_eq!(addr, "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23");
    }

    #[test]
    fn buy_amounts_swap_for_sell() {
        let (maker_buy, taker_buy) = calculate_amounts(SIDE_BUY, dec!(0.50), dec!(10), 2).unwrap();
        let (maker_sell, taker_sell) =
            calculate_amounts(SIDE_SELL, dec!(0.50), dec!(10), 2).unwrap();
        // BUY: pay 5 USDC for 10 shares.
        assert_eq!(maker_buy, 5_000_000);
        assert_eq!(taker_buy, 10_000_000);
        // SELL: give 10 shares for 5 USDC.
        assert_eq!(maker_sell, 10_000_000);
        assert_eq!(taker_sell, 5_000_000);
    }

    #[test]
    fn amounts_round_size_down() {
        let (maker, taker) = calculate_amounts(SIDE_BUY, dec!(0.40), dec!(10.999), 2).unwrap();
        assert_eq!(taker, 10_990_000);
        assert_eq!(maker, 4_396_000);
    }

    #[test]
    fn amounts_reject_out_of_range_price() {
        assert!(calculate_amounts(SIDE_BUY, dec!(0), dec!(10), 2).is_err());
        assert!(calculate_amounts(SIDE_BUY, dec!(1), dec!(10), 2).is_err());
        assert!(calculate_amounts(SIDE_BUY, dec!(0.5), dec!(0), 2).is_err());
    }

    #[test]
    fn tick_decimals_affect_price_rounding() {
        // 0.123 at a 0.01 tick rounds to 0.12; at 0.001 it stays.
        let (maker_2dp, _) = calculate_amounts(SIDE_BUY, dec!(0.123), dec!(10), 2).unwrap();
        let (maker_3dp, _) = calculate_amounts(SIDE_BUY, dec!(0.123), dec!(10), 3).unwrap();
        assert_eq!(maker_2dp, 1_200_000);
        assert_eq!(maker_3dp, 1_230_000);
    }
}
