//! The settlement client: split, merge, redeem, approvals, readiness.
//!
//! Writes from one wallet are serialized behind a mutex so two tasks can
//! never race the nonce; read-only calls bypass the lock and may run in
//! parallel. Standard markets settle through the conditional-tokens
//! contract directly, negative-risk markets through the adapter; the two
//! paths share the position-id helper but encode different calldata.

use crate::abi;
use crate::position::{self, OutcomeIndex};
use crate::tx::{sign_legacy_tx, LegacyTx, RpcClient, TxError};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// USDC raw-unit scale.
const USDC_SCALE: u32 = 1_000_000;

/// Gas limit cap for approvals.
const APPROVAL_GAS_LIMIT: u64 = 100_000;

/// Headroom multiplier applied to gas estimates for splits and merges.
const ESTIMATE_HEADROOM_NUM: u64 = 12;
const ESTIMATE_HEADROOM_DEN: u64 = 10;

/// Retry multiplier after a suspected gas underestimate.
const GAS_RETRY_NUM: u64 = 15;
const GAS_RETRY_DEN: u64 = 10;

/// Allowances at or above this raw value count as unlimited.
const UNLIMITED_ALLOWANCE_FLOOR: u128 = 1_000_000_000_000_000_000;

/// Receipt wait budget per transaction.
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors from settlement operations.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Tx(#[from] TxError),

    #[error("position: {0}")]
    Position(#[from] position::PositionError),

    #[error("validation: {0}")]
    Validation(String),

    /// Balance or allowance too low; message names the remediation.
    #[error("insufficient: {0}")]
    Insufficient(String),
}

/// The contract set on one chain.
#[derive(Debug, Clone)]
pub struct ContractRegistry {
    pub conditional_tokens: String,
    pub neg_risk_adapter: String,
    pub standard_exchange: String,
    pub neg_risk_exchange: String,
    /// Bridged collateral (USDC.e); the form the exchange settles in.
    pub collateral: String,
    /// Native USDC; a common wrong-form balance worth surfacing.
    pub native_collateral: String,
    pub chain_id: u64,
}

impl ContractRegistry {
    /// Polygon mainnet deployment.
    #[must_use]
    pub fn polygon() -> Self {
        Self {
            conditional_tokens: "0x4D97DCd97eC945f40cF65F87097ACe5EA0476045".to_string(),
            neg_risk_adapter: "0xd91E80cF2E7be2e162c6513ceD06f1dD0dA35296".to_string(),
            standard_exchange: "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E".to_string(),
            neg_risk_exchange: "0xC5d563A36AE78145C45a50134d48A1215220f80a".to_string(),
            collateral: "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174".to_string(),
            native_collateral: "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359".to_string(),
            chain_id: 137,
        }
    }
}

/// Result of the trade-readiness probe.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CtfReadiness {
    /// Bridged USDC.e balance, whole tokens.
    pub usdce_balance: Decimal,
    /// Native USDC balance, whole tokens.
    pub native_usdc_balance: Decimal,
    /// Gas token balance, whole tokens.
    pub matic_balance: Decimal,
    pub allowances_ok: bool,
    pub operator_approvals_ok: bool,
    pub ready: bool,
    /// Remediation hint when not ready.
    pub suggestion: Option<String>,
}

/// Per-wallet settlement context: key material, funder, and provider.
#[derive(Clone)]
pub struct SettlementContext {
    pub private_key: String,
    /// Address whose positions settle (funder/proxy or the EOA itself).
    pub address: String,
}

/// Settlement client bound to one wallet and one chain.
#[derive(Clone)]
pub struct SettlementClient {
    rpc: RpcClient,
    registry: ContractRegistry,
    ctx: SettlementContext,
    gas_price_factor: f64,
    /// Serializes writes from this wallet (nonce discipline).
    write_lock: Arc<Mutex<()>>,
}

impl SettlementClient {
    /// Creates a client. `gas_price_factor` is clamped to [1.5, 2.0].
    #[must_use]
    pub fn new(rpc: RpcClient, registry: ContractRegistry, ctx: SettlementContext) -> Self {
        Self {
            rpc,
            registry,
            ctx,
            gas_price_factor: 1.5,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Overrides the gas price safety factor.
    #[must_use]
    pub fn with_gas_price_factor(mut self, factor: f64) -> Self {
        self.gas_price_factor = factor.clamp(1.5, 2.0);
        self
    }

    /// The wallet address this client settles for.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.ctx.address
    }

    /// The contract registry in use.
    #[must_use]
    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    // =========================================================================
    // Split / merge / redeem
    // =========================================================================

    /// Splits `amount` USDC of collateral into YES+NO for the condition.
    pub async fn split(
        &self,
        condition_id: &str,
        amount: Decimal,
        neg_risk: bool,
    ) -> Result<String, SettlementError> {
        let raw = usdc_raw(amount)?;
        let condition = position::parse_condition_id(condition_id)?;

        let balance = self.collateral_balance().await?;
        if balance < amount {
            return Err(SettlementError::Insufficient(format!(
                "collateral balance {balance} below split amount {amount}; top up USDC.e"
            )));
        }

        let (to, data) = if neg_risk {
            (
                self.registry.neg_risk_adapter.clone(),
                abi::neg_risk_split(&condition, raw),
            )
        } else {
            let collateral = position::parse_address(&self.registry.collateral)?;
            (
                self.registry.conditional_tokens.clone(),
                abi::ctf_split_position(&collateral, &condition, raw),
            )
        };
        info!(condition_id, %amount, neg_risk, "splitting collateral");
        self.send_write(&to, data, None).await
    }

    /// Merges `amount` YES+NO pairs back into collateral, checking both
    /// position balances first.
    pub async fn merge(
        &self,
        condition_id: &str,
        amount: Decimal,
        neg_risk: bool,
    ) -> Result<String, SettlementError> {
        let yes = self
            .position_balance(&self.ctx.address, condition_id, OutcomeIndex::Yes)
            .await?;
        let no = self
            .position_balance(&self.ctx.address, condition_id, OutcomeIndex::No)
            .await?;
        let available = yes.min(no);
        if available < amount {
            return Err(SettlementError::Insufficient(format!(
                "paired balance {available} below merge amount {amount} (yes {yes}, no {no})"
            )));
        }
        self.merge_unchecked(condition_id, amount, neg_risk).await
    }

    /// Merge variant that skips the preflight balance reads; used when the
    /// caller just received fill quantities and knows the balances.
    pub async fn merge_by_token_ids(
        &self,
        condition_id: &str,
        amount: Decimal,
        neg_risk: bool,
    ) -> Result<String, SettlementError> {
        self.merge_unchecked(condition_id, amount, neg_risk).await
    }

    async fn merge_unchecked(
        &self,
        condition_id: &str,
        amount: Decimal,
        neg_risk: bool,
    ) -> Result<String, SettlementError> {
        let raw = usdc_raw(amount)?;
        let condition = position::parse_condition_id(condition_id)?;

        let (to, data) = if neg_risk {
            (
                self.registry.neg_risk_adapter.clone(),
                abi::neg_risk_merge(&condition, raw),
            )
        } else {
            let collateral = position::parse_address(&self.registry.collateral)?;
            (
                self.registry.conditional_tokens.clone(),
                abi::ctf_merge_positions(&collateral, &condition, raw),
            )
        };
        info!(condition_id, %amount, neg_risk, "merging pairs");
        self.send_write(&to, data, None).await
    }

    /// Redeems winning tokens for a resolved condition.
    pub async fn redeem(
        &self,
        condition_id: &str,
        neg_risk: bool,
    ) -> Result<String, SettlementError> {
        let condition = position::parse_condition_id(condition_id)?;

        if !self.is_resolved(condition_id).await? {
            return Err(SettlementError::Validation(format!(
                "condition {condition_id} is not resolved yet"
            )));
        }

        let (to, data) = if neg_risk {
            let yes = self
                .position_balance_raw(&self.ctx.address, condition_id, OutcomeIndex::Yes)
                .await?;
            let no = self
                .position_balance_raw(&self.ctx.address, condition_id, OutcomeIndex::No)
                .await?;
            (
                self.registry.neg_risk_adapter.clone(),
                abi::neg_risk_redeem(&condition, [yes, no]),
            )
        } else {
            let collateral = position::parse_address(&self.registry.collateral)?;
            (
                self.registry.conditional_tokens.clone(),
                abi::ctf_redeem_positions(&collateral, &condition),
            )
        };
        info!(condition_id, neg_risk, "redeeming positions");
        self.send_write(&to, data, None).await
    }

    /// Whether the condition's payout denominator is set.
    pub async fn is_resolved(&self, condition_id: &str) -> Result<bool, SettlementError> {
        let condition = position::parse_condition_id(condition_id)?;
        let data = abi::ctf_payout_denominator(&condition);
        let result = self
            .rpc
            .call(&self.registry.conditional_tokens, &data)
            .await?;
        Ok(abi::decode_uint(&result) > 0)
    }

    /// Winning outcome of a resolved condition, read from the payout
    /// numerators. `None` while unresolved or on a split payout.
    pub async fn winning_outcome(
        &self,
        condition_id: &str,
    ) -> Result<Option<OutcomeIndex>, SettlementError> {
        if !self.is_resolved(condition_id).await? {
            return Ok(None);
        }
        let condition = position::parse_condition_id(condition_id)?;
        let yes_result = self
            .rpc
            .call(
                &self.registry.conditional_tokens,
                &abi::ctf_payout_numerators(&condition, 0),
            )
            .await?;
        let no_result = self
            .rpc
            .call(
                &self.registry.conditional_tokens,
                &abi::ctf_payout_numerators(&condition, 1),
            )
            .await?;
        let yes = abi::decode_uint(&yes_result);
        let no = abi::decode_uint(&no_result);
        Ok(match (yes > 0, no > 0) {
            (true, false) => Some(OutcomeIndex::Yes),
            (false, true) => Some(OutcomeIndex::No),
            _ => None,
        })
    }

    // =========================================================================
    // Balances
    // =========================================================================

    /// Conditional-token balance for one outcome, whole tokens.
    pub async fn position_balance(
        &self,
        owner: &str,
        condition_id: &str,
        outcome: OutcomeIndex,
    ) -> Result<Decimal, SettlementError> {
        let raw = self.position_balance_raw(owner, condition_id, outcome).await?;
        Ok(dec_from_u128(raw) / Decimal::from(USDC_SCALE))
    }

    async fn position_balance_raw(
        &self,
        owner: &str,
        condition_id: &str,
        outcome: OutcomeIndex,
    ) -> Result<u128, SettlementError> {
        let owner_bytes = position::parse_address(owner)?;
        let condition = position::parse_condition_id(condition_id)?;
        let collateral = position::parse_address(&self.registry.collateral)?;
        let id = position::position_id(&collateral, &condition, outcome);
        let data = abi::erc1155_balance_of(&owner_bytes, &id);
        let result = self
            .rpc
            .call(&self.registry.conditional_tokens, &data)
            .await?;
        Ok(abi::decode_uint(&result))
    }

    /// Bridged-collateral balance, whole tokens.
    pub async fn collateral_balance(&self) -> Result<Decimal, SettlementError> {
        let raw = self.erc20_balance(&self.registry.collateral).await?;
        Ok(dec_from_u128(raw) / Decimal::from(USDC_SCALE))
    }

    async fn erc20_balance(&self, token: &str) -> Result<u128, SettlementError> {
        let owner = position::parse_address(&self.ctx.address)?;
        let result = self.rpc.call(token, &abi::erc20_balance_of(&owner)).await?;
        Ok(abi::decode_uint(&result))
    }

    // =========================================================================
    // Approvals
    // =========================================================================

    /// Grants an unlimited collateral allowance to `spender`.
    pub async fn approve_erc20(&self, spender: &str) -> Result<String, SettlementError> {
        let spender_bytes = position::parse_address(spender)?;
        let data = abi::erc20_approve(&spender_bytes, u128::MAX);
        info!(spender, "approving collateral");
        self.send_write(&self.registry.collateral.clone(), data, Some(APPROVAL_GAS_LIMIT))
            .await
    }

    /// Grants ERC1155 operator approval on the conditional tokens.
    pub async fn set_approval_for_all_1155(
        &self,
        operator: &str,
    ) -> Result<String, SettlementError> {
        let operator_bytes = position::parse_address(operator)?;
        let data = abi::erc1155_set_approval_for_all(&operator_bytes, true);
        info!(operator, "approving conditional-token operator");
        self.send_write(
            &self.registry.conditional_tokens.clone(),
            data,
            Some(APPROVAL_GAS_LIMIT),
        )
        .await
    }

    async fn allowance_unlimited(&self, spender: &str) -> Result<bool, SettlementError> {
        let owner = position::parse_address(&self.ctx.address)?;
        let spender_bytes = position::parse_address(spender)?;
        let result = self
            .rpc
            .call(
                &self.registry.collateral,
                &abi::erc20_allowance(&owner, &spender_bytes),
            )
            .await?;
        Ok(abi::decode_uint(&result) >= UNLIMITED_ALLOWANCE_FLOOR)
    }

    async fn operator_approved(&self, operator: &str) -> Result<bool, SettlementError> {
        let owner = position::parse_address(&self.ctx.address)?;
        let operator_bytes = position::parse_address(operator)?;
        let result = self
            .rpc
            .call(
                &self.registry.conditional_tokens,
                &abi::erc1155_is_approved_for_all(&owner, &operator_bytes),
            )
            .await?;
        Ok(abi::decode_bool(&result))
    }

    /// Probes everything trading requires: unlimited collateral allowance
    /// on both exchanges, operator approval for both exchanges and the
    /// adapter, gas, and bridged collateral at or above `min_amount`.
    pub async fn check_ready_for_ctf(
        &self,
        min_amount: Decimal,
    ) -> Result<CtfReadiness, SettlementError> {
        let usdce_raw = self.erc20_balance(&self.registry.collateral).await?;
        let native_raw = self.erc20_balance(&self.registry.native_collateral).await?;
        let matic_wei = self.rpc.balance(&self.ctx.address).await?;

        let usdce_balance = dec_from_u128(usdce_raw) / Decimal::from(USDC_SCALE);
        let native_usdc_balance = dec_from_u128(native_raw) / Decimal::from(USDC_SCALE);
        let matic_balance =
            dec_from_u128(matic_wei) / Decimal::from(1_000_000_000_000_000_000u64);

        let allowances_ok = self
            .allowance_unlimited(&self.registry.standard_exchange)
            .await?
            && self
                .allowance_unlimited(&self.registry.neg_risk_exchange)
                .await?;
        let operator_approvals_ok = self
            .operator_approved(&self.registry.standard_exchange)
            .await?
            && self
                .operator_approved(&self.registry.neg_risk_exchange)
                .await?
            && self.operator_approved(&self.registry.neg_risk_adapter).await?;

        let has_gas = matic_wei > 0;
        let has_collateral = usdce_balance >= min_amount && usdce_raw > 0;
        let ready = allowances_ok && operator_approvals_ok && has_gas && has_collateral;

        let suggestion = if ready {
            None
        } else if !has_collateral && native_raw > 0 {
            // The classic trap: funds arrived as native USDC, which the
            // exchange contracts do not accept.
            Some(format!(
                "holding {native_usdc_balance} native USDC but {usdce_balance} USDC.e; \
                 swap native USDC to bridged USDC.e"
            ))
        } else if !has_collateral {
            Some("deposit USDC.e to the wallet".to_string())
        } else if !has_gas {
            Some("top up POL for gas".to_string())
        } else if !allowances_ok {
            Some("approve USDC.e on both exchange contracts".to_string())
        } else {
            Some("grant conditional-token operator approvals".to_string())
        };

        Ok(CtfReadiness {
            usdce_balance,
            native_usdc_balance,
            matic_balance,
            allowances_ok,
            operator_approvals_ok,
            ready,
            suggestion,
        })
    }

    // =========================================================================
    // Write path
    // =========================================================================

    async fn send_write(
        &self,
        to: &str,
        data: Vec<u8>,
        gas_limit_cap: Option<u64>,
    ) -> Result<String, SettlementError> {
        let _guard = self.write_lock.lock().await;

        let estimate = self
            .rpc
            .estimate_gas(&self.ctx.address, to, &data)
            .await?;
        let gas_limit = match gas_limit_cap {
            Some(cap) => estimate.min(cap),
            None => estimate * ESTIMATE_HEADROOM_NUM / ESTIMATE_HEADROOM_DEN,
        };

        match self.submit_once(to, &data, gas_limit).await {
            Ok(hash) => Ok(hash),
            Err(SettlementError::Tx(TxError::Reverted(reason)))
                if reason.to_lowercase().contains("gas") && gas_limit_cap.is_none() =>
            {
                // One retry at 1.5x the estimate for suspected underestimates.
                let bumped = estimate * GAS_RETRY_NUM / GAS_RETRY_DEN;
                warn!(reason, bumped, "retrying with bumped gas limit");
                self.submit_once(to, &data, bumped).await
            }
            Err(other) => Err(other),
        }
    }

    async fn submit_once(
        &self,
        to: &str,
        data: &[u8],
        gas_limit: u64,
    ) -> Result<String, SettlementError> {
        let nonce = self.rpc.nonce(&self.ctx.address).await?;
        let gas_price =
            (self.rpc.gas_price().await? as f64 * self.gas_price_factor) as u64;

        let tx = LegacyTx {
            nonce,
            gas_price,
            gas_limit,
            to: position::parse_address(to)?,
            value: 0,
            data: data.to_vec(),
        };
        let signed = sign_legacy_tx(&tx, self.registry.chain_id, &self.ctx.private_key)?;
        let hash = self.rpc.send_raw(&signed).await?;
        self.rpc.wait_for_receipt(&hash, RECEIPT_TIMEOUT).await?;
        Ok(hash)
    }
}

/// Lossy conversion for display-scale balances; saturates past 96 bits.
fn dec_from_u128(v: u128) -> Decimal {
    Decimal::from_u128(v).unwrap_or(Decimal::MAX)
}

fn usdc_raw(amount: Decimal) -> Result<u128, SettlementError> {
    if amount <= Decimal::ZERO {
        return Err(SettlementError::Validation(format!(
            "amount must be positive, got {amount}"
        )));
    }
    (amount * Decimal::from(USDC_SCALE))
        .floor()
        .to_u128()
        .ok_or_else(|| SettlementError::Validation(format!("amount out of range: {amount}")))
}
