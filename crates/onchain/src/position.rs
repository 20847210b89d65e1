//! Position-id derivation for conditional tokens.
//!
//! Two tightly-packed keccak hashes take a condition to its ERC1155 token
//! id: the collection id commits to the (empty) parent collection, the
//! condition, and the outcome index set; the position id then commits to
//! the collateral token and the collection.

use sha3::{Digest, Keccak256};
use thiserror::Error;

/// Outcome slot within a binary condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeIndex {
    Yes,
    No,
}

impl OutcomeIndex {
    /// Index set bit for this outcome: YES = 0b01, NO = 0b10.
    #[must_use]
    pub fn index_set(self) -> u8 {
        match self {
            Self::Yes => 1,
            Self::No => 2,
        }
    }
}

/// Errors from id parsing.
#[derive(Debug, Error)]
pub enum PositionError {
    #[error("invalid condition id: {0}")]
    InvalidConditionId(String),

    #[error("invalid collateral address: {0}")]
    InvalidCollateral(String),
}

/// Parses a 32-byte hex condition id.
pub fn parse_condition_id(condition_id: &str) -> Result<[u8; 32], PositionError> {
    let hex_part = condition_id.strip_prefix("0x").unwrap_or(condition_id);
    let bytes = hex::decode(hex_part)
        .map_err(|e| PositionError::InvalidConditionId(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| PositionError::InvalidConditionId(format!("wrong length: {condition_id}")))
}

/// Parses a 20-byte hex address.
pub fn parse_address(address: &str) -> Result<[u8; 20], PositionError> {
    let hex_part = address.strip_prefix("0x").unwrap_or(address);
    let bytes =
        hex::decode(hex_part).map_err(|e| PositionError::InvalidCollateral(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| PositionError::InvalidCollateral(format!("wrong length: {address}")))
}

/// `keccak256(parentCollection || conditionId || indexSet)` with a zero
/// parent collection.
#[must_use]
pub fn collection_id(condition_id: &[u8; 32], outcome: OutcomeIndex) -> [u8; 32] {
    let mut packed = Vec::with_capacity(32 + 32 + 32);
    packed.extend_from_slice(&[0u8; 32]);
    packed.extend_from_slice(condition_id);
    let mut index_word = [0u8; 32];
    index_word[31] = outcome.index_set();
    packed.extend_from_slice(&index_word);

    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(&packed));
    out
}

/// `keccak256(collateralToken || collectionId)`.
#[must_use]
pub fn position_id(
    collateral: &[u8; 20],
    condition_id: &[u8; 32],
    outcome: OutcomeIndex,
) -> [u8; 32] {
    let collection = collection_id(condition_id, outcome);
    let mut packed = Vec::with_capacity(20 + 32);
    packed.extend_from_slice(collateral);
    packed.extend_from_slice(&collection);

    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(&packed));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLLATERAL: [u8; 20] = [0x27; 20];
    const CONDITION: [u8; 32] = [0x91; 32];

    #[test]
    fn derivation_is_deterministic() {
        let a = position_id(&COLLATERAL, &CONDITION, OutcomeIndex::Yes);
        let b = position_id(&COLLATERAL, &CONDITION, OutcomeIndex::Yes);
        assert_eq!(a, b);
    }

    #[test]
    fn yes_and_no_ids_differ() {
        let yes = position_id(&COLLATERAL, &CONDITION, OutcomeIndex::Yes);
        let no = position_id(&COLLATERAL, &CONDITION, OutcomeIndex::No);
        assert_ne!(yes, no);
    }

    #[test]
    fn swapping_index_sets_swaps_ids() {
        // Deriving NO for one condition equals deriving YES only when the
        // index set matches; the outcome fully determines the id.
        let yes_collection = collection_id(&CONDITION, OutcomeIndex::Yes);
        let no_collection = collection_id(&CONDITION, OutcomeIndex::No);
        assert_ne!(yes_collection, no_collection);

        // The mapping indexSet -> id is injective per condition: rebuilding
        // with the other outcome reproduces the other id exactly.
        let rebuilt_yes = position_id(&COLLATERAL, &CONDITION, OutcomeIndex::Yes);
        let rebuilt_no = position_id(&COLLATERAL, &CONDITION, OutcomeIndex::No);
        assert_eq!(rebuilt_yes, position_id(&COLLATERAL, &CONDITION, OutcomeIndex::Yes));
        assert_eq!(rebuilt_no, position_id(&COLLATERAL, &CONDITION, OutcomeIndex::No));
    }

    #[test]
    fn different_conditions_different_ids() {
        let other = [0x92; 32];
        assert_ne!(
            position_id(&COLLATERAL, &CONDITION, OutcomeIndex::Yes),
            position_id(&COLLATERAL, &other, OutcomeIndex::Yes)
        );
    }

    #[test]
    fn different_collateral_different_ids() {
        let other = [0x28; 20];
        assert_ne!(
            position_id(&COLLATERAL, &CONDITION, OutcomeIndex::Yes),
            position_id(&other, &CONDITION, OutcomeIndex::Yes)
        );
    }

    #[test]
    fn stable_known_vector() {
        // Pinned so any change to the packing breaks loudly.
        let id = position_id(&[0u8; 20], &[0u8; 32], OutcomeIndex::Yes);
        assert_eq!(
            hex::encode(id),
            expected_zero_vector(),
        );
    }

    fn expected_zero_vector() -> String {
        // collection = keccak(0^32 || 0^32 || 0^31 0x01)
        let mut packed = vec![0u8; 96];
        packed[95] = 1;
        let collection = Keccak256::digest(&packed);
        let mut outer = vec![0u8; 20];
        outer.extend_from_slice(&collection);
        hex::encode(Keccak256::digest(&outer))
    }

    #[test]
    fn parse_helpers_validate_length() {
        assert!(parse_condition_id(&format!("0x{}", "ab".repeat(32))).is_ok());
        assert!(parse_condition_id("0x1234").is_err());
        assert!(parse_condition_id("zz").is_err());
        assert!(parse_address(&format!("0x{}", "cd".repeat(20))).is_ok());
        assert!(parse_address("0x00").is_err());
    }

    #[test]
    fn index_sets_match_the_contract_convention() {
        assert_eq!(OutcomeIndex::Yes.index_set(), 1);
        assert_eq!(OutcomeIndex::No.index_set(), 2);
    }
}
