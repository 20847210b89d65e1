//! Calldata encoding for the contract functions the platform calls.
//!
//! Hand-rolled ABI encoding over the small fixed function set: four-byte
//! selectors from keccak of the canonical signature, 32-byte words for
//! every argument, and tail encoding for the one dynamic type in use
//! (`uint256[]`).

use sha3::{Digest, Keccak256};

/// First four bytes of `keccak256(signature)`.
#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn word_u128(v: u128) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[16..].copy_from_slice(&v.to_be_bytes());
    out
}

fn word_address(addr: &[u8; 20]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(addr);
    out
}

fn word_bool(v: bool) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[31] = u8::from(v);
    out
}

/// ABI argument values.
pub enum Arg {
    Address([u8; 20]),
    Uint(u128),
    Bytes32([u8; 32]),
    Bool(bool),
    UintArray(Vec<u128>),
}

/// Encodes a call: selector plus head/tail argument encoding.
#[must_use]
pub fn encode_call(signature: &str, args: &[Arg]) -> Vec<u8> {
    let mut head: Vec<[u8; 32]> = Vec::with_capacity(args.len());
    let mut tail: Vec<u8> = Vec::new();
    let head_len = args.len() * 32;

    for arg in args {
        match arg {
            Arg::Address(a) => head.push(word_address(a)),
            Arg::Uint(v) => head.push(word_u128(*v)),
            Arg::Bytes32(b) => head.push(*b),
            Arg::Bool(b) => head.push(word_bool(*b)),
            Arg::UintArray(items) => {
                head.push(word_u128((head_len + tail.len()) as u128));
                tail.extend_from_slice(&word_u128(items.len() as u128));
                for item in items {
                    tail.extend_from_slice(&word_u128(*item));
                }
            }
        }
    }

    let mut out = Vec::with_capacity(4 + head_len + tail.len());
    out.extend_from_slice(&selector(signature));
    for word in head {
        out.extend_from_slice(&word);
    }
    out.extend_from_slice(&tail);
    out
}

// =============================================================================
// ERC20
// =============================================================================

/// `approve(spender, amount)`.
#[must_use]
pub fn erc20_approve(spender: &[u8; 20], amount: u128) -> Vec<u8> {
    encode_call(
        "approve(address,uint256)",
        &[Arg::Address(*spender), Arg::Uint(amount)],
    )
}

/// `allowance(owner, spender)`.
#[must_use]
pub fn erc20_allowance(owner: &[u8; 20], spender: &[u8; 20]) -> Vec<u8> {
    encode_call(
        "allowance(address,address)",
        &[Arg::Address(*owner), Arg::Address(*spender)],
    )
}

/// `balanceOf(owner)`.
#[must_use]
pub fn erc20_balance_of(owner: &[u8; 20]) -> Vec<u8> {
    encode_call("balanceOf(address)", &[Arg::Address(*owner)])
}

// =============================================================================
// ERC1155 (conditional tokens)
// =============================================================================

/// `balanceOf(owner, positionId)`.
#[must_use]
pub fn erc1155_balance_of(owner: &[u8; 20], position_id: &[u8; 32]) -> Vec<u8> {
    // Position ids are full 256-bit words; encode directly rather than
    // through Arg::Uint, which only carries u128.
    let mut out = Vec::with_capacity(4 + 64);
    out.extend_from_slice(&selector("balanceOf(address,uint256)"));
    out.extend_from_slice(&word_address(owner));
    out.extend_from_slice(position_id);
    out
}

/// `setApprovalForAll(operator, approved)`.
#[must_use]
pub fn erc1155_set_approval_for_all(operator: &[u8; 20], approved: bool) -> Vec<u8> {
    encode_call(
        "setApprovalForAll(address,bool)",
        &[Arg::Address(*operator), Arg::Bool(approved)],
    )
}

/// `isApprovedForAll(owner, operator)`.
#[must_use]
pub fn erc1155_is_approved_for_all(owner: &[u8; 20], operator: &[u8; 20]) -> Vec<u8> {
    encode_call(
        "isApprovedForAll(address,address)",
        &[Arg::Address(*owner), Arg::Address(*operator)],
    )
}

// =============================================================================
// Conditional tokens framework
// =============================================================================

/// `splitPosition(collateral, parentCollectionId, conditionId, partition, amount)`.
#[must_use]
pub fn ctf_split_position(
    collateral: &[u8; 20],
    condition_id: &[u8; 32],
    amount: u128,
) -> Vec<u8> {
    encode_call(
        "splitPosition(address,bytes32,bytes32,uint256[],uint256)",
        &[
            Arg::Address(*collateral),
            Arg::Bytes32([0u8; 32]),
            Arg::Bytes32(*condition_id),
            Arg::UintArray(vec![1, 2]),
            Arg::Uint(amount),
        ],
    )
}

/// `mergePositions(collateral, parentCollectionId, conditionId, partition, amount)`.
#[must_use]
pub fn ctf_merge_positions(
    collateral: &[u8; 20],
    condition_id: &[u8; 32],
    amount: u128,
) -> Vec<u8> {
    encode_call(
        "mergePositions(address,bytes32,bytes32,uint256[],uint256)",
        &[
            Arg::Address(*collateral),
            Arg::Bytes32([0u8; 32]),
            Arg::Bytes32(*condition_id),
            Arg::UintArray(vec![1, 2]),
            Arg::Uint(amount),
        ],
    )
}

/// `redeemPositions(collateral, parentCollectionId, conditionId, indexSets)`.
#[must_use]
pub fn ctf_redeem_positions(collateral: &[u8; 20], condition_id: &[u8; 32]) -> Vec<u8> {
    encode_call(
        "redeemPositions(address,bytes32,bytes32,uint256[])",
        &[
            Arg::Address(*collateral),
            Arg::Bytes32([0u8; 32]),
            Arg::Bytes32(*condition_id),
            Arg::UintArray(vec![1, 2]),
        ],
    )
}

/// `payoutNumerators(conditionId, index)`.
#[must_use]
pub fn ctf_payout_numerators(condition_id: &[u8; 32], index: u128) -> Vec<u8> {
    encode_call(
        "payoutNumerators(bytes32,uint256)",
        &[Arg::Bytes32(*condition_id), Arg::Uint(index)],
    )
}

/// `payoutDenominator(conditionId)`.
#[must_use]
pub fn ctf_payout_denominator(condition_id: &[u8; 32]) -> Vec<u8> {
    encode_call("payoutDenominator(bytes32)", &[Arg::Bytes32(*condition_id)])
}

// =============================================================================
// Negative-risk adapter
// =============================================================================

/// Adapter `splitPosition(conditionId, amount)`.
#[must_use]
pub fn neg_risk_split(condition_id: &[u8; 32], amount: u128) -> Vec<u8> {
    encode_call(
        "splitPosition(bytes32,uint256)",
        &[Arg::Bytes32(*condition_id), Arg::Uint(amount)],
    )
}

/// Adapter `mergePositions(conditionId, amount)`.
#[must_use]
pub fn neg_risk_merge(condition_id: &[u8; 32], amount: u128) -> Vec<u8> {
    encode_call(
        "mergePositions(bytes32,uint256)",
        &[Arg::Bytes32(*condition_id), Arg::Uint(amount)],
    )
}

/// Adapter `redeemPositions(conditionId, amounts)`.
#[must_use]
pub fn neg_risk_redeem(condition_id: &[u8; 32], amounts: [u128; 2]) -> Vec<u8> {
    encode_call(
        "redeemPositions(bytes32,uint256[])",
        &[
            Arg::Bytes32(*condition_id),
            Arg::UintArray(amounts.to_vec()),
        ],
    )
}

/// Decodes a single uint word from a call result (low 16 bytes).
#[must_use]
pub fn decode_uint(result: &[u8]) -> u128 {
    if result.len() < 32 {
        return 0;
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&result[16..32]);
    u128::from_be_bytes(buf)
}

/// Decodes a bool word from a call result.
#[must_use]
pub fn decode_bool(result: &[u8]) -> bool {
    result.len() >= 32 && result[31] == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_selectors() {
        // Canonical ERC20 selectors.
        assert_eq!(selector("approve(address,uint256)"), [0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(selector("balanceOf(address)"), [0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(
            selector("setApprovalForAll(address,bool)"),
            [0xa2, 0x2c, 0xb4, 0x65]
        );
    }

    #[test]
    fn approve_layout() {
        let spender = [0x11; 20];
        let data = erc20_approve(&spender, 500);
        assert_eq!(data.len(), 4 + 64);
        // Address is right-aligned in the first word.
        assert_eq!(&data[4 + 12..4 + 32], &spender);
        // Amount in the second word.
        assert_eq!(data[4 + 63], 0xf4);
        assert_eq!(data[4 + 62], 0x01);
    }

    #[test]
    fn split_encodes_dynamic_partition() {
        let collateral = [0x22; 20];
        let condition = [0x33; 32];
        let data = ctf_split_position(&collateral, &condition, 1_000_000);

        // selector + 5 head words + (len + 2 items) tail words
        assert_eq!(data.len(), 4 + 5 * 32 + 3 * 32);
        // Offset word points at the tail (5 * 32 = 160).
        assert_eq!(data[4 + 3 * 32 + 31], 160);
        // Array length 2, then partition values 1 and 2.
        assert_eq!(data[4 + 5 * 32 + 31], 2);
        assert_eq!(data[4 + 6 * 32 + 31], 1);
        assert_eq!(data[4 + 7 * 32 + 31], 2);
    }

    #[test]
    fn merge_and_split_share_layout_but_not_selector() {
        let collateral = [0x22; 20];
        let condition = [0x33; 32];
        let split = ctf_split_position(&collateral, &condition, 5);
        let merge = ctf_merge_positions(&collateral, &condition, 5);
        assert_eq!(split.len(), merge.len());
        assert_ne!(split[..4], merge[..4]);
        assert_eq!(split[4..], merge[4..]);
    }

    #[test]
    fn erc1155_balance_takes_full_word_id() {
        let owner = [0x44; 20];
        let mut position = [0u8; 32];
        position[0] = 0xff; // high byte set: would not fit u128
        let data = erc1155_balance_of(&owner, &position);
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(data[4 + 32], 0xff);
    }

    #[test]
    fn decode_uint_reads_low_bytes() {
        let mut word = [0u8; 32];
        word[30] = 0x01;
        word[31] = 0x02;
        assert_eq!(decode_uint(&word), 0x0102);
        assert_eq!(decode_uint(&[]), 0);
    }

    #[test]
    fn decode_bool_is_strict() {
        let mut word = [0u8; 32];
        assert!(!decode_bool(&word));
        word[31] = 1;
        assert!(decode_bool(&word));
    }

    #[test]
    fn neg_risk_redeem_encodes_two_amounts() {
        let condition = [0x55; 32];
        let data = neg_risk_redeem(&condition, [7, 9]);
        // selector + 2 head + 3 tail words
        assert_eq!(data.len(), 4 + 2 * 32 + 3 * 32);
        assert_eq!(data[4 + 3 * 32 + 31], 7);
        assert_eq!(data[4 + 4 * 32 + 31], 9);
    }
}
