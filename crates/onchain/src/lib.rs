//! On-chain settlement against the conditional-token contracts.
//!
//! - [`tx`]: legacy EIP-155 transaction construction, signing, and the
//!   JSON-RPC client
//! - [`abi`]: calldata builders for the ERC20/ERC1155/CTF functions used
//! - [`position`]: condition -> collection -> position id derivation
//! - [`settlement`]: the settlement client: split, merge, redeem,
//!   approvals, and the readiness check

pub mod abi;
pub mod position;
pub mod settlement;
pub mod tx;

pub use position::{position_id, OutcomeIndex};
pub use settlement::{ContractRegistry, CtfReadiness, SettlementClient, SettlementError};
pub use tx::{RpcClient, TxError};
