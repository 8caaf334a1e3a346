//! Repeated constants used around batchbench

use crate::{felt, ContractAddress};

/// User agent used in http clients
pub const USER_AGENT: &str = concat!("batchbench/", env!("CARGO_PKG_VERSION"));

/// The STRK fee token, deployed at the same address on mainnet, Sepolia and
/// the usual devnets.
pub fn strk_fee_token() -> ContractAddress {
    ContractAddress(felt!(
        "0x04718f5a0fc34cc1af16a1cdee98ffb20c31f5cd61d6ab07201858f4287c938d"
    ))
}

/// 1 STRK expressed in FRI.
pub const FRI_PER_STRK: u128 = 1_000_000_000_000_000_000;

/// Accounts holding less than this are not used for a batch.
pub const DEFAULT_MIN_BALANCE_FRI: u128 = FRI_PER_STRK / 20;

/// The amount sent to each under-funded account by `fund`.
pub const DEFAULT_FUNDING_AMOUNT_FRI: u128 = FRI_PER_STRK / 10;
