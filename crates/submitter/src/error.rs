use starknet_rpc_client::RpcError;

use crate::accounts::NoEligibleAccounts;
use crate::nonce::NonceError;

/// Preconditions that stop a batch before anything is submitted.
///
/// Failures of individual operations are counted in the summary instead.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error(transparent)]
    NoEligibleAccounts(#[from] NoEligibleAccounts),
    #[error("Failed to fetch chain id")]
    ChainId(#[source] RpcError),
    #[error(transparent)]
    Nonce(#[from] NonceError),
}
