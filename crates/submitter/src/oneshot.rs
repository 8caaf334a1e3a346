//! Single invoke transactions that are awaited to completion, used outside of
//! batches for funding and for recording results on the ledger.
use std::sync::Arc;

use batchbench_common::{
    Call, ChainId, InvokeTransactionV3, ResourceBounds, SigningError, TransactionHash,
    TransactionNonce,
};
use starknet_rpc_client::{LedgerClient, Receipt, RpcError};

use crate::accounts::Account;
use crate::config::{ConfirmationSettings, RetryPolicy};
use crate::confirm::{Confirmation, Confirmer};

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("Failed to fetch nonce")]
    Nonce(#[source] RpcError),
    #[error("Node reported a nonce that does not fit in 64 bits")]
    NonceOutOfRange,
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("Failed to submit transaction")]
    Submit(#[source] RpcError),
    #[error("Transaction {hash} reverted: {reason}")]
    Reverted {
        hash: TransactionHash,
        reason: String,
    },
    #[error("Transaction {0} was not confirmed in time")]
    TimedOut(TransactionHash),
    #[error("Failed to confirm transaction {hash}: {reason}")]
    Confirmation {
        hash: TransactionHash,
        reason: String,
    },
}

#[derive(Copy, Clone, Debug, Default)]
pub struct InvokeSettings {
    pub resource_bounds: ResourceBounds,
    pub retry: RetryPolicy,
    pub confirmation: ConfirmationSettings,
}

/// Fetches the account nonce, signs and submits `calls` as one transaction and
/// waits for its receipt. Reverted transactions are errors.
#[tracing::instrument(skip_all, fields(account=%account.address))]
pub async fn invoke_and_wait<C: LedgerClient + ?Sized>(
    client: &Arc<C>,
    chain_id: ChainId,
    account: &Account,
    calls: &[Call],
    settings: InvokeSettings,
) -> Result<Receipt, InvokeError> {
    let nonce = settings
        .retry
        .run(|| client.nonce(account.address))
        .await
        .result
        .map_err(InvokeError::Nonce)?
        .to_u64()
        .ok_or(InvokeError::NonceOutOfRange)?;

    let mut transaction = InvokeTransactionV3::from_calls(
        account.address,
        calls,
        TransactionNonce::from_u64(nonce),
        settings.resource_bounds,
    );
    transaction.sign(chain_id, &account.key)?;

    let hash = settings
        .retry
        .run(|| client.add_invoke_transaction(transaction.clone()))
        .await
        .result
        .map_err(InvokeError::Submit)?;
    tracing::info!(%hash, %nonce, "Transaction submitted");

    match Confirmer::new(client.clone(), settings.confirmation)
        .confirm(hash)
        .await
    {
        Confirmation::Accepted(receipt) => Ok(receipt),
        Confirmation::Reverted(receipt) => Err(InvokeError::Reverted {
            hash,
            reason: receipt.revert_reason.unwrap_or_default(),
        }),
        Confirmation::TimedOut => Err(InvokeError::TimedOut(hash)),
        Confirmation::Failed(reason) => Err(InvokeError::Confirmation { hash, reason }),
    }
}
