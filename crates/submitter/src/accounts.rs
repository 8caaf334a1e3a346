//! Accounts used to sign writes, and filtering them by fee token balance.
use std::num::NonZeroUsize;

use batchbench_common::{ContractAddress, SigningKey, U256};
use futures::stream::{self, StreamExt};
use starknet_rpc_client::LedgerClient;

use crate::config::RetryPolicy;
use crate::workload::balance_of_call;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub address: ContractAddress,
    pub key: SigningKey,
}

/// An ordered, non-empty set of accounts.
#[derive(Clone, Debug)]
pub struct AccountPool(Vec<Account>);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No account holds the minimum balance of {minimum} FRI")]
pub struct NoEligibleAccounts {
    pub minimum: u128,
}

impl AccountPool {
    /// Returns `None` for an empty list.
    pub fn new(accounts: Vec<Account>) -> Option<Self> {
        (!accounts.is_empty()).then_some(Self(accounts))
    }

    pub fn len(&self) -> NonZeroUsize {
        // Guaranteed by construction.
        NonZeroUsize::new(self.0.len()).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn get(&self, index: usize) -> &Account {
        &self.0[index % self.0.len()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.0.iter()
    }

    pub fn addresses(&self) -> impl Iterator<Item = ContractAddress> + '_ {
        self.0.iter().map(|a| a.address)
    }

    /// Keeps only the first `n` accounts.
    pub fn truncate(&mut self, n: NonZeroUsize) {
        self.0.truncate(n.get());
    }
}

/// Minimum balance an account needs to take part in a batch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BalanceCheck {
    pub fee_token: ContractAddress,
    pub minimum: u128,
}

/// Fetches the fee token balance of every account, at most `concurrency`
/// requests at a time. Transient failures are retried per `retry`, accounts
/// whose balance still cannot be read get `None`.
pub async fn fetch_balances<C: LedgerClient + ?Sized>(
    client: &C,
    fee_token: ContractAddress,
    accounts: impl IntoIterator<Item = ContractAddress>,
    concurrency: NonZeroUsize,
    retry: RetryPolicy,
) -> Vec<(ContractAddress, Option<U256>)> {
    stream::iter(accounts)
        .map(|address| async move {
            let attempted = retry
                .run(|| client.call(balance_of_call(fee_token, address)))
                .await;
            let balance = match attempted.result {
                Ok(felts) => U256::from_felts(&felts),
                Err(error) => {
                    tracing::warn!(%address, %error, retries=%attempted.retries, "Failed to fetch balance");
                    None
                }
            };
            (address, balance)
        })
        .buffered(concurrency.get())
        .collect()
        .await
}

/// Drops accounts below the minimum balance. Balances that cannot be read
/// count as zero.
pub async fn eligible_accounts<C: LedgerClient + ?Sized>(
    client: &C,
    pool: AccountPool,
    check: BalanceCheck,
    concurrency: NonZeroUsize,
    retry: RetryPolicy,
) -> Result<AccountPool, NoEligibleAccounts> {
    let balances =
        fetch_balances(client, check.fee_token, pool.addresses(), concurrency, retry).await;

    let eligible = pool
        .0
        .into_iter()
        .zip(balances)
        .filter_map(|(account, (_, balance))| {
            let balance = balance.map(U256::saturating_u128).unwrap_or_default();
            if balance >= check.minimum {
                Some(account)
            } else {
                tracing::info!(address=%account.address, %balance, minimum=%check.minimum, "Skipping account with insufficient balance");
                None
            }
        })
        .collect::<Vec<_>>();

    tracing::info!(eligible=%eligible.len(), "Filtered accounts by balance");

    AccountPool::new(eligible).ok_or(NoEligibleAccounts {
        minimum: check.minimum,
    })
}
