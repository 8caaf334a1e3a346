use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::Context;
use batchbench_common::{ContractAddress, U256};
use batchbench_submitter::accounts::fetch_balances;
use batchbench_submitter::workload::transfer_call;
use batchbench_submitter::{invoke_and_wait, Account, InvokeSettings, RetryPolicy};
use starknet_rpc_client::{Client, LedgerClient};

use crate::balances::format_strk;
use crate::config::{FundConfig, LedgerConfig};

const CONCURRENCY: NonZeroUsize = match NonZeroUsize::new(16) {
    Some(n) => n,
    None => unreachable!(),
};

/// Tops up every account below the minimum balance from the funder account.
/// Transfers are sent one at a time since they share the funder's nonce.
pub async fn fund(
    client: Arc<Client>,
    accounts: &[Account],
    ledger: &LedgerConfig,
    config: FundConfig,
) -> anyhow::Result<()> {
    let balances = fetch_balances(
        client.as_ref(),
        ledger.fee_token,
        accounts.iter().map(|a| a.address),
        CONCURRENCY,
        RetryPolicy::default(),
    )
    .await;

    let targets = select_targets(
        &balances,
        config.min_balance,
        config.max_accounts,
        config.funder.address,
    );
    if targets.is_empty() {
        tracing::info!("All accounts hold the minimum balance");
        return Ok(());
    }

    tracing::info!(
        accounts=%targets.len(),
        amount=%format_strk(config.amount),
        funder=%config.funder.address,
        "Funding accounts"
    );

    let chain_id = client.chain_id().await.context("Fetching chain id")?;
    let settings = InvokeSettings::default();

    let mut failed = 0;
    for target in &targets {
        let call = transfer_call(ledger.fee_token, *target, config.amount);
        match invoke_and_wait(&client, chain_id, &config.funder, &[call], settings).await {
            Ok(receipt) => {
                tracing::info!(account=%target, hash=%receipt.transaction_hash, "Funded");
            }
            Err(error) => {
                tracing::warn!(account=%target, error=%error, "Funding failed");
                failed += 1;
            }
        }
    }

    anyhow::ensure!(
        failed == 0,
        "Failed to fund {failed} of {} accounts",
        targets.len()
    );

    Ok(())
}

/// Accounts below `minimum`, in order, never including the funder itself.
/// Unreadable balances count as zero.
fn select_targets(
    balances: &[(ContractAddress, Option<U256>)],
    minimum: u128,
    max_accounts: Option<usize>,
    funder: ContractAddress,
) -> Vec<ContractAddress> {
    balances
        .iter()
        .filter(|(address, _)| *address != funder)
        .filter(|(_, balance)| balance.map(U256::saturating_u128).unwrap_or_default() < minimum)
        .map(|(address, _)| *address)
        .take(max_accounts.unwrap_or(usize::MAX))
        .collect()
}
