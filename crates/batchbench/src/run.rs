use std::sync::Arc;

use anyhow::Context;
use batchbench_submitter::{
    invoke_and_wait, Account, AccountPool, BatchRecord, BatchSummary, InvokeSettings, Submitter,
    Workload,
};
use starknet_rpc_client::{Client, LedgerClient};
use time::OffsetDateTime;

use crate::config::{LedgerConfig, RunConfig};
use crate::report::{self, Report};

pub async fn run(
    client: Arc<Client>,
    accounts: Vec<Account>,
    ledger: &LedgerConfig,
    config: RunConfig,
) -> anyhow::Result<()> {
    let mut pool = AccountPool::new(accounts).context("The accounts file lists no accounts")?;
    if let Some(n) = config.num_accounts {
        pool.truncate(n);
    }
    let num_accounts = pool.len().get();

    let started_at = OffsetDateTime::now_utc();
    let batch_id = config
        .batch_id
        .unwrap_or_else(|| started_at.unix_timestamp().unsigned_abs());

    tracing::info!(
        %batch_id,
        contract=%config.contract_address,
        batch_size=%config.batch.batch_size,
        bundle_size=%config.batch.bundle_size,
        read_ratio=%config.batch.read_ratio.get(),
        concurrency=%config.batch.concurrency,
        nonce_strategy=%config.batch.nonce_strategy,
        %num_accounts,
        "Starting batch"
    );

    let summary = Submitter::new(
        client.clone(),
        pool,
        Workload::balance_updater(config.contract_address),
        config.batch.clone(),
    )
    .run(batch_id)
    .await
    .context("Running batch")?;

    println!("{summary}");

    let report = Report {
        timestamp: report::timestamp(started_at)?,
        contract_address: config.contract_address,
        rpc_urls: ledger.rpc_urls.iter().map(ToString::to_string).collect(),
        num_accounts,
        bundle_size: config.batch.bundle_size.get(),
        read_ratio: config.batch.read_ratio.get(),
        concurrency: config.batch.concurrency.get(),
        nonce_strategy: config.batch.nonce_strategy.to_string(),
        summary: &summary,
    };
    let path = report::write(&config.results_dir, &report)?;
    tracing::info!(path=%path.display(), "Report written");

    if let Some(admin) = &config.admin {
        record_on_ledger(&client, admin, &config, &summary)
            .await
            .context("Recording batch on the ledger")?;
    }

    Ok(())
}

async fn record_on_ledger(
    client: &Arc<Client>,
    admin: &Account,
    config: &RunConfig,
    summary: &BatchSummary,
) -> anyhow::Result<()> {
    let record = BatchRecord::balance_update(
        summary.batch_id,
        summary.batch_size as u64,
        summary.total_fee,
        summary.elapsed().as_secs(),
    );
    let chain_id = client.chain_id().await.context("Fetching chain id")?;

    let receipt = invoke_and_wait(
        client,
        chain_id,
        admin,
        &[record.call(config.contract_address)],
        InvokeSettings {
            resource_bounds: config.batch.resource_bounds,
            retry: config.batch.retry,
            confirmation: config.batch.confirmation,
        },
    )
    .await?;

    tracing::info!(
        hash=%receipt.transaction_hash,
        block=?receipt.block_number,
        fee=%receipt.fee(),
        "Batch recorded on the ledger"
    );

    Ok(())
}
