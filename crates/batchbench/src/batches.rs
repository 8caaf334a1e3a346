use anyhow::Context;
use batchbench_common::ContractAddress;
use batchbench_submitter::BatchRecord;
use starknet_rpc_client::{Client, LedgerClient};

use crate::balances::format_strk;

/// Prints every batch result stored in the contract, oldest first.
pub async fn batches(client: &Client, contract: ContractAddress) -> anyhow::Result<()> {
    let reply = client
        .call(BatchRecord::list_call(contract))
        .await
        .context("Fetching batch records")?;
    let records = BatchRecord::decode_all(&reply).context("Decoding batch records")?;

    for record in &records {
        println!("{}", format_record(record));
    }
    println!("{} batches recorded in {contract}", records.len());

    Ok(())
}

fn format_record(record: &BatchRecord) -> String {
    let type_name = record
        .type_name()
        .unwrap_or_else(|| format!("{:#x}", record.batch_type));
    format!(
        "{:#x}  {type_name}  {} items  {} STRK  {}s",
        record.batch_id,
        record.num_items,
        format_strk(record.cost),
        record.elapsed_seconds
    )
}
