#![deny(rust_2018_idioms)]

use std::sync::Arc;

use anyhow::Context;
use starknet_rpc_client::{Client, EndpointPool};
use tracing::info;

mod accounts_file;
mod balances;
mod batches;
mod config;
mod fund;
mod report;
mod run;

use config::{Command, Config, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }

    let Config {
        ledger,
        log_format,
        command,
    } = Config::parse();

    setup_tracing(log_format);

    let endpoints = EndpointPool::new(ledger.rpc_urls.clone(), ledger.endpoint_selection)
        .context("Creating endpoint pool")?;
    info!(
        endpoints=%endpoints.len(),
        selection=%ledger.endpoint_selection,
        block_tag=%ledger.block_tag,
        "Connecting to ledger"
    );
    let client = Client::new(endpoints, ledger.request_timeout)
        .context("Creating RPC client")?
        .with_block_tag(ledger.block_tag);
    let client = Arc::new(client);

    let accounts = if command.uses_accounts() {
        let accounts = accounts_file::load(&ledger.accounts_file)?;
        info!(accounts=%accounts.len(), file=%ledger.accounts_file.display(), "Loaded accounts");
        accounts
    } else {
        Vec::new()
    };

    match command {
        Command::Run(config) => run::run(client, accounts, &ledger, config).await,
        Command::Balances { min_balance } => {
            balances::balances(&client, &accounts, &ledger, min_balance).await
        }
        Command::Fund(config) => fund::fund(client, &accounts, &ledger, config).await,
        Command::Batches { contract_address } => {
            batches::batches(client.as_ref(), contract_address).await
        }
    }
}

fn setup_tracing(format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false);

    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}
