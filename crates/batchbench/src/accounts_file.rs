//! Loading benchmark accounts from JSON.
use std::path::Path;

use anyhow::Context;
use batchbench_common::{ContractAddress, SigningKey};
use batchbench_submitter::Account;
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum AccountsFile {
    List(Vec<Entry>),
    Wrapped { accounts: Vec<Entry> },
}

#[derive(Deserialize)]
struct Entry {
    address: String,
    private_key: String,
}

pub fn load(path: &Path) -> anyhow::Result<Vec<Account>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Reading accounts file {}", path.display()))?;
    parse(&json).with_context(|| format!("Parsing accounts file {}", path.display()))
}

fn parse(json: &str) -> anyhow::Result<Vec<Account>> {
    let entries = match serde_json::from_str(json)? {
        AccountsFile::List(entries) => entries,
        AccountsFile::Wrapped { accounts } => accounts,
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            Ok(Account {
                address: ContractAddress::from_hex(&entry.address)
                    .with_context(|| format!("Account {i}: invalid address"))?,
                key: SigningKey::from_hex(&entry.private_key)
                    .with_context(|| format!("Account {i}: invalid private key"))?,
            })
        })
        .collect()
}
