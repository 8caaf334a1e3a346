use std::num::NonZeroUsize;

use batchbench_common::consts::FRI_PER_STRK;
use batchbench_common::ContractAddress;
use batchbench_submitter::accounts::fetch_balances;
use batchbench_submitter::{Account, RetryPolicy};
use starknet_rpc_client::Client;

use crate::config::LedgerConfig;

const CONCURRENCY: NonZeroUsize = match NonZeroUsize::new(16) {
    Some(n) => n,
    None => unreachable!(),
};

pub async fn balances(
    client: &Client,
    accounts: &[Account],
    ledger: &LedgerConfig,
    min_balance: u128,
) -> anyhow::Result<()> {
    let balances = fetch_balances(
        client,
        ledger.fee_token,
        accounts.iter().map(|a| a.address),
        CONCURRENCY,
        RetryPolicy::default(),
    )
    .await;

    let mut below = 0;
    for (address, balance) in &balances {
        let line = format_line(*address, balance.map(|b| b.saturating_u128()), min_balance);
        if line.below_minimum {
            below += 1;
        }
        println!("{}", line.text);
    }

    println!(
        "{} accounts, {} below the minimum of {} STRK",
        balances.len(),
        below,
        format_strk(min_balance)
    );

    Ok(())
}

struct Line {
    text: String,
    below_minimum: bool,
}

fn format_line(address: ContractAddress, balance: Option<u128>, minimum: u128) -> Line {
    match balance {
        Some(balance) if balance >= minimum => Line {
            text: format!("{address}  {} STRK", format_strk(balance)),
            below_minimum: false,
        },
        Some(balance) => Line {
            text: format!("{address}  {} STRK  (below minimum)", format_strk(balance)),
            below_minimum: true,
        },
        None => Line {
            text: format!("{address}  unavailable"),
            below_minimum: true,
        },
    }
}

/// Renders a FRI amount as STRK with all decimals.
pub fn format_strk(fri: u128) -> String {
    format!("{}.{:018}", fri / FRI_PER_STRK, fri % FRI_PER_STRK)
}

#[cfg(test)]
mod tests {
    use batchbench_common::felt;

    use super::*;

    #[rstest::rstest]
    #[case::zero(0, "0.000000000000000000")]
    #[case::one_fri(1, "0.000000000000000001")]
    #[case::twentieth(FRI_PER_STRK / 20, "0.050000000000000000")]
    #[case::many(12 * FRI_PER_STRK + 5, "12.000000000000000005")]
    fn strk_formatting(#[case] fri: u128, #[case] expected: &str) {
        assert_eq!(format_strk(fri), expected);
    }

    #[test]
    fn flags_low_and_unknown_balances() {
        let address = ContractAddress(felt!("0xabc"));

        let ok = format_line(address, Some(100), 50);
        assert!(!ok.below_minimum);
        assert_eq!(ok.text, "0xabc  0.000000000000000100 STRK");

        let low = format_line(address, Some(10), 50);
        assert!(low.below_minimum);
        assert!(low.text.ends_with("(below minimum)"));

        let unknown = format_line(address, None, 50);
        assert!(unknown.below_minimum);
        assert_eq!(unknown.text, "0xabc  unavailable");
    }
}
