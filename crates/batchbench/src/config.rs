use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use batchbench_common::consts::{
    strk_fee_token, DEFAULT_FUNDING_AMOUNT_FRI, DEFAULT_MIN_BALANCE_FRI,
};
use batchbench_common::{ContractAddress, ResourceBound, ResourceBounds, SigningKey};
use batchbench_submitter::nonce::NonceStrategy;
use batchbench_submitter::{
    Account, BalanceCheck, BatchConfig, ConfirmationSettings, ReadRatio, RetryPolicy,
};
use clap::{Parser, Subcommand, ValueEnum};
use starknet_rpc_client::{BlockTag, Selection};
use url::Url;

#[derive(Parser)]
#[command(name = "batchbench")]
#[command(version)]
#[command(
    about = "Measures read and write throughput of Starknet JSON-RPC nodes by submitting batches of balance updates."
)]
struct Cli {
    #[arg(
        long = "rpc-url",
        long_help = r"JSON-RPC endpoint(s) of the node under test. Separate multiple endpoints with commas; requests are spread over them according to --endpoint-selection.

Examples:
    katana:  http://localhost:5050
    sepolia: https://starknet-sepolia.public.blastapi.io/rpc/v0_8",
        value_name = "URL",
        value_hint = clap::ValueHint::Url,
        value_delimiter = ',',
        required = true,
        env = "BATCHBENCH_RPC_URL"
    )]
    rpc_urls: Vec<Url>,

    #[arg(
        long = "endpoint-selection",
        long_help = "How requests are spread over multiple endpoints: round-robin, random or health-aware",
        default_value = "round-robin",
        env = "BATCHBENCH_ENDPOINT_SELECTION"
    )]
    endpoint_selection: Selection,

    #[arg(
        long = "block-tag",
        long_help = "Block used for nonce and call requests: latest, pre_confirmed or pending. Not every node accepts every tag.",
        default_value = "latest",
        env = "BATCHBENCH_BLOCK_TAG"
    )]
    block_tag: BlockTag,

    #[arg(
        long = "request-timeout",
        long_help = "Timeout of a single JSON-RPC request, in seconds",
        value_name = "SECONDS",
        default_value = "30",
        env = "BATCHBENCH_REQUEST_TIMEOUT"
    )]
    request_timeout: u64,

    #[arg(
        long = "accounts-file",
        long_help = r#"JSON file listing the benchmark accounts, either as a list of {"address": ..., "private_key": ...} objects or as an object with such a list under "accounts"."#,
        value_name = "FILE",
        value_hint = clap::ValueHint::FilePath,
        default_value = "accounts.json",
        env = "BATCHBENCH_ACCOUNTS_FILE"
    )]
    accounts_file: PathBuf,

    #[arg(
        long = "fee-token",
        long_help = "Address of the ERC20 fee token. Defaults to STRK.",
        value_name = "ADDRESS",
        value_parser = ContractAddress::from_hex,
        env = "BATCHBENCH_FEE_TOKEN"
    )]
    fee_token: Option<ContractAddress>,

    #[arg(
        long = "log-format",
        long_help = "Format of the log output on stderr",
        value_enum,
        default_value_t = LogFormat::Compact,
        env = "BATCHBENCH_LOG_FORMAT"
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: CommandCli,
}

#[derive(Subcommand)]
enum CommandCli {
    /// Submit one batch and report its throughput.
    Run(RunCli),
    /// List the fee token balance of every account.
    Balances {
        #[arg(
            long = "min-balance",
            long_help = "Accounts holding less than this many FRI are flagged",
            value_name = "FRI",
            default_value_t = DEFAULT_MIN_BALANCE_FRI,
            env = "BATCHBENCH_MIN_BALANCE"
        )]
        min_balance: u128,
    },
    /// Top up every account below the minimum balance from a funder account.
    Fund(FundCli),
    /// List the batch results recorded in the contract.
    Batches {
        #[arg(
            long = "contract-address",
            long_help = "Address of the deployed balance-store contract",
            value_name = "ADDRESS",
            value_parser = ContractAddress::from_hex,
            env = "BATCHBENCH_CONTRACT_ADDRESS"
        )]
        contract_address: ContractAddress,
    },
}

#[derive(clap::Args)]
struct RunCli {
    #[arg(
        long = "contract-address",
        long_help = "Address of the deployed balance-store contract",
        value_name = "ADDRESS",
        value_parser = ContractAddress::from_hex,
        env = "BATCHBENCH_CONTRACT_ADDRESS"
    )]
    contract_address: ContractAddress,

    #[arg(
        long = "batch-size",
        long_help = "Number of read and write operations in the batch",
        default_value = "200",
        env = "BATCHBENCH_BATCH_SIZE"
    )]
    batch_size: NonZeroUsize,

    #[arg(
        long = "bundle-size",
        long_help = "Number of updates carried by a single invoke transaction",
        default_value = "1",
        env = "BATCHBENCH_BUNDLE_SIZE"
    )]
    bundle_size: NonZeroUsize,

    #[arg(
        long = "read-ratio",
        long_help = "Fraction of the batch which is reads, between 0 and 1",
        default_value = "0",
        env = "BATCHBENCH_READ_RATIO"
    )]
    read_ratio: ReadRatio,

    #[arg(
        long = "concurrency",
        long_help = "Maximum number of outstanding requests, confirmation polls included",
        default_value = "50",
        env = "BATCHBENCH_CONCURRENCY"
    )]
    concurrency: NonZeroUsize,

    #[arg(
        long = "num-accounts",
        long_help = "Only use the first N accounts of the accounts file",
        value_name = "N",
        env = "BATCHBENCH_NUM_ACCOUNTS"
    )]
    num_accounts: Option<NonZeroUsize>,

    #[arg(
        long = "nonce-strategy",
        long_help = r"How writes obtain their nonce.

optimistic: fetch once per account and count locally, recovering from conflicts by refetching.
serialized: fetch from the node before every write.",
        default_value = "optimistic",
        env = "BATCHBENCH_NONCE_STRATEGY"
    )]
    nonce_strategy: NonceStrategy,

    #[arg(
        long = "max-attempts",
        long_help = "Attempts per request, the first one included, before a transient error is final",
        default_value = "3",
        env = "BATCHBENCH_MAX_ATTEMPTS"
    )]
    max_attempts: NonZeroUsize,

    #[arg(
        long = "retry-base-delay",
        long_help = "Delay before the first retry in milliseconds. Later retries back off exponentially.",
        value_name = "MILLISECONDS",
        default_value = "1000",
        env = "BATCHBENCH_RETRY_BASE_DELAY"
    )]
    retry_base_delay: u64,

    #[arg(
        long = "max-requeues",
        long_help = "How often a write is requeued after a nonce conflict before it counts as failed",
        default_value = "3",
        env = "BATCHBENCH_MAX_REQUEUES"
    )]
    max_requeues: u32,

    #[arg(
        long = "l1-gas",
        long_help = "L1 gas bound as AMOUNT@PRICE_PER_UNIT",
        value_name = "AMOUNT@PRICE",
        default_value = "10000@30000000000000",
        env = "BATCHBENCH_L1_GAS"
    )]
    l1_gas: ResourceBound,

    #[arg(
        long = "l2-gas",
        long_help = "L2 gas bound as AMOUNT@PRICE_PER_UNIT",
        value_name = "AMOUNT@PRICE",
        default_value = "800000@30000000000000",
        env = "BATCHBENCH_L2_GAS"
    )]
    l2_gas: ResourceBound,

    #[arg(
        long = "l1-data-gas",
        long_help = "L1 data gas bound as AMOUNT@PRICE_PER_UNIT",
        value_name = "AMOUNT@PRICE",
        default_value = "200@30000000000000",
        env = "BATCHBENCH_L1_DATA_GAS"
    )]
    l1_data_gas: ResourceBound,

    #[arg(
        long = "poll-interval",
        long_help = "Delay between receipt polls in milliseconds",
        value_name = "MILLISECONDS",
        default_value = "500",
        env = "BATCHBENCH_POLL_INTERVAL"
    )]
    poll_interval: u64,

    #[arg(
        long = "confirmation-timeout",
        long_help = "How long to wait for a receipt before a transaction counts as unconfirmed, in seconds",
        value_name = "SECONDS",
        default_value = "250",
        env = "BATCHBENCH_CONFIRMATION_TIMEOUT"
    )]
    confirmation_timeout: u64,

    #[arg(
        long = "min-balance",
        long_help = "Accounts holding less than this many FRI of the fee token are not used",
        value_name = "FRI",
        default_value_t = DEFAULT_MIN_BALANCE_FRI,
        env = "BATCHBENCH_MIN_BALANCE"
    )]
    min_balance: u128,

    #[arg(
        long = "skip-balance-check",
        long_help = "Use every account without checking its balance first",
        action = clap::ArgAction::SetTrue,
        env = "BATCHBENCH_SKIP_BALANCE_CHECK"
    )]
    skip_balance_check: bool,

    #[arg(
        long = "verify-balances",
        long_help = "Once all writes are confirmed, read back the balance of every written account and compare it with its last write",
        action = clap::ArgAction::SetTrue,
        env = "BATCHBENCH_VERIFY_BALANCES"
    )]
    verify_balances: bool,

    #[arg(
        long = "batch-id",
        long_help = "Identifier of the batch in reports. Defaults to the current unix time.",
        env = "BATCHBENCH_BATCH_ID"
    )]
    batch_id: Option<u64>,

    #[arg(
        long = "seed",
        long_help = "Seed for shuffling the operations, making the order reproducible",
        env = "BATCHBENCH_SEED"
    )]
    seed: Option<u64>,

    #[arg(
        long = "results-dir",
        long_help = "Directory the JSON report is written to",
        value_name = "DIR",
        value_hint = clap::ValueHint::DirPath,
        default_value = "results",
        env = "BATCHBENCH_RESULTS_DIR"
    )]
    results_dir: PathBuf,

    #[arg(
        long = "record-on-ledger",
        long_help = "Store the batch result in the contract using set_batch_info, signed by the admin account",
        action = clap::ArgAction::SetTrue,
        requires_all = ["admin_address", "admin_private_key"],
        env = "BATCHBENCH_RECORD_ON_LEDGER"
    )]
    record_on_ledger: bool,

    #[arg(
        long = "admin-address",
        value_name = "ADDRESS",
        value_parser = ContractAddress::from_hex,
        env = "BATCHBENCH_ADMIN_ADDRESS"
    )]
    admin_address: Option<ContractAddress>,

    #[arg(
        long = "admin-private-key",
        value_name = "KEY",
        value_parser = SigningKey::from_hex,
        hide_env_values = true,
        env = "BATCHBENCH_ADMIN_PRIVATE_KEY"
    )]
    admin_private_key: Option<SigningKey>,
}

#[derive(clap::Args)]
struct FundCli {
    #[arg(
        long = "funder-address",
        value_name = "ADDRESS",
        value_parser = ContractAddress::from_hex,
        env = "BATCHBENCH_FUNDER_ADDRESS"
    )]
    funder_address: ContractAddress,

    #[arg(
        long = "funder-private-key",
        value_name = "KEY",
        value_parser = SigningKey::from_hex,
        hide_env_values = true,
        env = "BATCHBENCH_FUNDER_PRIVATE_KEY"
    )]
    funder_private_key: SigningKey,

    #[arg(
        long = "amount",
        long_help = "FRI sent to each account below the minimum",
        value_name = "FRI",
        default_value_t = DEFAULT_FUNDING_AMOUNT_FRI,
        env = "BATCHBENCH_FUNDING_AMOUNT"
    )]
    amount: u128,

    #[arg(
        long = "min-balance",
        long_help = "Only accounts holding less than this many FRI are funded",
        value_name = "FRI",
        default_value_t = DEFAULT_MIN_BALANCE_FRI,
        env = "BATCHBENCH_MIN_BALANCE"
    )]
    min_balance: u128,

    #[arg(
        long = "max-accounts",
        long_help = "Fund at most this many accounts",
        value_name = "N",
        env = "BATCHBENCH_MAX_ACCOUNTS"
    )]
    max_accounts: Option<usize>,
}

pub struct Config {
    pub ledger: LedgerConfig,
    pub log_format: LogFormat,
    pub command: Command,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable single lines.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

pub struct LedgerConfig {
    pub rpc_urls: Vec<Url>,
    pub endpoint_selection: Selection,
    pub block_tag: BlockTag,
    pub request_timeout: Duration,
    pub accounts_file: PathBuf,
    pub fee_token: ContractAddress,
}

#[derive(Debug)]
pub enum Command {
    Run(RunConfig),
    Balances { min_balance: u128 },
    Fund(FundConfig),
    Batches { contract_address: ContractAddress },
}

impl Command {
    /// Whether the command works on the accounts file.
    pub fn uses_accounts(&self) -> bool {
        !matches!(self, Command::Batches { .. })
    }
}

#[derive(Debug)]
pub struct RunConfig {
    pub contract_address: ContractAddress,
    pub batch: BatchConfig,
    pub num_accounts: Option<NonZeroUsize>,
    pub batch_id: Option<u64>,
    pub results_dir: PathBuf,
    /// Signs the on-ledger batch record, if enabled.
    pub admin: Option<Account>,
}

#[derive(Debug)]
pub struct FundConfig {
    pub funder: Account,
    pub amount: u128,
    pub min_balance: u128,
    pub max_accounts: Option<usize>,
}

impl Config {
    pub fn parse() -> Self {
        Self::from_cli(Cli::parse())
    }

    #[cfg(test)]
    fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Cli::try_parse_from(args).map(Self::from_cli)
    }

    fn from_cli(cli: Cli) -> Self {
        let fee_token = cli.fee_token.unwrap_or_else(strk_fee_token);

        let command = match cli.command {
            CommandCli::Run(run) => Command::Run(RunConfig::from_cli(run, fee_token)),
            CommandCli::Balances { min_balance } => Command::Balances { min_balance },
            CommandCli::Fund(fund) => Command::Fund(FundConfig {
                funder: Account {
                    address: fund.funder_address,
                    key: fund.funder_private_key,
                },
                amount: fund.amount,
                min_balance: fund.min_balance,
                max_accounts: fund.max_accounts,
            }),
            CommandCli::Batches { contract_address } => Command::Batches { contract_address },
        };

        Config {
            ledger: LedgerConfig {
                rpc_urls: cli.rpc_urls,
                endpoint_selection: cli.endpoint_selection,
                block_tag: cli.block_tag,
                request_timeout: Duration::from_secs(cli.request_timeout),
                accounts_file: cli.accounts_file,
                fee_token,
            },
            log_format: cli.log_format,
            command,
        }
    }
}

impl RunConfig {
    fn from_cli(cli: RunCli, fee_token: ContractAddress) -> Self {
        let mut batch = BatchConfig::new(
            cli.batch_size,
            cli.bundle_size,
            cli.read_ratio,
            cli.concurrency,
        );
        batch.nonce_strategy = cli.nonce_strategy;
        batch.max_requeues = cli.max_requeues;
        batch.retry = RetryPolicy {
            max_attempts: cli.max_attempts,
            base_delay: Duration::from_millis(cli.retry_base_delay),
            ..Default::default()
        };
        batch.resource_bounds = ResourceBounds {
            l1_gas: cli.l1_gas,
            l2_gas: cli.l2_gas,
            l1_data_gas: Some(cli.l1_data_gas),
        };
        batch.confirmation = ConfirmationSettings {
            poll_interval: Duration::from_millis(cli.poll_interval),
            timeout: Duration::from_secs(cli.confirmation_timeout),
        };
        batch.balance_check = (!cli.skip_balance_check).then_some(BalanceCheck {
            fee_token,
            minimum: cli.min_balance,
        });
        batch.shuffle_seed = cli.seed;
        batch.verify_balances = cli.verify_balances;

        // Both are present whenever recording is enabled, clap enforces it.
        let admin = match (cli.record_on_ledger, cli.admin_address, cli.admin_private_key) {
            (true, Some(address), Some(key)) => Some(Account { address, key }),
            _ => None,
        };

        RunConfig {
            contract_address: cli.contract_address,
            batch,
            num_accounts: cli.num_accounts,
            batch_id: cli.batch_id,
            results_dir: cli.results_dir,
            admin,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use batchbench_common::felt;

    use super::*;

    const BASE: [&str; 3] = ["batchbench", "--rpc-url", "http://localhost:5050"];

    fn parse(args: &[&str]) -> Result<Config, clap::Error> {
        Config::try_parse_from(BASE.iter().chain(args))
    }

    #[test]
    fn run_defaults() {
        let config = parse(&["run", "--contract-address", "0x1234"]).unwrap();

        assert_eq!(config.ledger.rpc_urls.len(), 1);
        assert_eq!(config.ledger.fee_token, strk_fee_token());
        assert_eq!(config.ledger.request_timeout, Duration::from_secs(30));

        let run = assert_matches!(config.command, Command::Run(run) => run);
        assert_eq!(run.contract_address, ContractAddress(felt!("0x1234")));
        assert_eq!(run.batch.batch_size.get(), 200);
        assert_eq!(run.batch.read_ratio, ReadRatio::ZERO);
        assert_eq!(run.batch.nonce_strategy, NonceStrategy::Optimistic);
        assert_eq!(run.batch.resource_bounds, ResourceBounds::default());
        assert_eq!(run.batch.confirmation, ConfirmationSettings::default());
        assert_eq!(run.batch.retry, RetryPolicy::default());
        assert_eq!(
            run.batch.balance_check.map(|c| c.minimum),
            Some(DEFAULT_MIN_BALANCE_FRI)
        );
        assert!(run.admin.is_none());
        assert!(!run.batch.verify_balances);
        assert_eq!(config.log_format, LogFormat::Compact);
    }

    #[test]
    fn multiple_endpoints() {
        let config = Config::try_parse_from([
            "batchbench",
            "--rpc-url",
            "http://a:5050,http://b:5050",
            "--endpoint-selection",
            "health-aware",
            "balances",
        ])
        .unwrap();

        assert_eq!(config.ledger.rpc_urls.len(), 2);
        assert_eq!(config.ledger.endpoint_selection, Selection::HealthAware);
        assert_matches!(config.command, Command::Balances { .. });
    }

    #[test]
    fn run_options() {
        let config = parse(&[
            "run",
            "--contract-address",
            "1234",
            "--batch-size",
            "10",
            "--read-ratio",
            "0.2",
            "--nonce-strategy",
            "serialized",
            "--l2-gas",
            "0x10@0x20",
            "--skip-balance-check",
            "--seed",
            "7",
            "--verify-balances",
        ])
        .unwrap();

        let run = assert_matches!(config.command, Command::Run(run) => run);
        assert_eq!(run.batch.batch_size.get(), 10);
        assert_eq!(run.batch.read_ratio.get(), 0.2);
        assert_eq!(run.batch.nonce_strategy, NonceStrategy::Serialized);
        assert_eq!(run.batch.resource_bounds.l2_gas, ResourceBound::new(16, 32));
        assert_eq!(run.batch.balance_check, None);
        assert_eq!(run.batch.shuffle_seed, Some(7));
        assert!(run.batch.verify_balances);
    }

    #[test]
    fn batches_needs_no_accounts() {
        let config = parse(&["batches", "--contract-address", "0x1234"]).unwrap();
        let contract = assert_matches!(
            &config.command,
            Command::Batches { contract_address } => *contract_address
        );
        assert_eq!(contract, ContractAddress(felt!("0x1234")));
        assert!(!config.command.uses_accounts());

        let config = parse(&["balances"]).unwrap();
        assert!(config.command.uses_accounts());
    }

    #[test]
    fn json_logs() {
        let config = Config::try_parse_from([
            "batchbench",
            "--rpc-url",
            "http://localhost:5050",
            "--log-format",
            "json",
            "balances",
        ])
        .unwrap();
        assert_eq!(config.log_format, LogFormat::Json);

        assert!(parse(&["--log-format", "yaml", "balances"]).is_err());
    }

    #[test]
    fn recording_requires_admin_account() {
        let result = parse(&["run", "--contract-address", "0x1", "--record-on-ledger"]);
        assert!(result.is_err());

        let config = parse(&[
            "run",
            "--contract-address",
            "0x1",
            "--record-on-ledger",
            "--admin-address",
            "0xad",
            "--admin-private-key",
            "0x5",
        ])
        .unwrap();
        let run = assert_matches!(config.command, Command::Run(run) => run);
        assert_eq!(
            run.admin.map(|a| a.address),
            Some(ContractAddress(felt!("0xad")))
        );
    }

    #[rstest::rstest]
    #[case::negative_ratio(&["run", "--contract-address", "0x1", "--read-ratio", "-0.5"])]
    #[case::zero_batch(&["run", "--contract-address", "0x1", "--batch-size", "0"])]
    #[case::bad_bound(&["run", "--contract-address", "0x1", "--l1-gas", "100"])]
    #[case::bad_address(&["run", "--contract-address", "0xzz"])]
    fn invalid_arguments(#[case] args: &[&str]) {
        assert!(parse(args).is_err());
    }
}
