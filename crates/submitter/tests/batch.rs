//! End to end batches against an in-memory ledger with simulated latency.
use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use batchbench_common::{
    felt, felt_to_u128, felt_to_u64, Call, ChainId, ContractAddress, EntryPoint, Felt, InvokeTransactionV3, SigningKey,
    TransactionHash, TransactionNonce,
};
use batchbench_submitter::nonce::NonceStrategy;
use batchbench_submitter::{
    Account, AccountPool, BalanceCheck, BatchConfig, BatchError, NoEligibleAccounts, ReadRatio,
    Submitter, Workload,
};
use starknet_rpc_client::error::StatusCode;
use starknet_rpc_client::reply::{ExecutionStatus, FeePayment, FinalityStatus, PriceUnit};
use starknet_rpc_client::{LedgerClient, MockLedgerClient, Receipt, RpcError};

const FEE: u64 = 100;

#[derive(Default)]
struct LedgerState {
    used_nonces: HashMap<ContractAddress, BTreeSet<u64>>,
    /// Accepted transactions in order of arrival.
    accepted: Vec<(ContractAddress, u64)>,
    /// Transactions refused because of their nonce.
    conflicts: Vec<(ContractAddress, u64)>,
    receipts: HashMap<TransactionHash, Receipt>,
    /// `get_balance` storage, with the nonce of the write that set it.
    stored: HashMap<ContractAddress, (u64, u128)>,
    injected_conflicts: usize,
    /// Submissions answered with a rate limit before reaching the mempool.
    injected_rate_limits: usize,
    /// Submissions failing validation.
    injected_rejections: usize,
    /// Submissions which are accepted but whose reply never arrives.
    lost_replies: usize,
    /// Accounts whose writes are accepted but never change storage.
    dropped_writes: BTreeSet<ContractAddress>,
    failing_reads: bool,
    submissions: usize,
    nonce_fetches: usize,
    reads: usize,
}

impl LedgerState {
    fn node_nonce(&self, account: ContractAddress) -> u64 {
        let used = self.used_nonces.get(&account);
        (0..)
            .find(|n| used.map_or(true, |used| !used.contains(n)))
            .unwrap_or_default()
    }
}

/// Behaves like a node with a mempool: any unused nonce at or above the
/// account nonce is accepted and confirmed straight away.
struct FakeLedger {
    latency: Duration,
    balances: HashMap<ContractAddress, u128>,
    state: Mutex<LedgerState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a FakeLedger);

impl<'a> InFlight<'a> {
    fn enter(ledger: &'a FakeLedger) -> Self {
        let now = ledger.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        ledger.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(ledger)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeLedger {
    fn new(latency: Duration) -> Self {
        Self {
            latency,
            balances: HashMap::new(),
            state: Mutex::default(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_balance(mut self, account: ContractAddress, balance: u128) -> Self {
        self.balances.insert(account, balance);
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap()
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn roundtrip(&self) -> InFlight<'_> {
        let guard = InFlight::enter(self);
        tokio::time::sleep(self.latency).await;
        guard
    }
}

fn nonce_conflict() -> RpcError {
    RpcError::Starknet {
        code: 52,
        message: "Invalid transaction nonce".to_owned(),
        data: None,
    }
}

fn rate_limited() -> RpcError {
    RpcError::Starknet {
        code: -32005,
        message: "limit exceeded".to_owned(),
        data: None,
    }
}

#[async_trait::async_trait]
impl LedgerClient for FakeLedger {
    async fn chain_id(&self) -> Result<ChainId, RpcError> {
        let _guard = self.roundtrip().await;
        Ok(ChainId::katana())
    }

    async fn nonce(&self, address: ContractAddress) -> Result<TransactionNonce, RpcError> {
        let _guard = self.roundtrip().await;
        let mut state = self.state();
        state.nonce_fetches += 1;
        Ok(TransactionNonce::from_u64(state.node_nonce(address)))
    }

    async fn call(&self, call: Call) -> Result<Vec<Felt>, RpcError> {
        let _guard = self.roundtrip().await;

        if call.selector == EntryPoint::hashed(b"balance_of") {
            let account = ContractAddress(call.calldata[0]);
            let balance = self.balances.get(&account).copied().unwrap_or_default();
            return Ok(vec![Felt::from(balance), Felt::ZERO]);
        }

        let mut state = self.state();
        state.reads += 1;
        if state.failing_reads {
            return Err(rate_limited());
        }
        let account = ContractAddress(call.calldata[0]);
        let (_, value) = state.stored.get(&account).copied().unwrap_or_default();
        Ok(vec![Felt::from(value), Felt::ZERO])
    }

    async fn add_invoke_transaction(
        &self,
        transaction: InvokeTransactionV3,
    ) -> Result<TransactionHash, RpcError> {
        let _guard = self.roundtrip().await;

        let account = transaction.sender_address;
        let nonce = transaction.nonce.to_u64().unwrap();
        let mut state = self.state();
        state.submissions += 1;

        if state.injected_rate_limits > 0 {
            state.injected_rate_limits -= 1;
            return Err(rate_limited());
        }
        if state.injected_rejections > 0 {
            state.injected_rejections -= 1;
            return Err(RpcError::Starknet {
                code: 54,
                message: "Account validation failed".to_owned(),
                data: None,
            });
        }

        let hash = transaction.calculate_hash(ChainId::katana());
        if state.receipts.contains_key(&hash) {
            return Err(RpcError::Starknet {
                code: 59,
                message: "A transaction with the same hash already exists in the mempool".to_owned(),
                data: None,
            });
        }

        let taken = state
            .used_nonces
            .get(&account)
            .is_some_and(|used| used.contains(&nonce));
        if state.injected_conflicts > 0 || taken || nonce < state.node_nonce(account) {
            state.injected_conflicts = state.injected_conflicts.saturating_sub(1);
            state.conflicts.push((account, nonce));
            return Err(nonce_conflict());
        }

        state.used_nonces.entry(account).or_default().insert(nonce);
        state.accepted.push((account, nonce));

        // Transactions of an account execute in nonce order.
        if !state.dropped_writes.contains(&account) {
            if let Some(value) = last_stored_value(&transaction.calldata) {
                let stored = state.stored.entry(account).or_insert((nonce, value));
                if nonce >= stored.0 {
                    *stored = (nonce, value);
                }
            }
        }

        state.receipts.insert(
            hash,
            Receipt {
                transaction_hash: hash,
                actual_fee: FeePayment {
                    amount: Felt::from(FEE),
                    unit: PriceUnit::Fri,
                },
                execution_status: ExecutionStatus::Succeeded,
                finality_status: FinalityStatus::AcceptedOnL2,
                block_number: Some(1),
                revert_reason: None,
            },
        );

        if state.lost_replies > 0 {
            state.lost_replies -= 1;
            return Err(RpcError::HttpStatus {
                status: StatusCode::GATEWAY_TIMEOUT,
                body: String::new(),
            });
        }
        Ok(hash)
    }

    async fn receipt(&self, hash: TransactionHash) -> Result<Option<Receipt>, RpcError> {
        let _guard = self.roundtrip().await;
        Ok(self.state().receipts.get(&hash).cloned())
    }
}

/// Low limb of the last `update_balance` call in `__execute__` calldata.
fn last_stored_value(calldata: &[Felt]) -> Option<u128> {
    let update_balance = EntryPoint::hashed(b"update_balance").0;
    let mut rest = calldata.get(1..)?;
    let mut value = None;
    while let [_to, selector, len, tail @ ..] = rest {
        let len = felt_to_u64(len)? as usize;
        let (args, next) = tail.split_at_checked(len)?;
        if *selector == update_balance {
            value = Some(felt_to_u128(args.first()?)?);
        }
        rest = next;
    }
    value
}

fn nz(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

fn address(i: u64) -> ContractAddress {
    ContractAddress(Felt::from(0x100 + i))
}

fn accounts(n: u64) -> AccountPool {
    AccountPool::new(
        (0..n)
            .map(|i| Account {
                address: address(i),
                key: SigningKey::from_secret(Felt::from(0xbeef + i)),
            })
            .collect(),
    )
    .unwrap()
}

fn workload() -> Workload {
    Workload::balance_updater(ContractAddress(felt!("0xc0ffee")))
}

fn config(batch_size: usize, bundle_size: usize, read_ratio: f64, concurrency: usize) -> BatchConfig {
    let mut config = BatchConfig::new(
        nz(batch_size),
        nz(bundle_size),
        ReadRatio::new(read_ratio).unwrap(),
        nz(concurrency),
    );
    config.retry.jitter = false;
    config.shuffle_seed = Some(7);
    config
}

#[test_log::test(tokio::test(start_paused = true))]
async fn mixed_batch_is_fully_confirmed() {
    let ledger = Arc::new(FakeLedger::new(Duration::from_millis(50)));

    let summary = Submitter::new(ledger.clone(), accounts(3), workload(), config(10, 1, 0.2, 4))
        .run(1)
        .await
        .unwrap();

    assert_eq!(summary.reads_succeeded, 2);
    assert_eq!(summary.updates_submitted, 8);
    assert_eq!(summary.transactions_submitted, 8);
    assert_eq!(summary.transactions_confirmed, 8);
    assert_eq!(summary.updates_confirmed, 8);
    assert_eq!(summary.transactions_failed, 0);
    assert_eq!(summary.requeues, 0);
    assert_eq!(summary.total_fee, 8 * FEE as u128);
    assert!(summary.throughput.excluding_confirmation > 0.0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn outstanding_requests_never_exceed_concurrency() {
    let ledger = Arc::new(FakeLedger::new(Duration::from_millis(100)));

    let summary = Submitter::new(ledger.clone(), accounts(3), workload(), config(60, 2, 0.5, 4))
        .run(1)
        .await
        .unwrap();

    assert_eq!(summary.reads_succeeded, 30);
    assert_eq!(summary.transactions_submitted, 15);
    assert_eq!(summary.updates_confirmed, 30);
    assert_eq!(ledger.max_in_flight(), 4);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn no_eligible_accounts_aborts_before_submitting() {
    let ledger = Arc::new(
        FakeLedger::new(Duration::from_millis(10))
            .with_balance(address(0), 10)
            .with_balance(address(1), 20),
    );
    let mut config = config(10, 1, 0.0, 2);
    config.balance_check = Some(BalanceCheck {
        fee_token: ContractAddress(felt!("0x4718")),
        minimum: 1_000,
    });

    let result = Submitter::new(ledger.clone(), accounts(2), workload(), config)
        .run(1)
        .await;

    assert_matches!(
        result,
        Err(BatchError::NoEligibleAccounts(NoEligibleAccounts { minimum: 1_000 }))
    );
    assert_eq!(ledger.state().submissions, 0);
    assert_eq!(ledger.state().nonce_fetches, 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn accounts_below_minimum_are_skipped() {
    let ledger = Arc::new(
        FakeLedger::new(Duration::from_millis(10))
            .with_balance(address(0), 10)
            .with_balance(address(1), 5_000),
    );
    let mut config = config(4, 1, 0.0, 2);
    config.balance_check = Some(BalanceCheck {
        fee_token: ContractAddress(felt!("0x4718")),
        minimum: 1_000,
    });

    let summary = Submitter::new(ledger.clone(), accounts(2), workload(), config)
        .run(1)
        .await
        .unwrap();

    assert_eq!(summary.transactions_confirmed, 4);
    let senders = ledger
        .state()
        .accepted
        .iter()
        .map(|(account, _)| *account)
        .collect::<BTreeSet<_>>();
    assert_eq!(senders, BTreeSet::from([address(1)]));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn nonce_conflict_is_requeued_once_with_fresh_nonce() {
    let ledger = Arc::new(FakeLedger::new(Duration::from_millis(10)));
    ledger.state().injected_conflicts = 1;

    let summary = Submitter::new(ledger.clone(), accounts(1), workload(), config(3, 1, 0.0, 1))
        .run(1)
        .await
        .unwrap();

    assert_eq!(summary.requeues, 1);
    assert_eq!(summary.transactions_submitted, 3);
    assert_eq!(summary.transactions_confirmed, 3);
    assert_eq!(summary.transactions_failed, 0);

    let state = ledger.state();
    assert_eq!(state.conflicts, vec![(address(0), 0)]);
    assert_eq!(
        state.accepted,
        vec![(address(0), 0), (address(0), 1), (address(0), 2)]
    );
    // One prefetch plus one fetch for the requeued write.
    assert_eq!(state.nonce_fetches, 2);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn requeues_are_bounded() {
    let ledger = Arc::new(FakeLedger::new(Duration::from_millis(10)));
    ledger.state().injected_conflicts = 100;

    let summary = Submitter::new(ledger.clone(), accounts(1), workload(), config(1, 1, 0.0, 1))
        .run(1)
        .await
        .unwrap();

    assert_eq!(summary.requeues, 3);
    assert_eq!(summary.transactions_failed, 1);
    assert_eq!(summary.updates_failed, 1);
    assert_eq!(summary.transactions_submitted, 0);
    assert_eq!(ledger.state().submissions, 4);
}

async fn submission_time(concurrency: usize) -> (Duration, Duration) {
    let ledger = Arc::new(FakeLedger::new(Duration::from_millis(100)));

    let summary = Submitter::new(
        ledger.clone(),
        accounts(5),
        workload(),
        config(5, 1, 0.0, concurrency),
    )
    .run(1)
    .await
    .unwrap();

    assert_eq!(summary.transactions_confirmed, 5);
    (summary.timings.submission, summary.timings.confirmation)
}

#[test_log::test(tokio::test(start_paused = true))]
async fn single_slot_serializes_latencies() {
    let (submission, confirmation) = submission_time(1).await;

    assert!(submission >= Duration::from_millis(500), "{submission:?}");
    assert!(submission < Duration::from_millis(520), "{submission:?}");
    assert!(confirmation >= Duration::from_millis(500), "{confirmation:?}");
    assert!(confirmation < Duration::from_millis(520), "{confirmation:?}");
}

#[test_log::test(tokio::test(start_paused = true))]
async fn parallel_slots_overlap_latencies() {
    let (submission, confirmation) = submission_time(5).await;

    assert!(submission >= Duration::from_millis(100), "{submission:?}");
    assert!(submission < Duration::from_millis(120), "{submission:?}");
    assert!(confirmation < Duration::from_millis(120), "{confirmation:?}");
}

#[test_log::test(tokio::test(start_paused = true))]
async fn transient_read_failures_are_retried_a_bounded_number_of_times() {
    let ledger = Arc::new(FakeLedger::new(Duration::from_millis(10)));
    ledger.state().failing_reads = true;

    let summary = Submitter::new(ledger.clone(), accounts(2), workload(), config(4, 1, 1.0, 2))
        .run(1)
        .await
        .unwrap();

    assert_eq!(summary.reads_failed, 4);
    assert_eq!(summary.reads_succeeded, 0);
    assert_eq!(summary.retries, 8);
    assert_eq!(ledger.state().reads, 12);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn serialized_nonces_fetch_before_every_write() {
    let ledger = Arc::new(FakeLedger::new(Duration::from_millis(10)));
    let mut config = config(6, 1, 0.0, 3);
    config.nonce_strategy = NonceStrategy::Serialized;

    let summary = Submitter::new(ledger.clone(), accounts(1), workload(), config)
        .run(1)
        .await
        .unwrap();

    assert_eq!(summary.transactions_confirmed, 6);
    assert_eq!(summary.requeues, 0);

    let state = ledger.state();
    assert_eq!(state.nonce_fetches, 6);
    let nonces = state
        .accepted
        .iter()
        .map(|(_, nonce)| *nonce)
        .collect::<BTreeSet<_>>();
    assert_eq!(nonces, (0..6).collect());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn chain_id_failure_is_a_precondition_error() {
    let mut client = MockLedgerClient::new();
    client.expect_chain_id().times(1).returning(|| {
        Err(RpcError::Starknet {
            code: -32602,
            message: "Invalid params".to_owned(),
            data: None,
        })
    });
    client.expect_add_invoke_transaction().never();

    let result = Submitter::new(Arc::new(client), accounts(1), workload(), config(2, 1, 0.0, 1))
        .run(1)
        .await;

    assert_matches!(result, Err(BatchError::ChainId(_)));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn transient_submission_errors_are_retried_in_place() {
    let ledger = Arc::new(FakeLedger::new(Duration::from_millis(10)));
    ledger.state().injected_rate_limits = 2;

    let summary = Submitter::new(ledger.clone(), accounts(1), workload(), config(1, 1, 0.0, 1))
        .run(1)
        .await
        .unwrap();

    assert_eq!(summary.transactions_submitted, 1);
    assert_eq!(summary.transactions_confirmed, 1);
    assert_eq!(summary.transactions_failed, 0);
    assert_eq!(summary.requeues, 0);
    assert_eq!(summary.retries, 2);

    let state = ledger.state();
    assert_eq!(state.submissions, 3);
    assert_eq!(state.accepted, vec![(address(0), 0)]);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn rejected_write_fails_without_retry_and_frees_its_nonce() {
    let ledger = Arc::new(FakeLedger::new(Duration::from_millis(10)));
    ledger.state().injected_rejections = 1;

    let summary = Submitter::new(ledger.clone(), accounts(1), workload(), config(2, 1, 0.0, 1))
        .run(1)
        .await
        .unwrap();

    assert_eq!(summary.transactions_failed, 1);
    assert_eq!(summary.updates_failed, 1);
    assert_eq!(summary.transactions_confirmed, 1);
    assert_eq!(summary.requeues, 0);
    assert_eq!(summary.retries, 0);

    let state = ledger.state();
    assert_eq!(state.submissions, 2);
    // The second write reuses the nonce the rejected one gave back.
    assert_eq!(state.accepted, vec![(address(0), 0)]);
    assert_eq!(state.nonce_fetches, 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn duplicate_after_lost_reply_counts_as_accepted() {
    let ledger = Arc::new(FakeLedger::new(Duration::from_millis(10)));
    ledger.state().lost_replies = 1;

    let summary = Submitter::new(ledger.clone(), accounts(1), workload(), config(1, 1, 0.0, 1))
        .run(1)
        .await
        .unwrap();

    assert_eq!(summary.transactions_submitted, 1);
    assert_eq!(summary.transactions_confirmed, 1);
    assert_eq!(summary.transactions_failed, 0);
    assert_eq!(summary.requeues, 0);
    assert_eq!(summary.retries, 1);
    assert_eq!(summary.total_fee, FEE as u128);

    let state = ledger.state();
    assert_eq!(state.submissions, 2);
    assert_eq!(state.accepted, vec![(address(0), 0)]);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn written_balances_are_verified() {
    let ledger = Arc::new(FakeLedger::new(Duration::from_millis(10)));
    let mut config = config(12, 2, 0.0, 4);
    config.verify_balances = true;

    let summary = Submitter::new(ledger.clone(), accounts(3), workload(), config)
        .run(1)
        .await
        .unwrap();

    assert_eq!(summary.transactions_confirmed, 6);
    assert_eq!(summary.balances_verified, 3);
    assert_eq!(summary.balances_mismatched, 0);
    assert_eq!(summary.balances_unreadable, 0);

    // Each account's second bundle is its last write: updates 6-7, 8-9, 10-11.
    let verified = summary
        .verifications
        .iter()
        .map(|v| (v.account, v.expected, v.actual))
        .collect::<Vec<_>>();
    assert_eq!(
        verified,
        vec![
            (address(0), 8, Some(8)),
            (address(1), 10, Some(10)),
            (address(2), 12, Some(12)),
        ]
    );
    assert!(summary.timings.verification > Duration::ZERO);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn lost_writes_show_up_as_mismatches() {
    let ledger = Arc::new(FakeLedger::new(Duration::from_millis(10)));
    ledger.state().dropped_writes.insert(address(1));
    let mut config = config(4, 1, 0.0, 2);
    config.verify_balances = true;

    let summary = Submitter::new(ledger.clone(), accounts(2), workload(), config)
        .run(1)
        .await
        .unwrap();

    assert_eq!(summary.transactions_confirmed, 4);
    assert_eq!(summary.balances_verified, 1);
    assert_eq!(summary.balances_mismatched, 1);

    let mismatch = summary
        .verifications
        .iter()
        .find(|v| !v.matches())
        .unwrap();
    assert_eq!(mismatch.account, address(1));
    assert_eq!(mismatch.actual, Some(0));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn verification_is_off_by_default() {
    let ledger = Arc::new(FakeLedger::new(Duration::from_millis(10)));

    let summary = Submitter::new(ledger.clone(), accounts(1), workload(), config(2, 1, 0.0, 1))
        .run(1)
        .await
        .unwrap();

    assert!(summary.verifications.is_empty());
    assert_eq!(ledger.state().reads, 0);
}
