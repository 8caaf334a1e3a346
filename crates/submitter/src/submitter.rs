//! Dispatching a batch with bounded concurrency and confirming its writes.
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use batchbench_common::{
    ChainId, ContractAddress, InvokeTransactionV3, SigningError, TransactionHash,
    TransactionNonce, U256,
};
use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use starknet_rpc_client::error::code::DUPLICATE_TX;
use starknet_rpc_client::{ErrorKind, LedgerClient, RpcError};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

use crate::accounts::{eligible_accounts, Account, AccountPool};
use crate::config::BatchConfig;
use crate::confirm::{Confirmation, Confirmer};
use crate::error::BatchError;
use crate::nonce::{NonceError, NonceStore, NonceStrategy};
use crate::plan::{self, Job, JobKind, OperationCounts};
use crate::summary::{BalanceVerification, BatchSummary};
use crate::workload::Workload;

/// A write the node accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub job_id: usize,
    pub account: ContractAddress,
    pub nonce: u64,
    pub transaction_hash: TransactionHash,
    pub updates: usize,
    /// The last update of the bundle, which is what the account's balance
    /// holds once the transaction executed.
    pub last_update: usize,
}

/// Runs one batch against a ledger.
pub struct Submitter<C: ?Sized> {
    client: Arc<C>,
    accounts: AccountPool,
    workload: Workload,
    config: BatchConfig,
    nonces: Option<Arc<NonceStore>>,
}

impl<C: LedgerClient + ?Sized + 'static> Submitter<C> {
    pub fn new(
        client: Arc<C>,
        accounts: AccountPool,
        workload: Workload,
        config: BatchConfig,
    ) -> Self {
        Self {
            client,
            accounts,
            workload,
            config,
            nonces: None,
        }
    }

    /// Shares nonce state with other users of the same accounts. The store
    /// must track every account of the pool.
    pub fn with_nonce_store(mut self, nonces: Arc<NonceStore>) -> Self {
        self.nonces = Some(nonces);
        self
    }

    /// Plans, dispatches and confirms the batch.
    ///
    /// Only unmet preconditions are errors. Failed operations are counted in
    /// the returned summary.
    #[tracing::instrument(skip(self))]
    pub async fn run(self, batch_id: u64) -> Result<BatchSummary, BatchError> {
        let mut summary = BatchSummary::new(batch_id, self.config.batch_size.get());
        let preparation_started = Instant::now();

        let accounts = match self.config.balance_check {
            Some(check) => {
                eligible_accounts(
                    self.client.as_ref(),
                    self.accounts,
                    check,
                    self.config.concurrency,
                    self.config.retry,
                )
                .await?
            }
            None => self.accounts,
        };

        let attempted = self.config.retry.run(|| self.client.chain_id()).await;
        summary.retries += attempted.retries;
        let chain_id = attempted.result.map_err(BatchError::ChainId)?;

        let counts = OperationCounts::split(self.config.batch_size.get(), self.config.read_ratio);
        let mut rng = match self.config.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let operations = plan::operations(counts, &mut rng);
        let jobs = plan::jobs(&operations, self.config.bundle_size, accounts.len());

        tracing::info!(
            reads=%counts.reads,
            writes=%counts.writes,
            jobs=%jobs.len(),
            accounts=%accounts.len(),
            chain=%chain_id,
            "Planned batch"
        );

        let nonces = self
            .nonces
            .unwrap_or_else(|| Arc::new(NonceStore::new(accounts.addresses())));

        let dispatcher = Arc::new(Dispatcher {
            client: self.client,
            accounts,
            workload: self.workload,
            config: self.config,
            nonces,
            chain_id,
        });

        if dispatcher.config.nonce_strategy == NonceStrategy::Optimistic {
            summary.retries += dispatcher.seed_nonces(&jobs).await?;
        }
        summary.timings.preparation = preparation_started.elapsed();

        let semaphore = Arc::new(Semaphore::new(dispatcher.config.concurrency.get()));

        let submission_started = Instant::now();
        let submissions = dispatcher
            .clone()
            .dispatch(jobs, semaphore.clone(), &mut summary)
            .await;
        summary.timings.submission = submission_started.elapsed();

        tracing::info!(
            submitted=%summary.transactions_submitted,
            failed=%summary.transactions_failed,
            elapsed=?summary.timings.submission,
            "Submission finished, waiting for confirmations"
        );

        let confirmation_started = Instant::now();
        let confirmed = dispatcher
            .confirm(submissions, semaphore, &mut summary)
            .await;
        summary.timings.confirmation = confirmation_started.elapsed();

        if dispatcher.config.verify_balances {
            let verification_started = Instant::now();
            dispatcher.verify(&confirmed, &mut summary).await;
            summary.timings.verification = verification_started.elapsed();
        }

        summary.finish();
        tracing::info!(
            confirmed=%summary.transactions_confirmed,
            reverted=%summary.transactions_reverted,
            unconfirmed=%summary.transactions_unconfirmed,
            elapsed=?summary.elapsed(),
            "Batch finished"
        );

        Ok(summary)
    }
}

#[derive(Debug)]
struct QueuedJob {
    job: Job,
    requeues: u32,
    /// Set after a nonce conflict, so the local counter is not trusted.
    refetch_nonce: bool,
}

enum JobOutcome {
    Read {
        succeeded: bool,
        retries: u32,
    },
    Submitted {
        submission: Submission,
        stats: WriteStats,
    },
    Requeue {
        queued: QueuedJob,
        stats: WriteStats,
    },
    WriteFailed {
        updates: usize,
        stats: WriteStats,
    },
}

#[derive(Debug, Default)]
struct WriteStats {
    retries: u32,
    signing: Duration,
}

#[derive(Debug, thiserror::Error)]
enum WriteError {
    #[error("Failed to fetch nonce: {0}")]
    FetchNonce(RpcError),
    #[error("Node reported a nonce that does not fit in 64 bits")]
    NonceOutOfRange,
    #[error(transparent)]
    Nonce(#[from] NonceError),
    #[error("Failed to sign transaction: {0}")]
    Signing(#[from] SigningError),
    #[error("Submission failed: {0}")]
    Submit(RpcError),
}

impl WriteError {
    fn is_nonce_conflict(&self) -> bool {
        matches!(self, WriteError::Submit(e) if e.kind() == ErrorKind::NonceConflict)
    }
}

struct Dispatcher<C: ?Sized> {
    client: Arc<C>,
    accounts: AccountPool,
    workload: Workload,
    config: BatchConfig,
    nonces: Arc<NonceStore>,
    chain_id: ChainId,
}

impl<C: LedgerClient + ?Sized + 'static> Dispatcher<C> {
    /// Fetches the nonce of every account which has writes to send. Accounts
    /// whose nonce cannot be fetched now are fetched again on first use.
    async fn seed_nonces(&self, jobs: &[Job]) -> Result<u32, NonceError> {
        let mut writers = jobs
            .iter()
            .filter(|job| job.is_write())
            .map(|job| job.account)
            .collect::<Vec<_>>();
        writers.sort_unstable();
        writers.dedup();

        let fetched = stream::iter(writers)
            .map(|index| {
                let address = self.accounts.get(index).address;
                async move {
                    let attempted = self.config.retry.run(|| self.client.nonce(address)).await;
                    (address, attempted)
                }
            })
            .buffer_unordered(self.config.concurrency.get())
            .collect::<Vec<_>>()
            .await;

        let mut retries = 0;
        for (address, attempted) in fetched {
            retries += attempted.retries;
            match attempted.result.map(|nonce| nonce.to_u64()) {
                Ok(Some(nonce)) => self.nonces.seed(address, nonce)?,
                Ok(None) => tracing::warn!(%address, "Nonce does not fit in 64 bits"),
                Err(error) => tracing::warn!(%address, %error, "Failed to prefetch nonce"),
            }
        }

        Ok(retries)
    }

    /// Runs every job, at most as many at a time as the semaphore has permits.
    /// Writes failing on a nonce conflict go to the back of the queue.
    async fn dispatch(
        self: Arc<Self>,
        jobs: Vec<Job>,
        semaphore: Arc<Semaphore>,
        summary: &mut BatchSummary,
    ) -> Vec<Submission> {
        let mut queue = jobs
            .into_iter()
            .map(|job| QueuedJob {
                job,
                requeues: 0,
                refetch_nonce: false,
            })
            .collect::<VecDeque<_>>();
        let mut tasks = JoinSet::new();
        let mut submissions = Vec::new();

        loop {
            if let Some(queued) = queue.pop_front() {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    tracing::error!("Concurrency limiter closed, abandoning remaining jobs");
                    break;
                };
                let this = self.clone();
                tasks.spawn(async move {
                    let outcome = this.run_job(queued).await;
                    drop(permit);
                    outcome
                });

                while let Some(joined) = tasks.try_join_next() {
                    record(joined, summary, &mut queue, &mut submissions);
                }
                continue;
            }

            match tasks.join_next().await {
                Some(joined) => record(joined, summary, &mut queue, &mut submissions),
                None => break,
            }
        }

        submissions
    }

    async fn run_job(&self, queued: QueuedJob) -> JobOutcome {
        let updates = match &queued.job.kind {
            JobKind::Read => return self.read(&queued.job).await,
            JobKind::Write { updates } => updates,
        };

        let mut stats = WriteStats::default();
        let account = self.accounts.get(queued.job.account);

        match self
            .write(account, updates, queued.refetch_nonce, &mut stats)
            .await
        {
            Ok((nonce, transaction_hash)) => {
                tracing::debug!(job=%queued.job.id, account=%account.address, %nonce, hash=%transaction_hash, "Write accepted");
                JobOutcome::Submitted {
                    submission: Submission {
                        job_id: queued.job.id,
                        account: account.address,
                        nonce,
                        transaction_hash,
                        updates: updates.len(),
                        last_update: updates.last().copied().unwrap_or_default(),
                    },
                    stats,
                }
            }
            Err(error) if error.is_nonce_conflict() && queued.requeues < self.config.max_requeues => {
                tracing::debug!(job=%queued.job.id, account=%account.address, %error, requeues=%queued.requeues, "Nonce conflict, requeueing");
                JobOutcome::Requeue {
                    queued: QueuedJob {
                        requeues: queued.requeues + 1,
                        refetch_nonce: true,
                        ..queued
                    },
                    stats,
                }
            }
            Err(error) => {
                tracing::warn!(job=%queued.job.id, account=%account.address, %error, "Write failed");
                JobOutcome::WriteFailed {
                    updates: updates.len(),
                    stats,
                }
            }
        }
    }

    async fn read(&self, job: &Job) -> JobOutcome {
        let account = self.accounts.get(job.account).address;
        let attempted = self
            .config
            .retry
            .run(|| self.client.call(self.workload.read_call(account)))
            .await;

        if let Err(error) = &attempted.result {
            tracing::warn!(job=%job.id, %account, %error, kind=%error.kind(), "Read failed");
        }

        JobOutcome::Read {
            succeeded: attempted.result.is_ok(),
            retries: attempted.retries,
        }
    }

    /// Reserves a nonce and submits the signed bundle. The nonce is handed
    /// back to the store unless the node accepted the transaction.
    async fn write(
        &self,
        account: &Account,
        updates: &[usize],
        refetch_nonce: bool,
        stats: &mut WriteStats,
    ) -> Result<(u64, TransactionHash), WriteError> {
        let nonce = self.reserve_nonce(account.address, refetch_nonce, stats).await?;

        match self.sign_and_submit(account, updates, nonce, stats).await {
            Ok(hash) => Ok((nonce, hash)),
            Err(error) => {
                if let Err(e) = self.nonces.release(account.address, nonce) {
                    tracing::warn!(error=%e, "Failed to release nonce");
                }
                Err(error)
            }
        }
    }

    async fn reserve_nonce(
        &self,
        address: ContractAddress,
        refetch: bool,
        stats: &mut WriteStats,
    ) -> Result<u64, WriteError> {
        if !refetch && self.config.nonce_strategy == NonceStrategy::Optimistic {
            match self.nonces.allocate(address, None) {
                Err(NonceError::NotSeeded(_)) => {}
                result => return result.map_err(Into::into),
            }
        }

        let attempted = self.config.retry.run(|| self.client.nonce(address)).await;
        stats.retries += attempted.retries;
        let node_nonce = attempted
            .result
            .map_err(WriteError::FetchNonce)?
            .to_u64()
            .ok_or(WriteError::NonceOutOfRange)?;

        self.nonces.seed(address, node_nonce)?;
        Ok(self.nonces.allocate(address, Some(node_nonce))?)
    }

    async fn sign_and_submit(
        &self,
        account: &Account,
        updates: &[usize],
        nonce: u64,
        stats: &mut WriteStats,
    ) -> Result<TransactionHash, WriteError> {
        let calls = updates
            .iter()
            .map(|&update| self.workload.write_call(update))
            .collect::<Vec<_>>();
        let mut transaction = InvokeTransactionV3::from_calls(
            account.address,
            &calls,
            TransactionNonce::from_u64(nonce),
            self.config.resource_bounds,
        );

        let signing_started = Instant::now();
        let hash = transaction.sign(self.chain_id, &account.key)?;
        stats.signing += signing_started.elapsed();

        let attempted = self
            .config
            .retry
            .run(|| self.client.add_invoke_transaction(transaction.clone()))
            .await;
        stats.retries += attempted.retries;

        match attempted.result {
            Ok(hash) => Ok(hash),
            // An earlier attempt reached the node even though its reply got lost.
            Err(RpcError::Starknet {
                code: DUPLICATE_TX, ..
            }) if attempted.retries > 0 => Ok(hash),
            Err(e) => Err(WriteError::Submit(e)),
        }
    }

    /// Waits for every submission, sharing the dispatch concurrency limit.
    async fn confirm(
        &self,
        submissions: Vec<Submission>,
        semaphore: Arc<Semaphore>,
        summary: &mut BatchSummary,
    ) -> Vec<(Submission, Confirmation)> {
        let confirmer = Arc::new(Confirmer::new(
            self.client.clone(),
            self.config.confirmation,
        ));
        let mut tasks = JoinSet::new();

        for submission in submissions {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                tracing::error!("Concurrency limiter closed, abandoning confirmations");
                break;
            };
            let confirmer = confirmer.clone();
            tasks.spawn(async move {
                let confirmation = confirmer.confirm(submission.transaction_hash).await;
                drop(permit);
                (submission, confirmation)
            });
        }

        let mut confirmed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Some((submission, confirmation)) = unwrap_join(joined) {
                summary.record_confirmation(submission.updates, &confirmation);
                confirmed.push((submission, confirmation));
            }
        }
        confirmed
    }

    /// Reads back the balance of every account whose final value is known
    /// and compares it against that value.
    async fn verify(&self, confirmed: &[(Submission, Confirmation)], summary: &mut BatchSummary) {
        let results = stream::iter(expected_balances(confirmed))
            .map(|(account, expected)| async move {
                let attempted = self
                    .config
                    .retry
                    .run(|| self.client.call(self.workload.read_call(account)))
                    .await;
                let actual = match attempted.result {
                    Ok(felts) => U256::from_felts(&felts).map(U256::saturating_u128),
                    Err(error) => {
                        tracing::warn!(%account, %error, "Failed to read back balance");
                        None
                    }
                };
                (
                    BalanceVerification {
                        account,
                        expected,
                        actual,
                    },
                    attempted.retries,
                )
            })
            .buffered(self.config.concurrency.get())
            .collect::<Vec<_>>()
            .await;

        for (verification, retries) in results {
            summary.retries += retries;
            if verification.actual.is_some() && !verification.matches() {
                tracing::warn!(
                    account=%verification.account,
                    expected=%verification.expected,
                    actual=?verification.actual,
                    "Stored balance does not match the last write"
                );
            }
            summary.record_verification(verification);
        }
    }
}

/// The balance each account holds once its accepted writes executed, which
/// is the value of its highest accepted nonce. Accounts with a write of
/// unknown outcome are left out.
fn expected_balances(confirmed: &[(Submission, Confirmation)]) -> BTreeMap<ContractAddress, u128> {
    let mut last = BTreeMap::<ContractAddress, (u64, usize)>::new();
    let mut unknown = BTreeSet::new();

    for (submission, confirmation) in confirmed {
        match confirmation {
            Confirmation::Accepted(_) => {
                let entry = last
                    .entry(submission.account)
                    .or_insert((submission.nonce, submission.last_update));
                if submission.nonce > entry.0 {
                    *entry = (submission.nonce, submission.last_update);
                }
            }
            Confirmation::Reverted(_) => {}
            Confirmation::TimedOut | Confirmation::Failed(_) => {
                unknown.insert(submission.account);
            }
        }
    }

    last.into_iter()
        .filter(|(account, _)| !unknown.contains(account))
        .map(|(account, (_, update))| (account, Workload::stored_value(update)))
        .collect()
}

fn record(
    joined: Result<JobOutcome, JoinError>,
    summary: &mut BatchSummary,
    queue: &mut VecDeque<QueuedJob>,
    submissions: &mut Vec<Submission>,
) {
    let Some(outcome) = unwrap_join(joined) else {
        return;
    };

    match outcome {
        JobOutcome::Read { succeeded, retries } => {
            summary.record_read(succeeded);
            summary.retries += retries;
        }
        JobOutcome::Submitted { submission, stats } => {
            summary.record_submission(submission.updates);
            summary.retries += stats.retries;
            summary.timings.signing += stats.signing;
            submissions.push(submission);
        }
        JobOutcome::Requeue { queued, stats } => {
            summary.requeues += 1;
            summary.retries += stats.retries;
            summary.timings.signing += stats.signing;
            queue.push_back(queued);
        }
        JobOutcome::WriteFailed { updates, stats } => {
            summary.record_write_failure(updates);
            summary.retries += stats.retries;
            summary.timings.signing += stats.signing;
        }
    }
}

/// Jobs are never aborted, so a join error means the job panicked.
fn unwrap_join<T>(joined: Result<T, JoinError>) -> Option<T> {
    match joined {
        Ok(value) => Some(value),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            tracing::error!(error=%e, "Job was cancelled");
            None
        }
    }
}
