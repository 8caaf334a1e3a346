//! Aggregate results of a batch.
use std::time::Duration;

use batchbench_common::ContractAddress;
use serde::{Serialize, Serializer};

use crate::confirm::Confirmation;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PhaseTimings {
    /// Balance checks, chain id and nonce prefetching.
    #[serde(serialize_with = "as_seconds")]
    pub preparation: Duration,
    /// Summed over all writes, so it can exceed the submission phase.
    #[serde(serialize_with = "as_seconds")]
    pub signing: Duration,
    /// From the first dispatched job until every job finished.
    #[serde(serialize_with = "as_seconds")]
    pub submission: Duration,
    #[serde(serialize_with = "as_seconds")]
    pub confirmation: Duration,
    /// Reading back written balances, zero unless enabled.
    #[serde(serialize_with = "as_seconds")]
    pub verification: Duration,
}

fn as_seconds<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Stored balance of one account after the batch, against the value its
/// last executed write stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BalanceVerification {
    pub account: ContractAddress,
    pub expected: u128,
    /// `None` if the balance could not be read.
    pub actual: Option<u128>,
}

impl BalanceVerification {
    pub fn matches(&self) -> bool {
        self.actual == Some(self.expected)
    }
}

/// Successful operations per second.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Throughput {
    /// Successful reads and accepted updates over the submission phase.
    pub excluding_confirmation: f64,
    /// Successful reads and confirmed updates over submission and
    /// confirmation.
    pub including_confirmation: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub batch_id: u64,
    pub batch_size: usize,
    pub reads_succeeded: usize,
    pub reads_failed: usize,
    pub transactions_submitted: usize,
    pub transactions_confirmed: usize,
    pub transactions_reverted: usize,
    /// Accepted by the node but without a terminal receipt.
    pub transactions_unconfirmed: usize,
    /// Never accepted by the node.
    pub transactions_failed: usize,
    pub updates_submitted: usize,
    pub updates_confirmed: usize,
    pub updates_failed: usize,
    pub requeues: u32,
    pub retries: u32,
    /// Sum of actual fees of confirmed and reverted transactions.
    pub total_fee: u128,
    pub balances_verified: usize,
    pub balances_mismatched: usize,
    pub balances_unreadable: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub verifications: Vec<BalanceVerification>,
    pub timings: PhaseTimings,
    pub throughput: Throughput,
}

impl BatchSummary {
    pub fn new(batch_id: u64, batch_size: usize) -> Self {
        Self {
            batch_id,
            batch_size,
            ..Default::default()
        }
    }

    pub(crate) fn record_read(&mut self, succeeded: bool) {
        if succeeded {
            self.reads_succeeded += 1;
        } else {
            self.reads_failed += 1;
        }
    }

    pub(crate) fn record_submission(&mut self, updates: usize) {
        self.transactions_submitted += 1;
        self.updates_submitted += updates;
    }

    pub(crate) fn record_write_failure(&mut self, updates: usize) {
        self.transactions_failed += 1;
        self.updates_failed += updates;
    }

    pub(crate) fn record_confirmation(&mut self, updates: usize, confirmation: &Confirmation) {
        match confirmation {
            Confirmation::Accepted(receipt) => {
                self.transactions_confirmed += 1;
                self.updates_confirmed += updates;
                self.total_fee = self.total_fee.saturating_add(receipt.fee());
            }
            Confirmation::Reverted(receipt) => {
                self.transactions_reverted += 1;
                self.updates_failed += updates;
                self.total_fee = self.total_fee.saturating_add(receipt.fee());
            }
            Confirmation::TimedOut | Confirmation::Failed(_) => {
                self.transactions_unconfirmed += 1;
                self.updates_failed += updates;
            }
        }
    }

    pub(crate) fn record_verification(&mut self, verification: BalanceVerification) {
        match verification.actual {
            None => self.balances_unreadable += 1,
            Some(_) if verification.matches() => self.balances_verified += 1,
            Some(_) => self.balances_mismatched += 1,
        }
        self.verifications.push(verification);
    }

    /// Derives throughput from the counts and timings.
    pub(crate) fn finish(&mut self) {
        let submitted = (self.reads_succeeded + self.updates_submitted) as f64;
        let confirmed = (self.reads_succeeded + self.updates_confirmed) as f64;

        self.throughput = Throughput {
            excluding_confirmation: per_second(submitted, self.timings.submission),
            including_confirmation: per_second(
                confirmed,
                self.timings.submission + self.timings.confirmation,
            ),
        };
    }

    /// Wall time of submission and confirmation.
    pub fn elapsed(&self) -> Duration {
        self.timings.submission + self.timings.confirmation
    }
}

fn per_second(count: f64, duration: Duration) -> f64 {
    let seconds = duration.as_secs_f64();
    if seconds > 0.0 {
        count / seconds
    } else {
        0.0
    }
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Batch {} ({} operations)", self.batch_id, self.batch_size)?;
        writeln!(
            f,
            "  reads:        {} succeeded, {} failed",
            self.reads_succeeded, self.reads_failed
        )?;
        writeln!(
            f,
            "  transactions: {} submitted, {} confirmed, {} reverted, {} unconfirmed, {} failed",
            self.transactions_submitted,
            self.transactions_confirmed,
            self.transactions_reverted,
            self.transactions_unconfirmed,
            self.transactions_failed
        )?;
        writeln!(
            f,
            "  updates:      {} submitted, {} confirmed, {} failed",
            self.updates_submitted, self.updates_confirmed, self.updates_failed
        )?;
        writeln!(
            f,
            "  requeues:     {}, retries: {}",
            self.requeues, self.retries
        )?;
        writeln!(f, "  total fee:    {} FRI", self.total_fee)?;
        if !self.verifications.is_empty() {
            writeln!(
                f,
                "  balances:     {} verified, {} mismatched, {} unreadable",
                self.balances_verified, self.balances_mismatched, self.balances_unreadable
            )?;
        }
        writeln!(
            f,
            "  timings:      preparation {:.3}s, signing {:.3}s, submission {:.3}s, confirmation {:.3}s",
            self.timings.preparation.as_secs_f64(),
            self.timings.signing.as_secs_f64(),
            self.timings.submission.as_secs_f64(),
            self.timings.confirmation.as_secs_f64()
        )?;
        write!(
            f,
            "  throughput:   {:.2} ops/s excluding confirmation, {:.2} ops/s including",
            self.throughput.excluding_confirmation, self.throughput.including_confirmation
        )
    }
}
