//! Concurrent submission and confirmation of benchmark batches against a
//! Starknet ledger.
//!
//! A batch is split into reads and writes, writes are bundled into invoke
//! transactions, and every job is dispatched under a shared concurrency
//! limit. See [Submitter::run].
pub mod accounts;
pub mod config;
pub mod confirm;
pub mod error;
pub mod nonce;
pub mod oneshot;
pub mod plan;
pub mod submitter;
pub mod summary;
pub mod workload;

pub use accounts::{Account, AccountPool, BalanceCheck, NoEligibleAccounts};
pub use config::{BatchConfig, ConfirmationSettings, RetryPolicy};
pub use confirm::{Confirmation, Confirmer};
pub use error::BatchError;
pub use nonce::{NonceStore, NonceStrategy};
pub use oneshot::{invoke_and_wait, InvokeError, InvokeSettings};
pub use plan::ReadRatio;
pub use submitter::{Submission, Submitter};
pub use summary::{BalanceVerification, BatchSummary};
pub use workload::{BatchRecord, DecodeError, Workload};
