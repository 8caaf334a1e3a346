//! Per-account nonce bookkeeping for concurrent writes.
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use batchbench_common::ContractAddress;

/// How write jobs obtain their nonce.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum NonceStrategy {
    /// Fetch once per account, then count locally. Conflicts are recovered by
    /// refetching and requeueing the job.
    #[default]
    Optimistic,
    /// Fetch from the node before every write.
    Serialized,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown nonce strategy {0:?}, expected optimistic or serialized")]
pub struct ParseNonceStrategyError(String);

impl std::str::FromStr for NonceStrategy {
    type Err = ParseNonceStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "optimistic" => Ok(Self::Optimistic),
            "serialized" => Ok(Self::Serialized),
            other => Err(ParseNonceStrategyError(other.to_owned())),
        }
    }
}

impl std::fmt::Display for NonceStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Optimistic => "optimistic",
            Self::Serialized => "serialized",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NonceError {
    #[error("Account {0} is not tracked by the nonce store")]
    UnknownAccount(ContractAddress),
    #[error("Nonce of account {0} was never fetched")]
    NotSeeded(ContractAddress),
}

#[derive(Debug, Default)]
struct AccountNonces {
    /// Next nonce to try when no floor is given.
    next: Option<u64>,
    /// Nonces held by writes that were submitted or are about to be.
    reserved: BTreeSet<u64>,
}

/// Hands out nonces such that no two in-flight writes of an account share one.
///
/// Every account has its own lock and no lock is held across an `.await`.
#[derive(Debug)]
pub struct NonceStore {
    accounts: HashMap<ContractAddress, Mutex<AccountNonces>>,
}

impl NonceStore {
    pub fn new(accounts: impl IntoIterator<Item = ContractAddress>) -> Self {
        Self {
            accounts: accounts
                .into_iter()
                .map(|address| (address, Mutex::default()))
                .collect(),
        }
    }

    fn with_account<T>(
        &self,
        account: ContractAddress,
        f: impl FnOnce(&mut AccountNonces) -> T,
    ) -> Result<T, NonceError> {
        let lock = self
            .accounts
            .get(&account)
            .ok_or(NonceError::UnknownAccount(account))?;
        // A poisoned lock only means another job panicked mid-update; the
        // sets are still consistent.
        let mut state = lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(f(&mut state))
    }

    /// Records the nonce the node reported, moving the local counter forward
    /// if the node is ahead.
    pub fn seed(&self, account: ContractAddress, nonce: u64) -> Result<(), NonceError> {
        self.with_account(account, |state| {
            state.next = Some(state.next.map_or(nonce, |next| next.max(nonce)));
        })
    }

    /// Reserves the lowest free nonce, starting from `floor` if given and from
    /// the local counter otherwise.
    pub fn allocate(&self, account: ContractAddress, floor: Option<u64>) -> Result<u64, NonceError> {
        self.with_account(account, |state| {
            let mut nonce = match (floor, state.next) {
                (Some(floor), _) => floor,
                (None, Some(next)) => next,
                (None, None) => return Err(NonceError::NotSeeded(account)),
            };
            while state.reserved.contains(&nonce) {
                nonce += 1;
            }

            state.reserved.insert(nonce);
            state.next = Some(state.next.map_or(nonce + 1, |next| next.max(nonce + 1)));
            Ok(nonce)
        })?
    }

    /// Returns a nonce whose write was rejected, making it the next candidate
    /// so no gap is left behind.
    pub fn release(&self, account: ContractAddress, nonce: u64) -> Result<(), NonceError> {
        self.with_account(account, |state| {
            if state.reserved.remove(&nonce) {
                state.next = Some(state.next.map_or(nonce, |next| next.min(nonce)));
            }
        })
    }

    pub fn is_reserved(&self, account: ContractAddress, nonce: u64) -> bool {
        self.with_account(account, |state| state.reserved.contains(&nonce))
            .unwrap_or(false)
    }

    pub fn reserved_count(&self, account: ContractAddress) -> usize {
        self.with_account(account, |state| state.reserved.len())
            .unwrap_or(0)
    }
}
