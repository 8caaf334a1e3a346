//! Calls against the balance-store contract.
use batchbench_common::{
    felt_to_short_string, felt_to_u128, felt_to_u64, short_string_to_felt, Call, ContractAddress,
    EntryPoint, Felt, U256,
};

/// The read and write entry points a batch exercises.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workload {
    pub contract: ContractAddress,
    pub write_selector: EntryPoint,
    pub read_selector: EntryPoint,
}

impl Workload {
    /// `update_balance(u256)` writes and `get_balance(address)` reads.
    pub fn balance_updater(contract: ContractAddress) -> Self {
        Self {
            contract,
            write_selector: EntryPoint::hashed(b"update_balance"),
            read_selector: EntryPoint::hashed(b"get_balance"),
        }
    }

    /// The `update`-th write of a batch stores [Workload::stored_value].
    pub fn write_call(&self, update: usize) -> Call {
        let value = U256::from_u128(Self::stored_value(update));
        Call::new(self.contract, self.write_selector, value.to_calldata().to_vec())
    }

    /// `update + 1`, so that a stored zero always means "never written".
    pub fn stored_value(update: usize) -> u128 {
        update as u128 + 1
    }

    pub fn read_call(&self, account: ContractAddress) -> Call {
        Call::new(self.contract, self.read_selector, vec![account.0])
    }
}

/// Summary of a finished batch as stored on the ledger by `set_batch_info`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchRecord {
    /// A human readable batch type, encoded as a short string.
    pub batch_type: Felt,
    pub batch_id: u64,
    pub num_items: u64,
    pub cost: u128,
    pub elapsed_seconds: u64,
}

impl BatchRecord {
    pub const BALANCE_UPDATE: &'static str = "Balance Update";

    pub fn balance_update(batch_id: u64, num_items: u64, cost: u128, elapsed_seconds: u64) -> Self {
        Self {
            batch_type: short_string_to_felt(Self::BALANCE_UPDATE),
            batch_id,
            num_items,
            cost,
            elapsed_seconds,
        }
    }

    /// The batch type as text, if it is a printable short string.
    pub fn type_name(&self) -> Option<String> {
        felt_to_short_string(&self.batch_type)
    }

    /// `get_all_batch_infos()`, answered by [BatchRecord::decode_all].
    pub fn list_call(contract: ContractAddress) -> Call {
        Call::new(contract, EntryPoint::hashed(b"get_all_batch_infos"), vec![])
    }

    /// Decodes a serialized array of records: its length followed by five
    /// felts per record, in the order [BatchRecord::call] writes them.
    pub fn decode_all(felts: &[Felt]) -> Result<Vec<Self>, DecodeError> {
        let (len, mut rest) = felts.split_first().ok_or(DecodeError::Empty)?;
        let len = felt_to_u64(len).ok_or(DecodeError::OutOfRange { index: 0 })? as usize;
        if len.checked_mul(5) != Some(rest.len()) {
            return Err(DecodeError::Length {
                expected: len.saturating_mul(5).saturating_add(1),
                actual: felts.len(),
            });
        }

        let mut records = Vec::with_capacity(len);
        let mut index = 1;
        while let [batch_type, batch_id, num_items, cost, elapsed_seconds, tail @ ..] = rest {
            let u64_at = |felt: &Felt, offset: usize| {
                felt_to_u64(felt).ok_or(DecodeError::OutOfRange {
                    index: index + offset,
                })
            };
            records.push(Self {
                batch_type: *batch_type,
                batch_id: u64_at(batch_id, 1)?,
                num_items: u64_at(num_items, 2)?,
                cost: felt_to_u128(cost).ok_or(DecodeError::OutOfRange { index: index + 3 })?,
                elapsed_seconds: u64_at(elapsed_seconds, 4)?,
            });
            index += 5;
            rest = tail;
        }

        Ok(records)
    }

    pub fn call(&self, contract: ContractAddress) -> Call {
        Call::new(
            contract,
            EntryPoint::hashed(b"set_batch_info"),
            vec![
                self.batch_type,
                Felt::from(self.batch_id),
                Felt::from(self.num_items),
                Felt::from(self.cost),
                Felt::from(self.elapsed_seconds),
            ],
        )
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty reply")]
    Empty,
    #[error("Expected {expected} felts, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("Felt at index {index} is out of range")]
    OutOfRange { index: usize },
}

/// `balance_of(account)` on an ERC20 fee token.
pub fn balance_of_call(token: ContractAddress, account: ContractAddress) -> Call {
    Call::new(token, EntryPoint::hashed(b"balance_of"), vec![account.0])
}

/// `transfer(recipient, u256)` on an ERC20 fee token.
pub fn transfer_call(token: ContractAddress, recipient: ContractAddress, amount: u128) -> Call {
    let [low, high] = U256::from_u128(amount).to_calldata();
    Call::new(
        token,
        EntryPoint::hashed(b"transfer"),
        vec![recipient.0, low, high],
    )
}
