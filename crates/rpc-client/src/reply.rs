//! Reply types, deserialized from node responses.
use batchbench_common::{felt_to_u128, Felt, TransactionHash};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct RpcResponse<T> {
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AddInvokeTransactionResult {
    pub transaction_hash: TransactionHash,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Succeeded,
    Reverted,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalityStatus {
    Received,
    /// Starknet 0.14 replacement of the pending block.
    PreConfirmed,
    AcceptedOnL2,
    AcceptedOnL1,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub enum PriceUnit {
    #[serde(rename = "WEI")]
    Wei,
    #[serde(rename = "FRI")]
    Fri,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct FeePayment {
    pub amount: Felt,
    pub unit: PriceUnit,
}

/// The subset of a transaction receipt needed to account for a submission.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: TransactionHash,
    pub actual_fee: FeePayment,
    pub execution_status: ExecutionStatus,
    pub finality_status: FinalityStatus,
    #[serde(default)]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub revert_reason: Option<String>,
}

impl Receipt {
    /// Accepted receipts and reverted ones can no longer change outcome.
    pub fn is_terminal(&self) -> bool {
        self.execution_status == ExecutionStatus::Reverted
            || matches!(
                self.finality_status,
                FinalityStatus::AcceptedOnL2 | FinalityStatus::AcceptedOnL1
            )
    }

    pub fn is_reverted(&self) -> bool {
        self.execution_status == ExecutionStatus::Reverted
    }

    /// Fee amount, saturating if it somehow exceeds a `u128`.
    pub fn fee(&self) -> u128 {
        felt_to_u128(&self.actual_fee.amount).unwrap_or(u128::MAX)
    }
}
