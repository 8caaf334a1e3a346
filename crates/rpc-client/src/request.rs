//! JSON-RPC request envelopes and parameter types.
use batchbench_common::transaction::DataAvailabilityMode;
use batchbench_common::{
    Call, ContractAddress, EntryPoint, Felt, InvokeTransactionV3, ResourceBound,
    TransactionHash,
};
use serde::{Serialize, Serializer};

use crate::BlockTag;

#[derive(Debug, Serialize)]
pub(crate) struct RpcRequest<'a, P> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: P,
}

impl<'a, P> RpcRequest<'a, P> {
    pub fn new(id: u64, method: &'a str, params: P) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct GetNonce {
    pub block_id: BlockTag,
    pub contract_address: ContractAddress,
}

#[derive(Debug, Serialize)]
pub(crate) struct FunctionCall<'a> {
    pub contract_address: ContractAddress,
    pub entry_point_selector: EntryPoint,
    pub calldata: &'a [Felt],
}

impl<'a> From<&'a Call> for FunctionCall<'a> {
    fn from(call: &'a Call) -> Self {
        Self {
            contract_address: call.to,
            entry_point_selector: call.selector,
            calldata: &call.calldata,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CallParams<'a> {
    pub request: FunctionCall<'a>,
    pub block_id: BlockTag,
}

#[derive(Debug, Serialize)]
pub(crate) struct GetTransactionReceipt {
    pub transaction_hash: TransactionHash,
}

#[derive(Debug, Serialize)]
pub(crate) struct AddInvokeTransaction<'a> {
    pub invoke_transaction: BroadcastedInvokeV3<'a>,
}

/// The wire form of a signed [InvokeTransactionV3].
#[derive(Debug, Serialize)]
pub(crate) struct BroadcastedInvokeV3<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub version: &'static str,
    pub sender_address: ContractAddress,
    pub calldata: &'a [Felt],
    pub signature: &'a [Felt],
    pub nonce: Felt,
    pub resource_bounds: ResourceBoundsMapping,
    #[serde(serialize_with = "hex_u64")]
    pub tip: u64,
    pub paymaster_data: &'a [Felt],
    pub account_deployment_data: &'a [Felt],
    #[serde(serialize_with = "da_mode")]
    pub nonce_data_availability_mode: DataAvailabilityMode,
    #[serde(serialize_with = "da_mode")]
    pub fee_data_availability_mode: DataAvailabilityMode,
}

impl<'a> From<&'a InvokeTransactionV3> for BroadcastedInvokeV3<'a> {
    fn from(tx: &'a InvokeTransactionV3) -> Self {
        Self {
            kind: "INVOKE",
            version: "0x3",
            sender_address: tx.sender_address,
            calldata: &tx.calldata,
            signature: &tx.signature,
            nonce: tx.nonce.0,
            resource_bounds: ResourceBoundsMapping {
                l1_gas: tx.resource_bounds.l1_gas.into(),
                l2_gas: tx.resource_bounds.l2_gas.into(),
                l1_data_gas: tx.resource_bounds.l1_data_gas.map(Into::into),
            },
            tip: tx.tip,
            paymaster_data: &tx.paymaster_data,
            account_deployment_data: &tx.account_deployment_data,
            nonce_data_availability_mode: tx.nonce_data_availability_mode,
            fee_data_availability_mode: tx.fee_data_availability_mode,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ResourceBoundsMapping {
    pub l1_gas: WireResourceBound,
    pub l2_gas: WireResourceBound,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l1_data_gas: Option<WireResourceBound>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireResourceBound {
    #[serde(serialize_with = "hex_u64")]
    pub max_amount: u64,
    #[serde(serialize_with = "hex_u128")]
    pub max_price_per_unit: u128,
}

impl From<ResourceBound> for WireResourceBound {
    fn from(bound: ResourceBound) -> Self {
        Self {
            max_amount: bound.max_amount,
            max_price_per_unit: bound.max_price_per_unit,
        }
    }
}

fn hex_u64<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{value:#x}"))
}

fn hex_u128<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{value:#x}"))
}

fn da_mode<S: Serializer>(mode: &DataAvailabilityMode, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(match mode {
        DataAvailabilityMode::L1 => "L1",
        DataAvailabilityMode::L2 => "L2",
    })
}
