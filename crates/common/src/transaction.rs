use std::str::FromStr;

use crate::signature::{Signature, SigningError, SigningKey};
use crate::{ChainId, ContractAddress, EntryPoint, Felt, TransactionHash, TransactionNonce};

/// A single contract call. An invoke transaction executes one or more of
/// these through the sender account's `__execute__`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub to: ContractAddress,
    pub selector: EntryPoint,
    pub calldata: Vec<Felt>,
}

impl Call {
    pub fn new(to: ContractAddress, selector: EntryPoint, calldata: Vec<Felt>) -> Self {
        Self {
            to,
            selector,
            calldata,
        }
    }
}

/// Encodes calls the way a Cairo 1 account's `__execute__` expects them:
/// `[num_calls, (to, selector, calldata_len, ..calldata)*]`.
pub fn encode_execute_calldata(calls: &[Call]) -> Vec<Felt> {
    let len = 1 + calls.iter().map(|c| 3 + c.calldata.len()).sum::<usize>();
    let mut out = Vec::with_capacity(len);
    out.push(Felt::from(calls.len() as u64));
    for call in calls {
        out.push(call.to.0);
        out.push(call.selector.0);
        out.push(Felt::from(call.calldata.len() as u64));
        out.extend_from_slice(&call.calldata);
    }
    out
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceBound {
    pub max_amount: u64,
    pub max_price_per_unit: u128,
}

impl ResourceBound {
    pub const fn new(max_amount: u64, max_price_per_unit: u128) -> Self {
        Self {
            max_amount,
            max_price_per_unit,
        }
    }

    /// The most this bound allows to be charged.
    pub fn max_fee(&self) -> u128 {
        (self.max_amount as u128).saturating_mul(self.max_price_per_unit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid resource bound {input:?}, expected AMOUNT@PRICE")]
pub struct ParseResourceBoundError {
    pub input: String,
}

/// Parses `AMOUNT@PRICE`, each side either decimal or `0x` prefixed hex.
impl FromStr for ResourceBound {
    type Err = ParseResourceBoundError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseResourceBoundError {
            input: s.to_owned(),
        };

        let (amount, price) = s.split_once('@').ok_or_else(err)?;
        let max_amount = parse_number::<u64>(amount.trim()).ok_or_else(err)?;
        let max_price_per_unit = parse_number::<u128>(price.trim()).ok_or_else(err)?;

        Ok(Self {
            max_amount,
            max_price_per_unit,
        })
    }
}

fn parse_number<T: TryFrom<u128>>(s: &str) -> Option<T> {
    let value = match s.strip_prefix("0x") {
        Some(hex) => u128::from_str_radix(hex, 16).ok()?,
        None => s.replace('_', "").parse::<u128>().ok()?,
    };
    T::try_from(value).ok()
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ResourceBounds {
    pub l1_gas: ResourceBound,
    pub l2_gas: ResourceBound,
    /// Only part of the transaction hash when present. Nodes from 0.13.3
    /// onwards expect it to be set.
    pub l1_data_gas: Option<ResourceBound>,
}

impl Default for ResourceBounds {
    /// Generous bounds that clear Sepolia's current gas prices.
    fn default() -> Self {
        Self {
            l1_gas: ResourceBound::new(10_000, 30_000_000_000_000),
            l2_gas: ResourceBound::new(800_000, 30_000_000_000_000),
            l1_data_gas: Some(ResourceBound::new(200, 30_000_000_000_000)),
        }
    }
}

impl ResourceBounds {
    pub fn max_fee(&self) -> u128 {
        self.l1_gas
            .max_fee()
            .saturating_add(self.l2_gas.max_fee())
            .saturating_add(self.l1_data_gas.map(|b| b.max_fee()).unwrap_or_default())
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DataAvailabilityMode {
    #[default]
    L1,
    L2,
}

impl From<DataAvailabilityMode> for u64 {
    fn from(value: DataAvailabilityMode) -> Self {
        match value {
            DataAvailabilityMode::L1 => 0,
            DataAvailabilityMode::L2 => 1,
        }
    }
}

/// An invoke transaction of version 3, the only kind this tool submits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InvokeTransactionV3 {
    pub sender_address: ContractAddress,
    pub calldata: Vec<Felt>,
    pub nonce: TransactionNonce,
    pub resource_bounds: ResourceBounds,
    pub tip: u64,
    pub paymaster_data: Vec<Felt>,
    pub account_deployment_data: Vec<Felt>,
    pub nonce_data_availability_mode: DataAvailabilityMode,
    pub fee_data_availability_mode: DataAvailabilityMode,
    pub signature: Vec<Felt>,
}

impl InvokeTransactionV3 {
    /// An unsigned transaction executing `calls` from `sender_address`.
    pub fn from_calls(
        sender_address: ContractAddress,
        calls: &[Call],
        nonce: TransactionNonce,
        resource_bounds: ResourceBounds,
    ) -> Self {
        Self {
            sender_address,
            calldata: encode_execute_calldata(calls),
            nonce,
            resource_bounds,
            ..Default::default()
        }
    }

    pub fn calculate_hash(&self, chain_id: ChainId) -> TransactionHash {
        V3Hasher {
            prefix: Felt::from_bytes_be(&short_string_bytes(b"invoke")),
            sender_address: self.sender_address,
            nonce: self.nonce,
            data_hashes: &[
                poseidon(&self.account_deployment_data),
                poseidon(&self.calldata),
            ],
            tip: self.tip,
            paymaster_data: &self.paymaster_data,
            nonce_data_availability_mode: self.nonce_data_availability_mode,
            fee_data_availability_mode: self.fee_data_availability_mode,
            resource_bounds: self.resource_bounds,
        }
        .hash(chain_id)
    }

    /// Hashes and signs the transaction, storing the signature in place.
    pub fn sign(
        &mut self,
        chain_id: ChainId,
        key: &SigningKey,
    ) -> Result<TransactionHash, SigningError> {
        let hash = self.calculate_hash(chain_id);
        let Signature { r, s } = key.sign(hash.0)?;
        self.signature = vec![r, s];
        Ok(hash)
    }
}

const VERSION_THREE: u64 = 3;

struct V3Hasher<'a> {
    pub prefix: Felt,
    pub sender_address: ContractAddress,
    pub nonce: TransactionNonce,
    pub data_hashes: &'a [Felt],
    pub tip: u64,
    pub paymaster_data: &'a [Felt],
    pub nonce_data_availability_mode: DataAvailabilityMode,
    pub fee_data_availability_mode: DataAvailabilityMode,
    pub resource_bounds: ResourceBounds,
}

impl V3Hasher<'_> {
    fn hash(self, chain_id: ChainId) -> TransactionHash {
        let mut elements = vec![
            self.prefix,
            Felt::from(VERSION_THREE),
            self.sender_address.0,
            self.hash_fee_fields(),
            poseidon(self.paymaster_data),
            chain_id.0,
            self.nonce.0,
            Felt::from(self.pack_data_availability()),
        ];
        elements.extend_from_slice(self.data_hashes);

        TransactionHash(poseidon(&elements))
    }

    fn pack_data_availability(&self) -> u64 {
        let nonce = u64::from(self.nonce_data_availability_mode) << 32;
        let fee = u64::from(self.fee_data_availability_mode);

        nonce + fee
    }

    fn hash_fee_fields(&self) -> Felt {
        let mut fields = vec![
            Felt::from(self.tip),
            Self::pack_gas_bound(b"L1_GAS", &self.resource_bounds.l1_gas),
            Self::pack_gas_bound(b"L2_GAS", &self.resource_bounds.l2_gas),
        ];

        if let Some(l1_data_gas) = self.resource_bounds.l1_data_gas {
            fields.push(Self::pack_gas_bound(b"L1_DATA", &l1_data_gas));
        }

        poseidon(&fields)
    }

    fn pack_gas_bound(name: &[u8], bound: &ResourceBound) -> Felt {
        let mut buffer: [u8; 32] = Default::default();
        let (remainder, max_price) = buffer.split_at_mut(128 / 8);
        let (gas_kind, max_amount) = remainder.split_at_mut(64 / 8);

        let padding = gas_kind.len() - name.len();
        gas_kind[padding..].copy_from_slice(name);
        max_amount.copy_from_slice(&bound.max_amount.to_be_bytes());
        max_price.copy_from_slice(&bound.max_price_per_unit.to_be_bytes());

        // The leading byte is ascii, so the value is always below the field modulus.
        Felt::from_bytes_be(&buffer)
    }
}

fn poseidon(elements: &[Felt]) -> Felt {
    starknet_crypto::poseidon_hash_many(elements)
}

fn short_string_bytes(s: &[u8]) -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf[32 - s.len()..].copy_from_slice(s);
    buf
}
