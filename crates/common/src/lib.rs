//! Contains core functions and types shared by the batchbench crates.
//!
//! This includes many trivial wrappers around [Felt] which help by providing
//! additional type safety, as well as invoke transaction hashing and signing.
pub use starknet_types_core::felt::Felt;

pub mod consts;
mod macros;
pub mod signature;
pub mod transaction;

pub use signature::{Signature, SigningError, SigningKey};
pub use transaction::{Call, InvokeTransactionV3, ResourceBound, ResourceBounds};

macros::felt_newtypes!(
    ContractAddress,
    TransactionHash,
    TransactionNonce,
    ChainId,
    EntryPoint,
);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid felt hex string {input:?}")]
pub struct ParseFeltError {
    pub input: String,
}

/// Parses a hex encoded felt. The `0x` prefix is optional since account
/// files in the wild are not consistent about it.
pub fn parse_hex(hex: &str) -> Result<Felt, ParseFeltError> {
    let trimmed = hex.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() || digits.len() > 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ParseFeltError {
            input: hex.to_owned(),
        });
    }

    Felt::from_hex(&format!("0x{digits}")).map_err(|_| ParseFeltError {
        input: hex.to_owned(),
    })
}

impl EntryPoint {
    /// Returns a new EntryPoint which has been truncated to fit from Keccak256
    /// digest of input.
    ///
    /// See: <https://docs.starknet.io/architecture-and-concepts/smart-contracts/contract-abi/>
    pub fn hashed(input: &[u8]) -> Self {
        use sha3::Digest;
        EntryPoint(truncated_keccak(<[u8; 32]>::from(
            sha3::Keccak256::digest(input),
        )))
    }
}

impl TransactionNonce {
    pub fn from_u64(nonce: u64) -> Self {
        Self(Felt::from(nonce))
    }

    pub fn to_u64(&self) -> Option<u64> {
        felt_to_u64(&self.0)
    }
}

impl ChainId {
    pub fn from_short_string(name: &str) -> Self {
        Self(short_string_to_felt(name))
    }

    pub fn mainnet() -> Self {
        Self::from_short_string("SN_MAIN")
    }

    pub fn sepolia() -> Self {
        Self::from_short_string("SN_SEPOLIA")
    }

    pub fn katana() -> Self {
        Self::from_short_string("KATANA")
    }

    /// Decodes the chain id back into its short string form, if printable.
    pub fn as_short_string(&self) -> Option<String> {
        felt_to_short_string(&self.0)
    }
}

/// Encodes a Cairo short string. Input longer than 31 bytes is truncated.
pub fn short_string_to_felt(text: &str) -> Felt {
    let bytes = text.as_bytes();
    let len = bytes.len().min(31);
    let mut buf = [0u8; 32];
    buf[32 - len..].copy_from_slice(&bytes[..len]);
    Felt::from_bytes_be(&buf)
}

/// Decodes a Cairo short string. `None` unless it is non-empty printable
/// ASCII, spaces included.
pub fn felt_to_short_string(felt: &Felt) -> Option<String> {
    let bytes = felt.to_bytes_be();
    let start = bytes.iter().position(|b| *b != 0)?;
    let text = std::str::from_utf8(&bytes[start..]).ok()?;
    text.chars()
        .all(|c| c.is_ascii_graphic() || c == ' ')
        .then(|| text.to_owned())
}

pub fn truncated_keccak(mut plain: [u8; 32]) -> Felt {
    // python code masks with (2**250 - 1) which starts 0x03 and is followed by 31
    // 0xff in be truncation is needed not to overflow the field element.
    plain[0] &= 0x03;
    Felt::from_bytes_be(&plain)
}

pub fn felt_to_u64(felt: &Felt) -> Option<u64> {
    let bytes = felt.to_bytes_be();
    let (high, low) = bytes.split_at(24);
    if high.iter().any(|b| *b != 0) {
        return None;
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(low);
    Some(u64::from_be_bytes(buf))
}

pub fn felt_to_u128(felt: &Felt) -> Option<u128> {
    let bytes = felt.to_bytes_be();
    let (high, low) = bytes.split_at(16);
    if high.iter().any(|b| *b != 0) {
        return None;
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(low);
    Some(u128::from_be_bytes(buf))
}

/// A Cairo `u256`, which is passed around as two felts: `low` then `high`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct U256 {
    pub low: u128,
    pub high: u128,
}

impl U256 {
    pub const fn from_u128(value: u128) -> Self {
        Self {
            low: value,
            high: 0,
        }
    }

    pub fn to_calldata(self) -> [Felt; 2] {
        [Felt::from(self.low), Felt::from(self.high)]
    }

    /// Decodes a `u256` from the first two felts of a call result.
    ///
    /// Missing felts are treated as zero.
    pub fn from_felts(felts: &[Felt]) -> Option<Self> {
        let low = felts.first().map(felt_to_u128).unwrap_or(Some(0))?;
        let high = felts.get(1).map(felt_to_u128).unwrap_or(Some(0))?;
        Some(Self { low, high })
    }

    /// Saturates to [u128::MAX] when the high limb is set.
    pub fn saturating_u128(self) -> u128 {
        if self.high == 0 {
            self.low
        } else {
            u128::MAX
        }
    }
}
