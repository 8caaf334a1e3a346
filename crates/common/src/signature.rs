use crate::{Felt, ParseFeltError};

/// An ECDSA signature over the STARK curve.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub r: Felt,
    pub s: Felt,
}

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("Message hash is out of range for signing")]
    MessageOutOfRange,
    #[error("Invalid nonce k generated for message")]
    InvalidK,
}

/// An account's private key.
///
/// `Debug` never prints the key itself.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey(Felt);

impl SigningKey {
    pub fn from_secret(secret: Felt) -> Self {
        Self(secret)
    }

    pub fn from_hex(hex: &str) -> Result<Self, ParseFeltError> {
        crate::parse_hex(hex).map(Self)
    }

    pub fn public_key(&self) -> Felt {
        starknet_crypto::get_public_key(&self.0)
    }

    /// Signs `hash` using a deterministic (RFC 6979) `k`.
    pub fn sign(&self, hash: Felt) -> Result<Signature, SigningError> {
        let k = starknet_crypto::rfc6979_generate_k(&hash, &self.0, None);
        let signature = starknet_crypto::sign(&self.0, &hash, &k).map_err(|e| match e {
            starknet_crypto::SignError::InvalidMessageHash => SigningError::MessageOutOfRange,
            _ => SigningError::InvalidK,
        })?;

        Ok(Signature {
            r: signature.r,
            s: signature.s,
        })
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}
