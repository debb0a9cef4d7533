//! Transaction signing.

use derive_more::{Display, Error};
use ed25519_dalek::{Signer, SigningKey};

/// Signing errors.
#[derive(Debug, Display, Error)]
pub enum SigningError {
    /// Secret key material is malformed.
    #[display(fmt = "invalid secret key: {}", _0)]
    InvalidKey(#[error(not(source))] String),

    /// Signing key is not available, e.g. a remote signer is offline.
    #[display(fmt = "signing key unavailable: {}", _0)]
    Unavailable(#[error(not(source))] String),
}

/// Detached signature over a transaction hash.
pub struct Signature {
    /// Hex-encoded public key.
    pub public_key: String,

    /// Hex-encoded signature.
    pub signature: String,
}

/// Account capable of signing transactions.
pub trait TransactionSigner: Send + Sync {
    /// Ledger address of the signing account.
    fn address(&self) -> &str;

    fn sign(&self, payload: &[u8]) -> Result<Signature, SigningError>;
}

/// In-process ed25519 keypair.
pub struct Keypair {
    signing_key: SigningKey,
    address: String,
}

impl Keypair {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let address = hex::encode(signing_key.verifying_key().to_bytes());

        Self {
            signing_key,
            address,
        }
    }

    /// Create a keypair from a hex-encoded 32-byte seed.
    pub fn from_hex(secret: &str) -> Result<Self, SigningError> {
        let bytes = hex::decode(secret.trim_start_matches("0x"))
            .map_err(|err| SigningError::InvalidKey(err.to_string()))?;

        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| {
                SigningError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len()))
            })?;

        Ok(Self::from_seed(seed))
    }
}

impl TransactionSigner for Keypair {
    fn address(&self) -> &str {
        &self.address
    }

    fn sign(&self, payload: &[u8]) -> Result<Signature, SigningError> {
        Ok(Signature {
            public_key: self.address.clone(),
            signature: hex::encode(self.signing_key.sign(payload).to_bytes()),
        })
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signature as DalekSignature, Verifier, VerifyingKey};

    use super::*;

    #[test]
    fn signature_verifies_against_address() {
        let keypair = Keypair::from_hex(&hex::encode([7; 32])).unwrap();
        let signature = keypair.sign(b"payload").unwrap();

        let key_bytes: [u8; 32] = hex::decode(keypair.address()).unwrap().try_into().unwrap();
        let signature_bytes: [u8; 64] = hex::decode(signature.signature)
            .unwrap()
            .try_into()
            .unwrap();

        VerifyingKey::from_bytes(&key_bytes)
            .unwrap()
            .verify(b"payload", &DalekSignature::from_bytes(&signature_bytes))
            .unwrap();
    }

    #[test]
    fn short_seed_is_rejected() {
        assert!(matches!(
            Keypair::from_hex("abcd"),
            Err(SigningError::InvalidKey(_))
        ));
    }
}
