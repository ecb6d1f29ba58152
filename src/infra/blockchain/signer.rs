//! Transaction signer strategies.
//!
//! Decouples signing from the RPC client so that raw private keys are not held
//! in the client and remote signers (HSM, KMS, Vault) can be plugged in later.

use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use secrecy::{ExposeSecret, SecretString};

use super::encoding::keccak256;
use crate::domain::{BlockchainError, RecoverableSignature, TransactionSigner};

/// Parse a hex-encoded secp256k1 private key. Used only within local scope.
fn signing_key_from_secret(secret: &SecretString) -> Result<SigningKey, BlockchainError> {
    let raw = secret.expose_secret().trim();
    let key_bytes = hex::decode(raw.strip_prefix("0x").unwrap_or(raw))
        .map_err(|e| BlockchainError::InvalidKey(format!("key is not hex: {}", e)))?;

    if key_bytes.len() != 32 {
        return Err(BlockchainError::InvalidKey(format!(
            "key must be 32 bytes, got {}",
            key_bytes.len()
        )));
    }

    SigningKey::from_slice(&key_bytes).map_err(|e| BlockchainError::InvalidKey(e.to_string()))
}

/// Account address: last 20 bytes of the Keccak-256 of the uncompressed public key.
pub fn address_of(signing_key: &SigningKey) -> [u8; 20] {
    let point = signing_key.verifying_key().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

/// Local signer: holds the secret in memory and parses it only when signing.
pub struct LocalSigner {
    secret: SecretString,
    address: [u8; 20],
}

impl LocalSigner {
    /// Build a local signer from a hex secret, with or without a `0x` prefix.
    pub fn new(secret: SecretString) -> Result<Self, BlockchainError> {
        let signing_key = signing_key_from_secret(&secret)?;
        let address = address_of(&signing_key);
        Ok(Self { secret, address })
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &hex::encode(self.address))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TransactionSigner for LocalSigner {
    async fn sign_digest(&self, digest: &[u8; 32]) -> Result<RecoverableSignature, BlockchainError> {
        let signing_key = signing_key_from_secret(&self.secret)?;
        let (signature, recovery_id) = signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| BlockchainError::InvalidSignature(e.to_string()))?;

        let bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);

        Ok(RecoverableSignature {
            r,
            s,
            recovery_id: recovery_id.to_byte(),
        })
    }

    fn address(&self) -> [u8; 20] {
        self.address
    }
}
