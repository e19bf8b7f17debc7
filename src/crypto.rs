//! OpenPGP capability seam
//!
//! The actual cryptography (key unlock, PGP decryption) lives in the
//! embedding host; this crate only needs the two capabilities below.
//! Tests substitute stub implementations.

use crate::types::{Address, User};
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("failed to unlock key: {0}")]
    Unlock(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("failed to derive key password: {0}")]
    Derive(String),
}

/// The secret actually fed to the key unlock: the mailbox password
/// run through the remote service's per-key salt. Zeroed on drop.
pub struct SaltedKeyPass(Zeroizing<Vec<u8>>);

impl SaltedKeyPass {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// An unlocked set of private keys able to decrypt message material.
///
/// `close` must zero all private key state; implementations are
/// expected to make it idempotent.
pub trait KeyRing: Send + Sync {
    /// Number of keys in the ring that can actually decrypt.
    fn decryption_entity_count(&self) -> usize;

    /// Decrypt a PGP blob (armored or binary) into plaintext.
    fn decrypt(&self, data: &[u8]) -> std::result::Result<Vec<u8>, CryptoError>;

    /// Zero private key material.
    fn close(&mut self);
}

/// Unlocks locked key material into [`KeyRing`]s.
pub trait KeyUnlocker: Send + Sync {
    /// Derive the salted key password from the mailbox password and
    /// the salt registered for the user's primary key.
    fn salt_key_password(
        &self,
        password: &[u8],
        salt: &str,
    ) -> std::result::Result<SaltedKeyPass, CryptoError>;

    fn unlock_user_keys(
        &self,
        user: &User,
        pass: &SaltedKeyPass,
    ) -> std::result::Result<Box<dyn KeyRing>, CryptoError>;

    /// Unlock one address's keys. The user keyring serves as a
    /// fallback decryption source for token-locked address keys.
    fn unlock_address_keys(
        &self,
        address: &Address,
        pass: &SaltedKeyPass,
        user_keys: &dyn KeyRing,
    ) -> std::result::Result<Box<dyn KeyRing>, CryptoError>;
}
