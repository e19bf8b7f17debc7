//! Stub crypto for the integration suite
//!
//! "Ciphertext" is the plaintext framed as `ENC[...]`, so tests can
//! assert on decrypted archive contents without real OpenPGP.

use mailvault::crypto::{CryptoError, KeyRing, KeyUnlocker, SaltedKeyPass};
use mailvault::types::{Address, User};

/// Frame plaintext the way the stub keyring expects ciphertext.
pub fn encrypt(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 5);
    out.extend_from_slice(b"ENC[");
    out.extend_from_slice(data);
    out.push(b']');
    out
}

pub struct TestKeyRing {
    closed: bool,
}

impl KeyRing for TestKeyRing {
    fn decryption_entity_count(&self) -> usize {
        usize::from(!self.closed)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.closed {
            return Err(CryptoError::Decrypt("keyring is closed".to_string()));
        }
        data.strip_prefix(b"ENC[")
            .and_then(|rest| rest.strip_suffix(b"]"))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| CryptoError::Decrypt("not a stub ciphertext".to_string()))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

pub struct TestCrypto;

impl KeyUnlocker for TestCrypto {
    fn salt_key_password(
        &self,
        password: &[u8],
        salt: &str,
    ) -> Result<SaltedKeyPass, CryptoError> {
        let mut bytes = password.to_vec();
        bytes.push(b':');
        bytes.extend_from_slice(salt.as_bytes());
        Ok(SaltedKeyPass::new(bytes))
    }

    fn unlock_user_keys(
        &self,
        user: &User,
        _pass: &SaltedKeyPass,
    ) -> Result<Box<dyn KeyRing>, CryptoError> {
        if user.keys.is_empty() {
            return Err(CryptoError::Unlock("user has no keys".to_string()));
        }
        Ok(Box::new(TestKeyRing { closed: false }))
    }

    fn unlock_address_keys(
        &self,
        address: &Address,
        _pass: &SaltedKeyPass,
        _user_keys: &dyn KeyRing,
    ) -> Result<Box<dyn KeyRing>, CryptoError> {
        if address.keys.is_empty() {
            return Err(CryptoError::Unlock("address has no keys".to_string()));
        }
        Ok(Box::new(TestKeyRing { closed: false }))
    }
}
