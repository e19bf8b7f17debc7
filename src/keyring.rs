//! Unlocked account keyring
//!
//! Holds the decrypted user keyring plus one keyring per address for
//! the lifetime of an export or restore operation. All private key
//! material is zeroed when the ring is closed or dropped.

use crate::crypto::{KeyRing, KeyUnlocker, SaltedKeyPass};
use crate::error::{Error, Result};
use crate::types::{Address, AddressId, Salts, User};
use std::collections::HashMap;
use tracing::warn;

pub struct UnlockedKeyRing {
    user: Box<dyn KeyRing>,
    addresses: HashMap<AddressId, Box<dyn KeyRing>>,
    closed: bool,
}

impl std::fmt::Debug for UnlockedKeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockedKeyRing")
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl UnlockedKeyRing {
    /// Unlock the user keyring and as many address keyrings as
    /// possible.
    ///
    /// Addresses whose keys fail to unlock, or unlock to zero
    /// decryption entities, are dropped with a warning: their
    /// messages cannot be decrypted but the rest of the account can
    /// still be exported.
    pub fn unlock(
        unlocker: &dyn KeyUnlocker,
        user: &User,
        addresses: &[Address],
        pass: &SaltedKeyPass,
    ) -> Result<Self> {
        let user_keys = unlocker
            .unlock_user_keys(user, pass)
            .map_err(|err| Error::KeyUnlockFailed(err.to_string()))?;

        if user_keys.decryption_entity_count() == 0 {
            return Err(Error::NoDecryptionEntities);
        }

        let mut map = HashMap::new();
        for address in addresses {
            match unlocker.unlock_address_keys(address, pass, user_keys.as_ref()) {
                Ok(mut ring) => {
                    if ring.decryption_entity_count() == 0 {
                        ring.close();
                        warn!(
                            address = %address.id,
                            "address keyring has no decryption entities"
                        );
                        continue;
                    }
                    map.insert(address.id.clone(), ring);
                }
                Err(err) => {
                    warn!(address = %address.id, %err, "failed to unlock address keys");
                }
            }
        }

        Ok(Self {
            user: user_keys,
            addresses: map,
            closed: false,
        })
    }

    #[must_use]
    pub fn address_keys(&self, id: &AddressId) -> Option<&dyn KeyRing> {
        self.addresses.get(id).map(AsRef::as_ref)
    }

    #[must_use]
    pub fn has_address(&self, id: &AddressId) -> bool {
        self.addresses.contains_key(id)
    }

    /// Zero all private key material. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        for ring in self.addresses.values_mut() {
            ring.close();
        }
        self.addresses.clear();
        self.user.close();
        self.closed = true;
    }
}

impl Drop for UnlockedKeyRing {
    fn drop(&mut self) {
        self.close();
    }
}

/// Derive the salted key password for the account's primary key.
pub fn derive_key_password(
    unlocker: &dyn KeyUnlocker,
    user: &User,
    salts: &Salts,
    mailbox_password: &[u8],
) -> Result<SaltedKeyPass> {
    let primary = user
        .primary_key()
        .ok_or_else(|| Error::KeyUnlockFailed("account has no keys".to_string()))?;

    let salt = salts
        .for_key(&primary.id)
        .ok_or_else(|| Error::KeyUnlockFailed(format!("no salt for key {}", primary.id)))?;

    Ok(unlocker.salt_key_password(mailbox_password, salt)?)
}

/// Checks a candidate mailbox password before it is accepted into the
/// session.
pub trait MailboxPasswordValidator {
    fn validate(&self, password: &[u8]) -> bool;
}

/// Validates by deriving the salted key password and attempting a
/// real user-key unlock.
pub struct KeyUnlockValidator<'a> {
    unlocker: &'a dyn KeyUnlocker,
    user: &'a User,
    salts: &'a Salts,
}

impl<'a> KeyUnlockValidator<'a> {
    #[must_use]
    pub fn new(unlocker: &'a dyn KeyUnlocker, user: &'a User, salts: &'a Salts) -> Self {
        Self {
            unlocker,
            user,
            salts,
        }
    }
}

impl MailboxPasswordValidator for KeyUnlockValidator<'_> {
    fn validate(&self, password: &[u8]) -> bool {
        let Ok(pass) = derive_key_password(self.unlocker, self.user, self.salts, password) else {
            return false;
        };

        match self.unlocker.unlock_user_keys(self.user, &pass) {
            Ok(mut ring) => {
                let usable = ring.decryption_entity_count() > 0;
                ring.close();
                usable
            }
            Err(_) => false,
        }
    }
}
