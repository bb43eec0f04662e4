//! Authenticated identity
//!
//! A [`User`] is built once per session by unlocking the remote key
//! material with the salted key pass, and is immutable afterwards. It
//! indexes the user's signing [`Address`]es by id and by email; both
//! lookups return `None` without error when nothing matches.

use std::collections::HashMap;
use std::sync::Arc;

use crate::api::{AddressId, DriveClient};
use crate::crypto::{unarmor, Keyring};
use crate::error::{DriveError, DriveResult};

/// A signing identity owned by the user.
#[derive(Debug, Clone)]
pub struct Address {
    id: AddressId,
    email: String,
    keyring: Keyring,
}

impl Address {
    pub fn id(&self) -> &AddressId {
        &self.id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }
}

/// The authenticated user: primary keyring plus address indexes.
#[derive(Debug)]
pub struct User {
    id: String,
    keyring: Keyring,
    addresses: Vec<Address>,
    by_id: HashMap<AddressId, usize>,
    by_email: HashMap<String, usize>,
}

impl User {
    /// Fetch the remote user record and unlock its key material.
    ///
    /// `salted_key_pass` is the base64-encoded passphrase captured at
    /// login. Addresses whose keyring fails to unlock are excluded; the
    /// session only fails when the user keyring (or every address) ends
    /// up with zero decryption-capable entries.
    pub async fn fetch(
        client: &Arc<dyn DriveClient>,
        salted_key_pass: &str,
    ) -> DriveResult<Self> {
        let remote = client.get_user().await?;
        let remote_addresses = client.get_addresses().await?;

        let pass = unarmor(salted_key_pass)?;

        let locked: Vec<String> = remote.keys.iter().map(|k| k.private_key.clone()).collect();
        let keyring = Keyring::unlock(&locked, &pass);
        if keyring.count_decryption_entities() == 0 {
            return Err(DriveError::KeyringUnlock);
        }

        let mut addresses = Vec::new();
        let mut by_id = HashMap::new();
        let mut by_email = HashMap::new();

        for remote_address in remote_addresses {
            let locked: Vec<String> = remote_address
                .keys
                .iter()
                .map(|k| k.private_key.clone())
                .collect();
            let address_keyring = Keyring::unlock(&locked, &pass);
            if address_keyring.count_decryption_entities() == 0 {
                tracing::warn!(
                    address = %remote_address.email,
                    "excluding address whose keyring failed to unlock"
                );
                continue;
            }

            by_id.insert(remote_address.id.clone(), addresses.len());
            by_email.insert(remote_address.email.clone(), addresses.len());
            addresses.push(Address {
                id: remote_address.id,
                email: remote_address.email,
                keyring: address_keyring,
            });
        }

        if addresses.is_empty() {
            return Err(DriveError::KeyringUnlock);
        }

        Ok(Self {
            id: remote.id,
            keyring,
            addresses,
            by_id,
            by_email,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn address_from_id(&self, id: &AddressId) -> Option<&Address> {
        self.by_id.get(id).map(|&i| &self.addresses[i])
    }

    pub fn address_from_email(&self, email: &str) -> Option<&Address> {
        self.by_email.get(email).map(|&i| &self.addresses[i])
    }
}
