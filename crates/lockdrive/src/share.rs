use crate::api::{AddressId, LinkId, ShareId};
use crate::crypto::Keyring;

/// A key-bearing container for a subtree.
///
/// The share keyring is derived by unlocking the share's key packet
/// against the owner address keyring, and acts as the parent keyring for
/// the share's root link.
#[derive(Debug, Clone)]
pub struct Share {
    id: ShareId,
    link_id: LinkId,
    address_id: AddressId,
    address_email: String,
    keyring: Keyring,
}

impl Share {
    pub(crate) fn new(
        id: ShareId,
        link_id: LinkId,
        address_id: AddressId,
        address_email: String,
        keyring: Keyring,
    ) -> Self {
        Self {
            id,
            link_id,
            address_id,
            address_email,
            keyring,
        }
    }

    pub fn id(&self) -> &ShareId {
        &self.id
    }

    /// Root link of the share's subtree.
    pub fn link_id(&self) -> &LinkId {
        &self.link_id
    }

    /// Owner address id; resolves through the user's address index.
    pub fn address_id(&self) -> &AddressId {
        &self.address_id
    }

    pub fn address_email(&self) -> &str {
        &self.address_email
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }
}
