use super::keyring::Keyring;
use super::secret::Secret;
use super::{CryptoError, SECRET_SIZE};

/// Per-file symmetric content key.
///
/// Every block of a file's revisions is encrypted with the same session
/// key; the key itself travels as a key packet encrypted under the file's
/// node keyring.
#[derive(Debug, Clone)]
pub struct SessionKey(Secret);

impl SessionKey {
    pub fn generate() -> Self {
        Self(Secret::generate())
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self(Secret::from_slice(data)?))
    }

    pub fn bytes(&self) -> &[u8] {
        self.0.bytes()
    }

    /// Encrypt a block of plaintext.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.0.encrypt(data)
    }

    /// Decrypt a block of ciphertext.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.0.decrypt(data)
    }
}

/// Wrap a session key for storage on a file link.
///
/// Returns the armored key packet (encrypted to the node keyring) and an
/// armored detached signature over the raw key bytes.
pub fn wrap_session_key(
    key: &SessionKey,
    node: &Keyring,
) -> Result<(String, String), CryptoError> {
    let packet = node.encrypt_armored(key.bytes())?;
    let signature = node.sign_detached(key.bytes())?;
    Ok((packet, signature))
}

/// Recover a session key from its key packet under the node keyring.
pub fn unwrap_session_key(packet: &str, node: &Keyring) -> Result<SessionKey, CryptoError> {
    let bytes = node.decrypt_armored(packet)?;
    if bytes.len() != SECRET_SIZE {
        return Err(CryptoError::Decrypt);
    }
    SessionKey::from_slice(&bytes)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::SecretKey;

    #[test]
    fn test_session_key_roundtrip() {
        let key = SessionKey::generate();
        let encrypted = key.encrypt(b"block plaintext").unwrap();
        assert_eq!(key.decrypt(&encrypted).unwrap(), b"block plaintext");
    }

    #[test]
    fn test_wrap_unwrap() {
        let node = Keyring::from_secret_key(SecretKey::generate());
        let key = SessionKey::generate();

        let (packet, signature) = wrap_session_key(&key, &node).unwrap();
        let recovered = unwrap_session_key(&packet, &node).unwrap();
        assert_eq!(recovered.bytes(), key.bytes());

        // The signature covers the raw key bytes
        assert!(node.verify_detached(key.bytes(), &signature).is_ok());

        // A different node keyring cannot open the packet
        let other = Keyring::from_secret_key(SecretKey::generate());
        assert!(unwrap_session_key(&packet, &other).is_err());
    }
}
