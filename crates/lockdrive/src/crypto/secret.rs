use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};

use super::{random_bytes, CryptoError};

/// Size of a ChaCha20-Poly1305 nonce in bytes
pub const NONCE_SIZE: usize = 12;
/// Size of a symmetric secret in bytes (256 bits)
pub const SECRET_SIZE: usize = 32;

/// A 256-bit symmetric encryption key.
///
/// Encrypts with ChaCha20-Poly1305 AEAD; the output layout is
/// `nonce (12 bytes) || ciphertext || tag (16 bytes)` with a fresh random
/// nonce per encryption.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret([u8; SECRET_SIZE]);

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Secret").field(&"..").finish()
    }
}

impl From<[u8; SECRET_SIZE]> for Secret {
    fn from(bytes: [u8; SECRET_SIZE]) -> Self {
        Secret(bytes)
    }
}

impl Secret {
    /// Generate a new random secret using a cryptographically secure RNG
    pub fn generate() -> Self {
        Self(random_bytes::<SECRET_SIZE>())
    }

    /// Create a secret from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `SECRET_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; SECRET_SIZE] = data.try_into().map_err(|_| {
            anyhow::anyhow!("invalid secret size, expected {}, got {}", SECRET_SIZE, data.len())
        })?;
        Ok(Self(bytes))
    }

    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    /// Encrypt data, producing `nonce || ciphertext || tag`.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        let nonce_bytes = random_bytes::<NONCE_SIZE>();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher.encrypt(nonce, data).map_err(|_| CryptoError::Decrypt)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt `nonce || ciphertext || tag`.
    ///
    /// # Errors
    ///
    /// Fails if the input is too short for a nonce or if the
    /// authentication tag does not verify (wrong key or tampered data).
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_SIZE {
            return Err(CryptoError::Decrypt);
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
        cipher
            .decrypt(nonce, &data[NONCE_SIZE..])
            .map_err(|_| CryptoError::Decrypt)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let secret = Secret::generate();
        let data = b"hello world, this is a test message for encryption";

        let encrypted = secret.encrypt(data).unwrap();
        let decrypted = secret.decrypt(&encrypted).unwrap();
        assert_eq!(data.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_wrong_key_fails() {
        let secret = Secret::generate();
        let encrypted = secret.encrypt(b"data").unwrap();
        assert!(Secret::generate().decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_tampered_data_fails() {
        let secret = Secret::generate();
        let mut encrypted = secret.encrypt(b"data").unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0xff;
        assert!(secret.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_empty_data() {
        let secret = Secret::generate();
        let encrypted = secret.encrypt(b"").unwrap();
        assert_eq!(secret.decrypt(&encrypted).unwrap(), b"");
    }

    #[test]
    fn test_size_validation() {
        assert!(Secret::from_slice(&[1u8; 16]).is_err());
        assert!(Secret::from_slice(&[1u8; 64]).is_err());
        assert!(Secret::from_slice(&[1u8; SECRET_SIZE]).is_ok());
    }
}
