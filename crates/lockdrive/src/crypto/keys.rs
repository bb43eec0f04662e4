use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use super::{random_bytes, CryptoError};

/// Size of an Ed25519 key in bytes
pub const KEY_SIZE: usize = 32;
/// Size of an Ed25519 detached signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Private half of a keyring entry.
///
/// Signs with Ed25519; converts to X25519 for the ECDH half of
/// encryption. Keys never leave the process except in locked
/// (passphrase-encrypted) form.
#[derive(Clone)]
pub struct SecretKey(SigningKey);

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SecretKey").field(&"..").finish()
    }
}

impl From<[u8; KEY_SIZE]> for SecretKey {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        Self(SigningKey::from_bytes(&bytes))
    }
}

impl SecretKey {
    /// Generate a new random secret key using a cryptographically secure RNG
    pub fn generate() -> Self {
        Self::from(random_bytes::<KEY_SIZE>())
    }

    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Derive the public key from this secret key
    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    /// Produce a detached Ed25519 signature over a message.
    pub fn sign(&self, msg: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.0.sign(msg).to_bytes()
    }

    /// Convert to X25519 (Montgomery curve) for ECDH.
    ///
    /// Ed25519 lives on the Edwards curve while Diffie-Hellman requires
    /// Montgomery; the clamped scalar of the expanded key is the X25519
    /// private key.
    pub(crate) fn to_x25519(&self) -> StaticSecret {
        StaticSecret::from(self.0.to_scalar_bytes())
    }
}

/// Public half of a keyring entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("invalid public key size, expected {}", KEY_SIZE))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|_| anyhow::anyhow!("invalid public key bytes"))?;
        Ok(Self(key))
    }

    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Verify a detached Ed25519 signature over a message.
    pub fn verify(&self, msg: &[u8], signature: &[u8]) -> bool {
        let Ok(bytes) = <[u8; SIGNATURE_SIZE]>::try_from(signature) else {
            return false;
        };
        self.0
            .verify_strict(msg, &Signature::from_bytes(&bytes))
            .is_ok()
    }

    /// Convert to X25519 (Montgomery curve) for ECDH.
    pub(crate) fn to_x25519(&self) -> X25519PublicKey {
        X25519PublicKey::from(self.0.to_montgomery().to_bytes())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let secret = SecretKey::generate();
        let public = secret.public();
        let message = b"hello, world!";

        let signature = secret.sign(message);
        assert!(public.verify(message, &signature));

        // Wrong message fails
        assert!(!public.verify(b"hello, world?", &signature));

        // Wrong key fails
        let other = SecretKey::generate().public();
        assert!(!other.verify(message, &signature));
    }

    #[test]
    fn test_ecdh_agreement() {
        let alice = SecretKey::generate();
        let bob = SecretKey::generate();

        let ab = alice.to_x25519().diffie_hellman(&bob.public().to_x25519());
        let ba = bob.to_x25519().diffie_hellman(&alice.public().to_x25519());
        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn test_public_key_roundtrip() {
        let public = SecretKey::generate().public();
        let recovered = PublicKey::from_bytes(&public.to_bytes()).unwrap();
        assert_eq!(public, recovered);

        assert!(PublicKey::from_bytes(&[0u8; 16]).is_err());
    }
}
