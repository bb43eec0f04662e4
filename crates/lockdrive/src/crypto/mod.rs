//! Cryptographic operations for the drive protocol
//!
//! Everything the client needs to walk and mutate the keyed link tree:
//!
//! ```text
//! salted key pass (from login)
//!   └── user / address keyrings (locked keys unlocked with the pass)
//!         └── share keyring (share key packet under the owner address)
//!               └── node keyrings (per-link, passphrase under the parent)
//!                     ├── session key (per-file, key packet under the node)
//!                     └── hash key (per-folder, signed-encrypted blob)
//! ```
//!
//! Keyrings sign with Ed25519 and encrypt with an ephemeral-key ECDH +
//! ChaCha20-Poly1305 construction; armored forms are base64.

mod keyring;
mod keys;
mod secret;
mod session;

pub use keyring::{
    decrypt_signed, encrypt_signed, generate_node_keys, reencrypt_passphrase, unlock_node_key,
    KeyPair, Keyring, NodeKeys,
};
pub use keys::{PublicKey, SecretKey, KEY_SIZE, SIGNATURE_SIZE};
pub use secret::{Secret, NONCE_SIZE, SECRET_SIZE};
pub use session::{unwrap_session_key, wrap_session_key, SessionKey};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("crypto error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("decryption failed")]
    Decrypt,
    #[error("signature verification failed")]
    BadSignature,
}

/// Fill a fixed-size buffer from the system CSPRNG.
pub(crate) fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buff = [0u8; N];
    getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
    buff
}

/// Base64-armor raw bytes for transport.
pub fn armor(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decode a base64-armored string.
pub fn unarmor(data: &str) -> Result<Vec<u8>, CryptoError> {
    BASE64
        .decode(data)
        .map_err(|err| anyhow::anyhow!("invalid armored data: {}", err).into())
}

/// Derive the salted key pass from a mailbox password and a key salt.
///
/// The result is what the embedding application persists (base64-encoded)
/// and what keyring unlock consumes as raw passphrase bytes.
pub fn salt_key_pass(password: &[u8], salt: &[u8]) -> Vec<u8> {
    let hk = Hkdf::<Sha256>::new(Some(salt), password);
    let mut out = [0u8; SECRET_SIZE];
    hk.expand(b"lockdrive-key-pass", &mut out)
        .expect("hkdf output length is valid");
    out.to_vec()
}

/// Hash a link name under its parent folder's hash key.
///
/// The server only ever sees this value; it is how sibling-name lookups
/// work without revealing plaintext names.
pub fn hash_name(hash_key: &[u8], name: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(hash_key).expect("hmac accepts any key length");
    mac.update(name.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_armor_roundtrip() {
        let data = b"some payload bytes";
        let armored = armor(data);
        assert_eq!(unarmor(&armored).unwrap(), data);
    }

    #[test]
    fn test_salt_key_pass_is_deterministic() {
        let a = salt_key_pass(b"password", b"salt");
        let b = salt_key_pass(b"password", b"salt");
        let c = salt_key_pass(b"password", b"other-salt");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), SECRET_SIZE);
    }

    #[test]
    fn test_hash_name_depends_on_key_and_name() {
        let key = [7u8; 32];
        let a = hash_name(&key, "a.txt");
        assert_eq!(a, hash_name(&key, "a.txt"));
        assert_ne!(a, hash_name(&key, "b.txt"));
        assert_ne!(a, hash_name(&[8u8; 32], "a.txt"));
    }
}
