use std::sync::Arc;

use hkdf::Hkdf;
use sha2::Sha256;

use super::keys::{PublicKey, SecretKey, KEY_SIZE, SIGNATURE_SIZE};
use super::secret::{Secret, SECRET_SIZE};
use super::{armor, random_bytes, unarmor, CryptoError};

/// One keyring entry: a public key with, when available, its private half.
#[derive(Debug, Clone)]
pub struct KeyPair {
    secret: Option<SecretKey>,
    public: PublicKey,
}

impl KeyPair {
    pub fn public(&self) -> &PublicKey {
        &self.public
    }
}

/// An ordered set of key pairs acting as one identity.
///
/// Mirrors the shape of an OpenPGP keyring: encryption targets the
/// primary entry, decryption and verification try every entry, and
/// entries may be public-only. Keyrings are immutable once built and
/// cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    entries: Arc<Vec<KeyPair>>,
}

impl Keyring {
    pub fn from_secret_key(secret: SecretKey) -> Self {
        let public = secret.public();
        Self {
            entries: Arc::new(vec![KeyPair {
                secret: Some(secret),
                public,
            }]),
        }
    }

    /// Combine several keyrings into one for verification purposes.
    pub fn merged(parts: &[&Keyring]) -> Self {
        let entries = parts
            .iter()
            .flat_map(|kr| kr.entries.iter().cloned())
            .collect();
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Number of entries holding a private key.
    pub fn count_decryption_entities(&self) -> usize {
        self.entries.iter().filter(|e| e.secret.is_some()).count()
    }

    /// The primary entry, used for encryption and signing.
    pub fn primary(&self) -> Result<&KeyPair, CryptoError> {
        self.entries
            .first()
            .ok_or_else(|| anyhow::anyhow!("keyring has no entries").into())
    }

    fn primary_secret(&self) -> Result<&SecretKey, CryptoError> {
        self.entries
            .iter()
            .find_map(|e| e.secret.as_ref())
            .ok_or_else(|| anyhow::anyhow!("keyring has no private entries").into())
    }

    //
    // LOCKED KEYS
    //

    /// Lock a secret key under a passphrase, producing an armored blob.
    pub fn lock_key(secret: &SecretKey, passphrase: &[u8]) -> Result<String, CryptoError> {
        let wrap = passphrase_secret(passphrase);
        Ok(armor(&wrap.encrypt(&secret.to_bytes())?))
    }

    /// Unlock a single armored key blob with a passphrase.
    pub fn unlock_key(locked: &str, passphrase: &[u8]) -> Result<SecretKey, CryptoError> {
        let wrap = passphrase_secret(passphrase);
        let bytes = wrap.decrypt(&unarmor(locked)?)?;
        let bytes: [u8; KEY_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::Decrypt)?;
        Ok(SecretKey::from(bytes))
    }

    /// Unlock a set of locked keys into a keyring.
    ///
    /// Entries that fail to unlock are skipped; callers decide whether an
    /// empty result is fatal via [`Keyring::count_decryption_entities`].
    pub fn unlock(locked: &[String], passphrase: &[u8]) -> Self {
        let entries = locked
            .iter()
            .filter_map(|key| match Self::unlock_key(key, passphrase) {
                Ok(secret) => {
                    let public = secret.public();
                    Some(KeyPair {
                        secret: Some(secret),
                        public,
                    })
                }
                Err(_) => {
                    tracing::debug!("skipping keyring entry that failed to unlock");
                    None
                }
            })
            .collect();
        Self {
            entries: Arc::new(entries),
        }
    }

    //
    // ENCRYPTION
    //

    /// Encrypt to this keyring's primary entry.
    ///
    /// Layout: `ephemeral_pubkey (32) || nonce (12) || ciphertext || tag`.
    /// An ephemeral keypair performs ECDH against the primary public key
    /// and the shared secret keys the AEAD.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let recipient = self.primary()?.public;

        let ephemeral = SecretKey::generate();
        let shared = ephemeral.to_x25519().diffie_hellman(&recipient.to_x25519());
        let aead = Secret::from(*shared.as_bytes());

        let mut out = Vec::with_capacity(KEY_SIZE + SECRET_SIZE + plaintext.len());
        out.extend_from_slice(&ephemeral.public().to_bytes());
        out.extend_from_slice(&aead.encrypt(plaintext)?);
        Ok(out)
    }

    pub fn encrypt_armored(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        Ok(armor(&self.encrypt(plaintext)?))
    }

    /// Decrypt a blob produced by [`Keyring::encrypt`], trying every
    /// private entry.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if blob.len() < KEY_SIZE {
            return Err(CryptoError::Decrypt);
        }

        let ephemeral = PublicKey::from_bytes(&blob[..KEY_SIZE])?;
        let body = &blob[KEY_SIZE..];

        for entry in self.entries.iter() {
            let Some(secret) = &entry.secret else {
                continue;
            };
            let shared = secret.to_x25519().diffie_hellman(&ephemeral.to_x25519());
            let aead = Secret::from(*shared.as_bytes());
            if let Ok(plaintext) = aead.decrypt(body) {
                return Ok(plaintext);
            }
        }

        Err(CryptoError::Decrypt)
    }

    pub fn decrypt_armored(&self, blob: &str) -> Result<Vec<u8>, CryptoError> {
        self.decrypt(&unarmor(blob)?)
    }

    //
    // SIGNATURES
    //

    /// Produce an armored detached signature over a message.
    pub fn sign_detached(&self, msg: &[u8]) -> Result<String, CryptoError> {
        Ok(armor(&self.primary_secret()?.sign(msg)))
    }

    /// Verify an armored detached signature against any entry.
    pub fn verify_detached(&self, msg: &[u8], signature: &str) -> Result<(), CryptoError> {
        let signature = unarmor(signature)?;
        if self
            .entries
            .iter()
            .any(|e| e.public.verify(msg, &signature))
        {
            Ok(())
        } else {
            Err(CryptoError::BadSignature)
        }
    }

    /// Sign a message and encrypt the signature to another keyring.
    ///
    /// The signature itself is sensitive (it ties an identity to a
    /// plaintext), so per-block and per-node signatures travel encrypted
    /// under the node keyring.
    pub fn sign_detached_encrypted(
        &self,
        msg: &[u8],
        encryption: &Keyring,
    ) -> Result<String, CryptoError> {
        let signature = self.primary_secret()?.sign(msg);
        encryption.encrypt_armored(&signature)
    }

    /// Decrypt a signature with `decryption` and verify it against this
    /// keyring's entries.
    pub fn verify_detached_encrypted(
        &self,
        msg: &[u8],
        signature: &str,
        decryption: &Keyring,
    ) -> Result<(), CryptoError> {
        let signature = decryption.decrypt_armored(signature)?;
        if signature.len() != SIGNATURE_SIZE {
            return Err(CryptoError::BadSignature);
        }
        if self
            .entries
            .iter()
            .any(|e| e.public.verify(msg, &signature))
        {
            Ok(())
        } else {
            Err(CryptoError::BadSignature)
        }
    }
}

/// Derive the AEAD key that locks private keys under a passphrase.
fn passphrase_secret(passphrase: &[u8]) -> Secret {
    let hk = Hkdf::<Sha256>::new(None, passphrase);
    let mut out = [0u8; SECRET_SIZE];
    hk.expand(b"lockdrive-keyring", &mut out)
        .expect("hkdf output length is valid");
    Secret::from(out)
}

//
// NODE KEY FLOWS
//

/// Freshly generated key material for a new link.
#[derive(Debug, Clone)]
pub struct NodeKeys {
    /// Armored node key, locked under the passphrase.
    pub key: String,
    /// Passphrase, encrypted to the parent keyring.
    pub passphrase: String,
    /// Armored detached signature over the raw passphrase.
    pub signature: String,
}

/// Generate the key/passphrase/signature tuple for a new node.
///
/// The passphrase is encrypted to `parent` (the parent link's keyring, or
/// the share keyring for the root) and signed by `signer` (the owner
/// address keyring).
pub fn generate_node_keys(parent: &Keyring, signer: &Keyring) -> Result<NodeKeys, CryptoError> {
    let passphrase = random_bytes::<SECRET_SIZE>();
    let node_secret = SecretKey::generate();

    Ok(NodeKeys {
        key: Keyring::lock_key(&node_secret, &passphrase)?,
        passphrase: parent.encrypt_armored(&passphrase)?,
        signature: signer.sign_detached(&passphrase)?,
    })
}

/// Reconstruct a node keyring from its stored key material.
///
/// The passphrase decrypts under `parent`, its signature must verify
/// against `verifier`, and the node key unlocks with the passphrase. A
/// node keyring is only obtainable inside its parent's context.
pub fn unlock_node_key(
    parent: &Keyring,
    verifier: &Keyring,
    key: &str,
    passphrase: &str,
    signature: &str,
) -> Result<Keyring, CryptoError> {
    let passphrase = parent.decrypt_armored(passphrase)?;
    verifier.verify_detached(&passphrase, signature)?;
    let secret = Keyring::unlock_key(key, &passphrase)?;
    Ok(Keyring::from_secret_key(secret))
}

/// Re-encrypt a node passphrase from one parent keyring to another.
///
/// Used by move: the passphrase (and therefore its signature) is
/// unchanged, only the wrapping parent changes.
pub fn reencrypt_passphrase(
    old_parent: &Keyring,
    new_parent: &Keyring,
    passphrase: &str,
) -> Result<String, CryptoError> {
    let raw = old_parent.decrypt_armored(passphrase)?;
    new_parent.encrypt_armored(&raw)
}

//
// SIGNED PAYLOADS
//

/// Encrypt a payload to `to` and embed a detached signature by `signer`.
///
/// Layout inside the armor: `signature (64) || encrypted payload`. Names,
/// extended attributes and folder hash keys all use this shape.
pub fn encrypt_signed(
    plaintext: &[u8],
    to: &Keyring,
    signer: &Keyring,
) -> Result<String, CryptoError> {
    let signature = signer.primary_secret()?.sign(plaintext);
    let blob = to.encrypt(plaintext)?;

    let mut out = Vec::with_capacity(SIGNATURE_SIZE + blob.len());
    out.extend_from_slice(&signature);
    out.extend_from_slice(&blob);
    Ok(armor(&out))
}

/// Decrypt a signed payload with `decrypter` and verify the embedded
/// signature against `verifier`.
pub fn decrypt_signed(
    armored: &str,
    decrypter: &Keyring,
    verifier: &Keyring,
) -> Result<Vec<u8>, CryptoError> {
    let raw = unarmor(armored)?;
    if raw.len() < SIGNATURE_SIZE {
        return Err(CryptoError::Decrypt);
    }

    let (signature, blob) = raw.split_at(SIGNATURE_SIZE);
    let plaintext = decrypter.decrypt(blob)?;
    verifier.verify_detached(&plaintext, &armor(signature))?;
    Ok(plaintext)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let keyring = Keyring::from_secret_key(SecretKey::generate());
        let blob = keyring.encrypt(b"node passphrase material").unwrap();
        assert_eq!(keyring.decrypt(&blob).unwrap(), b"node passphrase material");

        let other = Keyring::from_secret_key(SecretKey::generate());
        assert!(other.decrypt(&blob).is_err());
    }

    #[test]
    fn test_lock_unlock_key() {
        let secret = SecretKey::generate();
        let locked = Keyring::lock_key(&secret, b"passphrase").unwrap();

        let unlocked = Keyring::unlock_key(&locked, b"passphrase").unwrap();
        assert_eq!(unlocked.to_bytes(), secret.to_bytes());

        assert!(Keyring::unlock_key(&locked, b"wrong").is_err());
    }

    #[test]
    fn test_unlock_skips_bad_entries() {
        let good = SecretKey::generate();
        let locked = vec![
            Keyring::lock_key(&good, b"pass").unwrap(),
            Keyring::lock_key(&SecretKey::generate(), b"other-pass").unwrap(),
        ];

        let keyring = Keyring::unlock(&locked, b"pass");
        assert_eq!(keyring.count_decryption_entities(), 1);
    }

    #[test]
    fn test_detached_signatures() {
        let keyring = Keyring::from_secret_key(SecretKey::generate());
        let signature = keyring.sign_detached(b"manifest").unwrap();

        assert!(keyring.verify_detached(b"manifest", &signature).is_ok());
        assert!(keyring.verify_detached(b"tampered", &signature).is_err());
    }

    #[test]
    fn test_detached_encrypted_signatures() {
        let address = Keyring::from_secret_key(SecretKey::generate());
        let node = Keyring::from_secret_key(SecretKey::generate());

        let signature = address
            .sign_detached_encrypted(b"block plaintext", &node)
            .unwrap();

        assert!(address
            .verify_detached_encrypted(b"block plaintext", &signature, &node)
            .is_ok());
        assert!(address
            .verify_detached_encrypted(b"other plaintext", &signature, &node)
            .is_err());
    }

    #[test]
    fn test_node_key_tuple_roundtrip() {
        let parent = Keyring::from_secret_key(SecretKey::generate());
        let address = Keyring::from_secret_key(SecretKey::generate());

        let keys = generate_node_keys(&parent, &address).unwrap();
        let node = unlock_node_key(&parent, &address, &keys.key, &keys.passphrase, &keys.signature)
            .unwrap();
        assert_eq!(node.count_decryption_entities(), 1);

        // Only the parent can open the passphrase
        let stranger = Keyring::from_secret_key(SecretKey::generate());
        assert!(unlock_node_key(
            &stranger,
            &address,
            &keys.key,
            &keys.passphrase,
            &keys.signature
        )
        .is_err());
    }

    #[test]
    fn test_reencrypt_passphrase_preserves_signature() {
        let old_parent = Keyring::from_secret_key(SecretKey::generate());
        let new_parent = Keyring::from_secret_key(SecretKey::generate());
        let address = Keyring::from_secret_key(SecretKey::generate());

        let keys = generate_node_keys(&old_parent, &address).unwrap();
        let moved = reencrypt_passphrase(&old_parent, &new_parent, &keys.passphrase).unwrap();

        // The original signature still verifies under the new parent
        let node =
            unlock_node_key(&new_parent, &address, &keys.key, &moved, &keys.signature).unwrap();
        assert_eq!(node.count_decryption_entities(), 1);
    }

    #[test]
    fn test_signed_payload_roundtrip() {
        let parent = Keyring::from_secret_key(SecretKey::generate());
        let address = Keyring::from_secret_key(SecretKey::generate());

        let blob = encrypt_signed(b"a.txt", &parent, &address).unwrap();
        let name = decrypt_signed(&blob, &parent, &address).unwrap();
        assert_eq!(name, b"a.txt");

        // Verification against an unrelated keyring fails
        let stranger = Keyring::from_secret_key(SecretKey::generate());
        assert!(decrypt_signed(&blob, &parent, &stranger).is_err());
    }

    #[test]
    fn test_merged_keyring_verifies_either_signer() {
        let a = Keyring::from_secret_key(SecretKey::generate());
        let b = Keyring::from_secret_key(SecretKey::generate());
        let merged = Keyring::merged(&[&a, &b]);

        let sig_a = a.sign_detached(b"msg").unwrap();
        let sig_b = b.sign_detached(b"msg").unwrap();
        assert!(merged.verify_detached(b"msg", &sig_a).is_ok());
        assert!(merged.verify_detached(b"msg", &sig_b).is_ok());
    }
}
