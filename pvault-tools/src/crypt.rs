//! Wrappers for OpenSSL crypto primitives used by the blob codec.
//!
//! Cipher is AES-256-GCM throughout: fast, and authenticated, so a blob
//! cannot be substituted or truncated by an attacker controlling the
//! underlying object store without the tag check failing.

use anyhow::Error;
use openssl::hash::MessageDigest;
use openssl::pkcs5::pbkdf2_hmac;
use openssl::symm::{Cipher, Crypter, Mode};

// sha256(b"pvault content fingerprint namespace")
const FINGERPRINT_INPUT: [u8; 32] = [
    110, 208, 239, 119, 71, 31, 255, 77, 85, 199, 168, 254, 74, 157, 182, 33, 97, 64, 127, 19, 76,
    114, 93, 223, 48, 153, 45, 37, 236, 69, 237, 38,
];

/// Holds the per-repository content-encryption key and derived material
/// used to fingerprint payloads and perform authenticated encryption.
pub struct CryptConfig {
    cipher: Cipher,
    // Secret key that provides the ContentID digest name space; derived
    // from enc_key so that leaking a digest never leaks the encryption key.
    id_key: [u8; 32],
    id_pkey: openssl::pkey::PKey<openssl::pkey::Private>,
    enc_key: [u8; 32],
}

impl CryptConfig {
    /// Create a new instance from a raw 32-byte repository encryption key.
    pub fn new(enc_key: [u8; 32]) -> Result<Self, Error> {
        let mut id_key = [0u8; 32];

        pbkdf2_hmac(
            &enc_key,
            b"_id_key",
            10,
            MessageDigest::sha256(),
            &mut id_key,
        )?;

        let id_pkey = openssl::pkey::PKey::hmac(&id_key).unwrap();

        Ok(Self {
            id_key,
            id_pkey,
            enc_key,
            cipher: Cipher::aes_256_gcm(),
        })
    }

    pub fn cipher(&self) -> &Cipher {
        &self.cipher
    }

    pub fn enc_key(&self) -> &[u8; 32] {
        &self.enc_key
    }

    /// Compute the keyed hash that forms a ContentID's fingerprint:
    /// `sha256(payload || id_key)`. The key comes last, avoiding length-
    /// extension style ambiguity between payloads that share a prefix.
    pub fn compute_digest(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = openssl::sha::Sha256::new();
        hasher.update(data);
        hasher.update(&self.id_key);
        hasher.finish()
    }

    pub fn data_signer(&self) -> openssl::sign::Signer {
        openssl::sign::Signer::new(MessageDigest::sha256(), &self.id_pkey).unwrap()
    }

    /// HMAC-SHA256 over `data` using the id-key namespace.
    pub fn compute_auth_tag(&self, data: &[u8]) -> [u8; 32] {
        let mut signer = self.data_signer();
        signer.update(data).unwrap();
        let mut tag = [0u8; 32];
        signer.sign(&mut tag).unwrap();
        tag
    }

    /// Fingerprint of the encryption key itself, used to detect whether a
    /// locally decrypted key record actually unlocks this repository.
    pub fn fingerprint(&self) -> [u8; 32] {
        self.compute_digest(&FINGERPRINT_INPUT)
    }

    pub fn data_crypter(&self, iv: &[u8; 16], mode: Mode) -> Result<Crypter, Error> {
        let mut crypter = openssl::symm::Crypter::new(self.cipher, mode, &self.enc_key, Some(iv))?;
        crypter.aad_update(b"")?;
        Ok(crypter)
    }
}

/// Deterministic nonce derivation for convergent encryption: `unique_id XOR
/// sha256(payload)[0..16]`. Two independent writers encoding the same
/// payload under the same `unique_id` always produce the same nonce and
/// therefore the same ciphertext, which is what makes pack-level
/// deduplication of identical content possible. `unique_id` is *not*
/// random; callers derive it deterministically (e.g. from a content-class
/// prefix byte) so repeated calls converge.
pub fn convergent_nonce(unique_id: &[u8; 16], payload: &[u8]) -> [u8; 16] {
    let digest = openssl::sha::sha256(payload);
    let mut nonce = [0u8; 16];
    for i in 0..16 {
        nonce[i] = unique_id[i] ^ digest[i];
    }
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_for_same_key_and_payload() {
        let cfg = CryptConfig::new([7u8; 32]).unwrap();
        let a = cfg.compute_digest(b"hello world");
        let b = cfg.compute_digest(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn digest_differs_across_keys() {
        let cfg_a = CryptConfig::new([1u8; 32]).unwrap();
        let cfg_b = CryptConfig::new([2u8; 32]).unwrap();
        assert_ne!(cfg_a.compute_digest(b"x"), cfg_b.compute_digest(b"x"));
    }

    #[test]
    fn convergent_nonce_is_deterministic() {
        let unique_id = [9u8; 16];
        let a = convergent_nonce(&unique_id, b"payload");
        let b = convergent_nonce(&unique_id, b"payload");
        assert_eq!(a, b);
    }

    #[test]
    fn convergent_nonce_differs_per_payload() {
        let unique_id = [9u8; 16];
        let a = convergent_nonce(&unique_id, b"payload-a");
        let b = convergent_nonce(&unique_id, b"payload-b");
        assert_ne!(a, b);
    }
}
