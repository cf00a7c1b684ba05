//! Blob codec (§4.1): framing, authenticated encryption and optional
//! compression of a single blob's payload.
//!
//! Framing follows this engine's direct ancestor's on-disk blob header
//! format (`MAGIC || CRC32 [|| NONCE || TAG] || payload`), generalized
//! from a fixed per-repository key to the `unique_id ⊕ hash(payload)`
//! convergent nonce this design requires for cross-writer dedup (§4.1,
//! REDESIGN FLAGS). Four magic values distinguish {uncompressed, zstd} x
//! {plain, encrypted} so `decode` dispatches on the first eight bytes alone.

use pvault_api_types::{CoreError, ErrorKind};
use pvault_tools::crypt::CryptConfig;

// sha256(b"pvault uncompressed blob v1")[0..8]
const MAGIC_PLAIN: [u8; 8] = [0x8f, 0x2a, 0x11, 0x6d, 0x4c, 0x03, 0x77, 0xe9];
// sha256(b"pvault zstd compressed blob v1")[0..8]
const MAGIC_COMPRESSED: [u8; 8] = [0x4b, 0xd7, 0x9e, 0x02, 0x5f, 0x81, 0x6a, 0x33];
// sha256(b"pvault encrypted blob v1")[0..8]
const MAGIC_ENCRYPTED: [u8; 8] = [0x2e, 0x90, 0xc4, 0x77, 0x11, 0xfa, 0x58, 0xbd];
// sha256(b"pvault zstd compressed encrypted blob v1")[0..8]
const MAGIC_COMPRESSED_ENCRYPTED: [u8; 8] = [0x71, 0x0c, 0xaf, 0x9e, 0x4d, 0x26, 0x88, 0x15];

const CRC_OFFSET: usize = 8;
const PLAIN_HEADER_LEN: usize = 12; // magic(8) + crc(4)
const ENCRYPTED_HEADER_LEN: usize = 12 + 16 + 16; // + nonce(16) + tag(16)

fn header_len(magic: &[u8; 8]) -> Result<usize, CoreError> {
    match *magic {
        MAGIC_PLAIN | MAGIC_COMPRESSED => Ok(PLAIN_HEADER_LEN),
        MAGIC_ENCRYPTED | MAGIC_COMPRESSED_ENCRYPTED => Ok(ENCRYPTED_HEADER_LEN),
        _ => Err(CoreError::new(ErrorKind::UnknownAlgorithm, "unrecognized blob magic")),
    }
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Encode `payload` as a framed blob, optionally compressed and/or
/// authenticated-encrypted.
///
/// `unique_id` must be 16 deterministic bytes identifying this blob's
/// "slot" (e.g. derived from the content-class prefix); combined with
/// `hash(payload)` it forms the convergent nonce, so two independent
/// writers of the same payload under the same unique_id produce byte-
/// identical ciphertext.
pub fn encode(
    payload: &[u8],
    key: Option<&CryptConfig>,
    unique_id: &[u8; 16],
    compress: bool,
) -> Result<Vec<u8>, CoreError> {
    let compressed = if compress {
        let out = zstd::bulk::compress(payload, 1)
            .map_err(|e| CoreError::wrap(ErrorKind::Corrupted, "zstd compress", e.into()))?;
        if out.len() < payload.len() {
            Some(out)
        } else {
            None
        }
    } else {
        None
    };

    let (is_compressed, body) = match &compressed {
        Some(c) => (true, c.as_slice()),
        None => (false, payload),
    };

    let mut out = Vec::with_capacity(body.len() + ENCRYPTED_HEADER_LEN);

    match key {
        None => {
            let magic = if is_compressed { MAGIC_COMPRESSED } else { MAGIC_PLAIN };
            out.extend_from_slice(&magic);
            out.extend_from_slice(&[0u8; 4]); // crc placeholder
            out.extend_from_slice(body);
            let crc = crc32(&out[PLAIN_HEADER_LEN..]);
            out[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        }
        Some(cfg) => {
            let magic = if is_compressed {
                MAGIC_COMPRESSED_ENCRYPTED
            } else {
                MAGIC_ENCRYPTED
            };
            let nonce = pvault_tools::crypt::convergent_nonce(unique_id, payload);

            let mut crypter = cfg
                .data_crypter(&nonce, openssl::symm::Mode::Encrypt)
                .map_err(|e| CoreError::wrap(ErrorKind::UnknownAlgorithm, "init AEAD encrypt", e))?;

            let mut ciphertext = vec![0u8; body.len() + 32];
            let mut written = crypter
                .update(body, &mut ciphertext)
                .map_err(|e| CoreError::wrap(ErrorKind::Corrupted, "AEAD update", e.into()))?;
            written += crypter
                .finalize(&mut ciphertext[written..])
                .map_err(|e| CoreError::wrap(ErrorKind::Corrupted, "AEAD finalize", e.into()))?;
            ciphertext.truncate(written);

            let mut tag = [0u8; 16];
            crypter
                .get_tag(&mut tag)
                .map_err(|e| CoreError::wrap(ErrorKind::Corrupted, "AEAD get_tag", e.into()))?;

            out.extend_from_slice(&magic);
            out.extend_from_slice(&[0u8; 4]);
            out.extend_from_slice(&nonce);
            out.extend_from_slice(&tag);
            out.extend_from_slice(&ciphertext);

            let crc = crc32(&out[ENCRYPTED_HEADER_LEN..]);
            out[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        }
    }

    Ok(out)
}

/// Decode a framed blob produced by `encode`, verifying the CRC and (when
/// encrypted) the AEAD tag.
pub fn decode(blob: &[u8], key: Option<&CryptConfig>) -> Result<Vec<u8>, CoreError> {
    if blob.len() < PLAIN_HEADER_LEN {
        return Err(CoreError::new(ErrorKind::Corrupted, "blob shorter than header"));
    }
    let magic: [u8; 8] = blob[0..8].try_into().unwrap();
    let header_len = header_len(&magic)?;
    if blob.len() < header_len {
        return Err(CoreError::new(ErrorKind::Corrupted, "blob shorter than its own header"));
    }
    let stored_crc = u32::from_le_bytes(blob[CRC_OFFSET..CRC_OFFSET + 4].try_into().unwrap());
    let actual_crc = crc32(&blob[header_len..]);
    if stored_crc != actual_crc {
        return Err(CoreError::new(ErrorKind::Corrupted, "blob CRC mismatch"));
    }

    match magic {
        MAGIC_PLAIN => Ok(blob[header_len..].to_vec()),
        MAGIC_COMPRESSED => zstd::stream::decode_all(&blob[header_len..])
            .map_err(|e| CoreError::wrap(ErrorKind::Corrupted, "zstd decompress", e.into())),
        MAGIC_ENCRYPTED | MAGIC_COMPRESSED_ENCRYPTED => {
            let cfg = key.ok_or_else(|| {
                CoreError::new(ErrorKind::AuthenticationFailed, "encrypted blob needs a key")
            })?;
            let nonce: [u8; 16] = blob[12..28].try_into().unwrap();
            let tag: [u8; 16] = blob[28..44].try_into().unwrap();
            let ciphertext = &blob[header_len..];

            let mut crypter = cfg
                .data_crypter(&nonce, openssl::symm::Mode::Decrypt)
                .map_err(|e| CoreError::wrap(ErrorKind::AuthenticationFailed, "init AEAD decrypt", e))?;
            crypter
                .set_tag(&tag)
                .map_err(|e| CoreError::wrap(ErrorKind::AuthenticationFailed, "set AEAD tag", e.into()))?;

            let mut plaintext = vec![0u8; ciphertext.len() + 32];
            let mut written = crypter
                .update(ciphertext, &mut plaintext)
                .map_err(|e| CoreError::wrap(ErrorKind::AuthenticationFailed, "AEAD update", e.into()))?;
            written += crypter.finalize(&mut plaintext[written..]).map_err(|e| {
                CoreError::wrap(ErrorKind::AuthenticationFailed, "AEAD tag verification failed", e.into())
            })?;
            plaintext.truncate(written);

            if magic == MAGIC_COMPRESSED_ENCRYPTED {
                zstd::stream::decode_all(&plaintext[..])
                    .map_err(|e| CoreError::wrap(ErrorKind::Corrupted, "zstd decompress", e.into()))
            } else {
                Ok(plaintext)
            }
        }
        _ => Err(CoreError::new(ErrorKind::UnknownAlgorithm, "unrecognized blob magic")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_round_trip() {
        let blob = encode(b"hello world", None, &[0u8; 16], false).unwrap();
        assert_eq!(decode(&blob, None).unwrap(), b"hello world");
    }

    #[test]
    fn compressed_round_trip() {
        let payload = vec![b'a'; 4096];
        let blob = encode(&payload, None, &[0u8; 16], true).unwrap();
        assert_eq!(decode(&blob, None).unwrap(), payload);
    }

    #[test]
    fn encrypted_round_trip() {
        let cfg = CryptConfig::new([9u8; 32]).unwrap();
        let blob = encode(b"top secret payload", Some(&cfg), &[1u8; 16], false).unwrap();
        assert_eq!(decode(&blob, Some(&cfg)).unwrap(), b"top secret payload");
    }

    #[test]
    fn encrypted_compressed_round_trip() {
        let cfg = CryptConfig::new([9u8; 32]).unwrap();
        let payload = vec![b'x'; 8192];
        let blob = encode(&payload, Some(&cfg), &[2u8; 16], true).unwrap();
        assert_eq!(decode(&blob, Some(&cfg)).unwrap(), payload);
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let cfg_a = CryptConfig::new([1u8; 32]).unwrap();
        let cfg_b = CryptConfig::new([2u8; 32]).unwrap();
        let blob = encode(b"payload", Some(&cfg_a), &[3u8; 16], false).unwrap();
        let err = decode(&blob, Some(&cfg_b)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    }

    #[test]
    fn tampered_bytes_fail_crc_or_authentication() {
        let blob = encode(b"hello world", None, &[0u8; 16], false).unwrap();
        let mut tampered = blob.clone();
        *tampered.last_mut().unwrap() ^= 0xff;
        let err = decode(&tampered, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupted);
    }

    #[test]
    fn convergent_encryption_produces_identical_ciphertext() {
        let cfg = CryptConfig::new([5u8; 32]).unwrap();
        let a = encode(b"same bytes", Some(&cfg), &[7u8; 16], false).unwrap();
        let b = encode(b"same bytes", Some(&cfg), &[7u8; 16], false).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_magic_is_rejected() {
        let mut junk = vec![0xff; 16];
        junk[8..12].copy_from_slice(&crc32(&junk[12..]).to_le_bytes());
        let err = decode(&junk, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownAlgorithm);
    }
}
