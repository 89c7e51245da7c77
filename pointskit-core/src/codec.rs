//! Obfuscation codec for payloads crossing into storage.
//!
//! Every blob the engine persists passes through here first. The codec
//! derives a per-call keystream by iteratively hashing `secret || salt` a
//! fixed number of rounds, then XORs it against the UTF-8 payload bytes and
//! emits `salt_hex:cipher_hex`.
//!
//! This is obfuscation, not confidentiality-grade encryption: it raises
//! the bar against casual tampering and hand-editing of stored files. If
//! genuine confidentiality ever becomes a requirement, replace this layer
//! with a vetted AEAD primitive.

use secrecy::{ExposeSecret, SecretBox};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::defaults::{KEYSTREAM_ROUNDS, MAX_CODEC_PAYLOAD_BYTES};
use crate::error::{LedgerError, LedgerResult};

/// Salt length in bytes, prepended (hex-encoded) to every payload.
const SALT_LEN: usize = 16;

/// Keystream-based encode/decode layer bound to one device secret.
pub struct ObfuscationCodec {
    secret: SecretBox<[u8; 32]>,
}

impl ObfuscationCodec {
    /// Creates a codec bound to the given device secret.
    #[must_use]
    pub const fn new(secret: SecretBox<[u8; 32]>) -> Self {
        Self { secret }
    }

    /// Encodes a payload into `salt_hex:cipher_hex` form.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PayloadTooLarge`] for payloads above the
    /// fixed size bound.
    pub fn encode(&self, plaintext: &str) -> LedgerResult<String> {
        let bytes = plaintext.as_bytes();
        if bytes.len() > MAX_CODEC_PAYLOAD_BYTES {
            return Err(LedgerError::PayloadTooLarge {
                size: bytes.len(),
                limit: MAX_CODEC_PAYLOAD_BYTES,
            });
        }

        let mut salt = [0u8; SALT_LEN];
        getrandom::getrandom(&mut salt)
            .map_err(|e| LedgerError::codec(format!("system rng unavailable: {e}")))?;

        let keystream = self.keystream(&salt, bytes.len());
        let ciphertext: Vec<u8> = bytes
            .iter()
            .zip(keystream.iter())
            .map(|(p, k)| p ^ k)
            .collect();

        Ok(format!("{}:{}", hex::encode(salt), hex::encode(ciphertext)))
    }

    /// Decodes a payload produced by [`encode`](Self::encode) under the
    /// same device secret.
    ///
    /// # Errors
    ///
    /// Returns a codec error for malformed input, oversized payloads, or
    /// ciphertext that does not decode to valid UTF-8.
    pub fn decode(&self, encoded: &str) -> LedgerResult<String> {
        let (salt_hex, cipher_hex) = encoded
            .split_once(':')
            .ok_or_else(|| LedgerError::codec("missing salt separator"))?;

        let salt = hex::decode(salt_hex)
            .map_err(|e| LedgerError::codec(format!("invalid salt hex: {e}")))?;
        if salt.len() != SALT_LEN {
            return Err(LedgerError::codec(format!(
                "salt must be {SALT_LEN} bytes, got {}",
                salt.len()
            )));
        }

        let ciphertext = hex::decode(cipher_hex)
            .map_err(|e| LedgerError::codec(format!("invalid ciphertext hex: {e}")))?;
        if ciphertext.len() > MAX_CODEC_PAYLOAD_BYTES {
            return Err(LedgerError::PayloadTooLarge {
                size: ciphertext.len(),
                limit: MAX_CODEC_PAYLOAD_BYTES,
            });
        }

        let keystream = self.keystream(&salt, ciphertext.len());
        let plaintext: Vec<u8> = ciphertext
            .iter()
            .zip(keystream.iter())
            .map(|(c, k)| c ^ k)
            .collect();

        String::from_utf8(plaintext)
            .map_err(|_| LedgerError::codec("decoded payload is not valid UTF-8"))
    }

    /// Derives a keystream of `len` bytes from the secret and salt.
    ///
    /// The seed is `secret || salt` hashed for a fixed round count; the
    /// stream expands the seed with a little-endian block counter.
    fn keystream(&self, salt: &[u8], len: usize) -> Zeroizing<Vec<u8>> {
        let mut seed = Zeroizing::new([0u8; 32]);
        {
            let mut hasher = Sha256::new();
            hasher.update(self.secret.expose_secret());
            hasher.update(salt);
            seed.copy_from_slice(&hasher.finalize());
        }
        for _ in 1..KEYSTREAM_ROUNDS {
            let mut hasher = Sha256::new();
            hasher.update(*seed);
            hasher.update(salt);
            seed.copy_from_slice(&hasher.finalize());
        }

        let mut stream = Zeroizing::new(Vec::with_capacity(len));
        let mut counter = 0u64;
        while stream.len() < len {
            let mut hasher = Sha256::new();
            hasher.update(*seed);
            hasher.update(counter.to_le_bytes());
            stream.extend_from_slice(&hasher.finalize());
            counter += 1;
        }
        stream.truncate(len);
        stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec_with(byte: u8) -> ObfuscationCodec {
        ObfuscationCodec::new(SecretBox::new(Box::new([byte; 32])))
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let codec = codec_with(0x42);
        let payload = r#"{"balance":2500,"total_earned":2500}"#;

        let encoded = codec.encode(payload).unwrap();
        assert_ne!(encoded, payload);
        assert!(encoded.contains(':'));

        assert_eq!(codec.decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn test_encode_is_salted() {
        let codec = codec_with(0x42);
        let a = codec.encode("same payload").unwrap();
        let b = codec.encode("same payload").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_decode_with_wrong_secret_fails_or_garbles() {
        let codec_a = codec_with(0x01);
        let codec_b = codec_with(0x02);

        let encoded = codec_a.encode("plain text payload").unwrap();
        // Wrong secret either fails UTF-8 validation or yields garbage,
        // never the original payload.
        match codec_b.decode(&encoded) {
            Ok(garbled) => assert_ne!(garbled, "plain text payload"),
            Err(LedgerError::Codec { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let codec = codec_with(0x42);
        let huge = "x".repeat(MAX_CODEC_PAYLOAD_BYTES + 1);
        assert!(matches!(
            codec.encode(&huge),
            Err(LedgerError::PayloadTooLarge { .. })
        ));
    }

    #[test_case::test_case("no-separator"; "missing separator")]
    #[test_case::test_case("abcd:zzzz"; "non hex ciphertext")]
    #[test_case::test_case("zzzz:00ff"; "non hex salt")]
    #[test_case::test_case("aabb:00ff"; "short salt")]
    fn test_malformed_input_rejected(encoded: &str) {
        let codec = codec_with(0x42);
        assert!(codec.decode(encoded).is_err());
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let codec = codec_with(0x42);
        let encoded = codec.encode("").unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), "");
    }
}
