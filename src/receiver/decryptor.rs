//! RAOP audio payload decryption
//!
//! Payloads are AES-128-CBC encrypted with the session key. The IV is reset
//! for every packet and any trailing partial block is sent in the clear.

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, KeyInit};
use bytes::{BufMut, Bytes, BytesMut};

const BLOCK_SIZE: usize = 16;

/// Per-session payload decryptor
#[derive(Clone)]
pub struct AudioDecryptor {
    cipher: Option<Aes128>,
    iv: [u8; BLOCK_SIZE],
}

impl AudioDecryptor {
    /// Create a decryptor for the session key and IV
    #[must_use]
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self {
            cipher: Some(Aes128::new(GenericArray::from_slice(&key))),
            iv,
        }
    }

    /// Decryptor for unencrypted sessions; payloads pass through unchanged
    #[must_use]
    pub fn passthrough() -> Self {
        Self {
            cipher: None,
            iv: [0; BLOCK_SIZE],
        }
    }

    /// Whether payloads are decrypted
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Decrypt one packet payload
    #[must_use]
    pub fn decrypt(&self, encrypted: &[u8]) -> Bytes {
        let Some(cipher) = &self.cipher else {
            return Bytes::copy_from_slice(encrypted);
        };

        let encrypted_len = (encrypted.len() / BLOCK_SIZE) * BLOCK_SIZE;
        let mut decrypted = BytesMut::with_capacity(encrypted.len());
        let mut prev_block = self.iv;

        for chunk in encrypted[..encrypted_len].chunks_exact(BLOCK_SIZE) {
            let mut block = GenericArray::clone_from_slice(chunk);
            cipher.decrypt_block(&mut block);

            for (b, p) in block.iter_mut().zip(prev_block.iter()) {
                *b ^= *p;
            }
            decrypted.put_slice(&block);
            prev_block.copy_from_slice(chunk);
        }

        decrypted.put_slice(&encrypted[encrypted_len..]);
        decrypted.freeze()
    }
}

impl std::fmt::Debug for AudioDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioDecryptor")
            .field("encrypted", &self.is_encrypted())
            .finish_non_exhaustive()
    }
}

/// Encrypt a payload the way a RAOP sender does
///
/// Used by the mock sender.
#[must_use]
pub fn encrypt_payload(key: [u8; 16], iv: [u8; 16], plain: &[u8]) -> Bytes {
    use aes::cipher::BlockEncrypt;

    let cipher = Aes128::new(GenericArray::from_slice(&key));
    let encrypted_len = (plain.len() / BLOCK_SIZE) * BLOCK_SIZE;
    let mut out = BytesMut::with_capacity(plain.len());
    let mut prev_block = iv;

    for chunk in plain[..encrypted_len].chunks_exact(BLOCK_SIZE) {
        let mut block = GenericArray::clone_from_slice(chunk);
        for (b, p) in block.iter_mut().zip(prev_block.iter()) {
            *b ^= *p;
        }
        cipher.encrypt_block(&mut block);
        prev_block.copy_from_slice(&block);
        out.put_slice(&block);
    }

    out.put_slice(&plain[encrypted_len..]);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [0x01; 16];
    const IV: [u8; 16] = [0x02; 16];

    #[test]
    fn test_decrypt_round_trip() {
        let plain: Vec<u8> = (0..40u8).collect();
        let encrypted = encrypt_payload(KEY, IV, &plain);
        assert_ne!(&encrypted[..32], &plain[..32]);
        // Trailing partial block is left in the clear
        assert_eq!(&encrypted[32..], &plain[32..]);

        let decryptor = AudioDecryptor::new(KEY, IV);
        assert_eq!(decryptor.decrypt(&encrypted), plain);
    }

    #[test]
    fn test_iv_not_chained_between_packets() {
        let plain = [0x55u8; 32];
        let decryptor = AudioDecryptor::new(KEY, IV);
        let encrypted = encrypt_payload(KEY, IV, &plain);

        assert_eq!(decryptor.decrypt(&encrypted), &plain[..]);
        assert_eq!(decryptor.decrypt(&encrypted), &plain[..]);
    }

    #[test]
    fn test_short_payload_unencrypted() {
        let decryptor = AudioDecryptor::new(KEY, IV);
        let short_data = [0x03; 10];
        assert_eq!(decryptor.decrypt(&short_data), &short_data[..]);
        assert!(decryptor.decrypt(&[]).is_empty());
    }

    #[test]
    fn test_passthrough() {
        let decryptor = AudioDecryptor::passthrough();
        assert!(!decryptor.is_encrypted());
        assert_eq!(decryptor.decrypt(&[1, 2, 3]), &[1u8, 2, 3][..]);
    }
}
