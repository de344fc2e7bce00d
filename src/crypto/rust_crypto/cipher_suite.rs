//! AEAD implementations using RustCrypto.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::ChaCha20Poly1305;

use crate::buffer::{Buf, TmpBuf};
use crate::crypto::provider::{AeadAlgorithm, Cipher};
use crate::crypto::Nonce;

const TAG_LEN: usize = 16;

/// AEAD cipher instance.
enum RustCryptoAead {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
    ChaCha20(Box<ChaCha20Poly1305>),
}

impl std::fmt::Debug for RustCryptoAead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RustCryptoAead::Aes128(_) => f.debug_tuple("AesGcm::Aes128").finish(),
            RustCryptoAead::Aes256(_) => f.debug_tuple("AesGcm::Aes256").finish(),
            RustCryptoAead::ChaCha20(_) => f.debug_tuple("ChaCha20Poly1305").finish(),
        }
    }
}

impl Cipher for RustCryptoAead {
    fn encrypt(&mut self, data: &mut Buf, aad: &[u8], nonce: Nonce) -> Result<(), String> {
        let nonce = chacha20poly1305::Nonce::from_slice(&nonce.0);
        let res = match self {
            RustCryptoAead::Aes128(c) => c.encrypt_in_place(nonce, aad, data),
            RustCryptoAead::Aes256(c) => c.encrypt_in_place(nonce, aad, data),
            RustCryptoAead::ChaCha20(c) => c.encrypt_in_place(nonce, aad, data),
        };
        res.map_err(|_| "AEAD encryption failed".to_string())
    }

    fn decrypt(&mut self, ciphertext: &mut TmpBuf, aad: &[u8], nonce: Nonce) -> Result<(), String> {
        if ciphertext.len() < TAG_LEN {
            return Err(format!("Ciphertext too short: {}", ciphertext.len()));
        }
        let nonce = chacha20poly1305::Nonce::from_slice(&nonce.0);
        // decrypt_in_place removes the tag and shortens the buffer
        let res = match self {
            RustCryptoAead::Aes128(c) => c.decrypt_in_place(nonce, aad, ciphertext),
            RustCryptoAead::Aes256(c) => c.decrypt_in_place(nonce, aad, ciphertext),
            RustCryptoAead::ChaCha20(c) => c.decrypt_in_place(nonce, aad, ciphertext),
        };
        res.map_err(|_| "AEAD decryption failed".to_string())
    }
}

/// AES-128-GCM.
#[derive(Debug)]
pub struct Aes128GcmAead;

impl AeadAlgorithm for Aes128GcmAead {
    fn name(&self) -> &'static str {
        "AES_128_GCM"
    }

    fn key_len(&self) -> usize {
        16
    }

    fn tag_len(&self) -> usize {
        TAG_LEN
    }

    fn create_cipher(&self, key: &[u8]) -> Result<Box<dyn Cipher>, String> {
        let c = Aes128Gcm::new_from_slice(key).map_err(|_| "Invalid AES-128 key".to_string())?;
        Ok(Box::new(RustCryptoAead::Aes128(Box::new(c))))
    }
}

/// AES-256-GCM.
#[derive(Debug)]
pub struct Aes256GcmAead;

impl AeadAlgorithm for Aes256GcmAead {
    fn name(&self) -> &'static str {
        "AES_256_GCM"
    }

    fn key_len(&self) -> usize {
        32
    }

    fn tag_len(&self) -> usize {
        TAG_LEN
    }

    fn create_cipher(&self, key: &[u8]) -> Result<Box<dyn Cipher>, String> {
        let c = Aes256Gcm::new_from_slice(key).map_err(|_| "Invalid AES-256 key".to_string())?;
        Ok(Box::new(RustCryptoAead::Aes256(Box::new(c))))
    }
}

/// ChaCha20-Poly1305 (RFC 8439).
#[derive(Debug)]
pub struct ChaCha20Poly1305Aead;

impl AeadAlgorithm for ChaCha20Poly1305Aead {
    fn name(&self) -> &'static str {
        "CHACHA20_POLY1305"
    }

    fn key_len(&self) -> usize {
        32
    }

    fn tag_len(&self) -> usize {
        TAG_LEN
    }

    fn create_cipher(&self, key: &[u8]) -> Result<Box<dyn Cipher>, String> {
        let c = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| "Invalid ChaCha20 key".to_string())?;
        Ok(Box::new(RustCryptoAead::ChaCha20(Box::new(c))))
    }
}

pub static AES_128_GCM: Aes128GcmAead = Aes128GcmAead;
pub static AES_256_GCM: Aes256GcmAead = Aes256GcmAead;
pub static CHACHA20_POLY1305: ChaCha20Poly1305Aead = ChaCha20Poly1305Aead;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn each_aead_round_trips() {
        let algs: [&dyn AeadAlgorithm; 3] = [&AES_128_GCM, &AES_256_GCM, &CHACHA20_POLY1305];
        for alg in algs {
            let key = vec![3u8; alg.key_len()];
            let mut c = alg.create_cipher(&key).unwrap();
            let mut buf = Buf::from_slice(b"hello");
            c.encrypt(&mut buf, b"aad", Nonce([1; 12])).unwrap();
            assert_eq!(buf.len(), 5 + alg.tag_len());

            let mut tmp = TmpBuf::new(&mut buf);
            c.decrypt(&mut tmp, b"aad", Nonce([1; 12])).unwrap();
            assert_eq!(tmp.as_ref(), b"hello");
        }
    }

    #[test]
    fn wrong_aad_fails() {
        let mut c = AES_256_GCM.create_cipher(&[0; 32]).unwrap();
        let mut buf = Buf::from_slice(b"x");
        c.encrypt(&mut buf, &[0x30], Nonce([0; 12])).unwrap();
        let mut tmp = TmpBuf::new(&mut buf);
        assert!(c.decrypt(&mut tmp, &[0x31], Nonce([0; 12])).is_err());
    }
}
