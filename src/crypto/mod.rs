//! Cryptographic primitives and helpers used by the MSS engines.

use std::ops::Deref;

pub mod provider;
pub mod rust_crypto;

mod keys;
mod record;
mod transcript;
mod trust;

pub use keys::{KeyAlgorithm, KeyPair, PublicKey};
pub use trust::TrustStore;

pub(crate) use record::RecordCipher;
pub(crate) use transcript::TranscriptSecret;

pub use provider::{ActiveKeyExchange, AeadAlgorithm, Cipher, CryptoSafe};
pub use provider::{CertificateFormat, HashAlgorithm, KeyExchangeAlgorithm};
pub use provider::{HkdfProvider, HmacProvider, SecureRandom};

/// Length of every record IV and AEAD nonce.
pub const IV_LEN: usize = 12;

/// Full AEAD nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce(pub [u8; IV_LEN]);

impl Nonce {
    /// nonce = iv XOR pad_left(seq, iv_len)
    pub(crate) fn xor(iv: &[u8; IV_LEN], seq: u64) -> Self {
        let mut nonce = *iv;
        let seq_bytes = seq.to_be_bytes();
        for i in 0..8 {
            nonce[4 + i] ^= seq_bytes[i];
        }
        Self(nonce)
    }
}

impl Deref for Nonce {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
