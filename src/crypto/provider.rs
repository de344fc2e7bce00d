//! Cryptographic provider traits for pluggable crypto backends.
//!
//! Every algorithm MSS negotiates is reached through one of these traits.
//! A [`Registry`](crate::Registry) maps wire ids to `&'static dyn` instances
//! of them, so a custom backend only needs static values implementing the
//! traits below.
//!
//! # Architecture
//!
//! - **AEAD** ([`AeadAlgorithm`]): factory for [`Cipher`] instances
//! - **Key exchange** ([`KeyExchangeAlgorithm`]): factory for [`ActiveKeyExchange`]
//! - **Certificate format** ([`CertificateFormat`]): wire encoding of identities
//! - **HKDF** ([`HkdfProvider`]), **HMAC** ([`HmacProvider`]),
//!   **random** ([`SecureRandom`])
//!
//! ## Example: Custom AEAD
//!
//! ```
//! use mss::{Buf, TmpBuf};
//! use mss::crypto::{AeadAlgorithm, Cipher, Nonce};
//!
//! #[derive(Debug)]
//! struct NullCipher;
//!
//! impl Cipher for NullCipher {
//!     fn encrypt(&mut self, _: &mut Buf, _: &[u8], _: Nonce) -> Result<(), String> {
//!         Ok(())
//!     }
//!     fn decrypt(&mut self, _: &mut TmpBuf, _: &[u8], _: Nonce) -> Result<(), String> {
//!         Ok(())
//!     }
//! }
//!
//! #[derive(Debug)]
//! struct Null;
//!
//! impl AeadAlgorithm for Null {
//!     fn name(&self) -> &'static str {
//!         "NULL"
//!     }
//!     fn key_len(&self) -> usize {
//!         16
//!     }
//!     fn tag_len(&self) -> usize {
//!         0
//!     }
//!     fn create_cipher(&self, _key: &[u8]) -> Result<Box<dyn Cipher>, String> {
//!         Ok(Box::new(NullCipher))
//!     }
//! }
//!
//! static NULL: Null = Null;
//! ```
//!
//! # Thread Safety
//!
//! All provider traits require `Send + Sync + UnwindSafe + RefUnwindSafe`.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};

use crate::buffer::{Buf, TmpBuf};
use crate::crypto::keys::{KeyPair, PublicKey};
use crate::crypto::trust::TrustStore;
use crate::crypto::Nonce;

/// Marker trait for types that are safe to use in crypto provider components.
///
/// Automatically implemented for all types that satisfy the bounds.
pub trait CryptoSafe: Send + Sync + Debug + UnwindSafe + RefUnwindSafe {}

impl<T: Send + Sync + Debug + UnwindSafe + RefUnwindSafe> CryptoSafe for T {}

/// Hash function used by a cipher suite for HKDF and HMAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    SHA256,
    SHA384,
}

impl HashAlgorithm {
    /// Digest length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::SHA256 => 32,
            HashAlgorithm::SHA384 => 48,
        }
    }
}

/// AEAD cipher for in-place encryption/decryption.
pub trait Cipher: CryptoSafe {
    /// Encrypt plaintext in-place, appending authentication tag.
    fn encrypt(&mut self, plaintext: &mut Buf, aad: &[u8], nonce: Nonce) -> Result<(), String>;

    /// Decrypt ciphertext in-place, verifying and removing authentication tag.
    fn decrypt(&mut self, ciphertext: &mut TmpBuf, aad: &[u8], nonce: Nonce)
        -> Result<(), String>;
}

/// Active key exchange instance (ephemeral keypair for one handshake).
pub trait ActiveKeyExchange: CryptoSafe {
    /// Get the public value for this exchange.
    fn pub_key(&self) -> &[u8];

    /// Complete exchange with peer's public value, returning shared secret.
    fn complete(self: Box<Self>, peer_pub: &[u8], out: &mut Buf) -> Result<(), String>;

    /// Wire id of the algorithm.
    fn id(&self) -> u8;
}

/// AEAD algorithm (factory for Cipher instances).
pub trait AeadAlgorithm: CryptoSafe {
    fn name(&self) -> &'static str;

    /// Key length in bytes. The IV is always 12 bytes.
    fn key_len(&self) -> usize;

    /// Authentication tag length in bytes.
    fn tag_len(&self) -> usize;

    /// Create a cipher instance with the given key.
    fn create_cipher(&self, key: &[u8]) -> Result<Box<dyn Cipher>, String>;
}

/// Key exchange algorithm (factory for ActiveKeyExchange).
pub trait KeyExchangeAlgorithm: CryptoSafe {
    /// Wire id, 0..=31. Doubles as the bit position in the supported mask.
    fn id(&self) -> u8;

    fn name(&self) -> &'static str;

    /// Start a new key exchange, generating an ephemeral keypair.
    /// The provided `buf` will be used to store the public value.
    fn start_exchange(&self, buf: Buf) -> Result<Box<dyn ActiveKeyExchange>, String>;
}

/// Wire encoding of an identity (a public key, possibly inside a certificate).
pub trait CertificateFormat: CryptoSafe {
    /// Wire id, 0..=31. Doubles as the bit position in the supported mask.
    fn id(&self) -> u8;

    fn name(&self) -> &'static str;

    /// Encode the public side of `key` in this format.
    ///
    /// Returns `None` when the key cannot be expressed in this format, for
    /// instance an RSA key offered for the Ed25519 format, or a raw key
    /// offered for the X.509 format.
    fn encode(&self, key: &KeyPair) -> Option<Vec<u8>>;

    /// Decode a peer identity. Formats carrying certificates validate them
    /// against `trust`.
    fn decode(&self, data: &[u8], trust: &TrustStore) -> Result<PublicKey, String>;
}

/// HKDF provider (RFC 5869).
pub trait HkdfProvider: CryptoSafe {
    /// PRK = HKDF-Extract(salt, IKM)
    fn hkdf_extract(
        &self,
        hash: HashAlgorithm,
        salt: &[u8],
        ikm: &[u8],
        out: &mut Buf,
    ) -> Result<(), String>;

    /// OKM = HKDF-Expand(PRK, info, L)
    fn hkdf_expand(
        &self,
        hash: HashAlgorithm,
        prk: &[u8],
        info: &[u8],
        out: &mut Buf,
        output_len: usize,
    ) -> Result<(), String>;
}

/// HMAC provider.
pub trait HmacProvider: CryptoSafe {
    /// Compute HMAC-SHA256(key, data) and return the result.
    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Result<[u8; 32], String>;

    /// Compute HMAC with the given hash, writing the tag to `out`.
    fn hmac(&self, hash: HashAlgorithm, key: &[u8], data: &[u8], out: &mut Buf)
        -> Result<(), String>;
}

/// Secure random number generator.
pub trait SecureRandom: CryptoSafe {
    /// Fill buffer with cryptographically secure random bytes.
    fn fill(&self, buf: &mut [u8]) -> Result<(), String>;
}
