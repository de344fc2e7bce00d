//! RustCrypto cryptographic backend.
//!
//! Pure Rust implementations of every algorithm in the default catalog,
//! using crates from the [RustCrypto](https://github.com/RustCrypto)
//! organization plus `x25519-dalek`/`ed25519-dalek` and `num-bigint`.
//!
//! # Cipher suites
//!
//! | id       | AEAD              | digest  | preferred key exchange |
//! |----------|-------------------|---------|------------------------|
//! | `0x0001` | AES-128-GCM       | SHA-256 | X25519                 |
//! | `0x0002` | AES-256-GCM       | SHA-384 | secp384r1              |
//! | `0x0003` | ChaCha20-Poly1305 | SHA-256 | X25519                 |
//!
//! # Key exchange
//!
//! `0` X25519, `1` secp256r1, `2` secp384r1, `3` ffdhe2048.
//!
//! # Certificate formats
//!
//! `0` raw Ed25519, `1` raw ECDSA P-256, `2` raw RSA (PKCS#1), `3` X.509 chain.
//!
//! # Random Number Generation
//!
//! Uses `OsRng` from the `rand` crate.
//!
//! ```
//! use mss::Registry;
//! use mss::crypto::rust_crypto;
//!
//! let registry = Registry::with_defaults();
//! let suite = registry.cipher_suite(rust_crypto::SUITE_AES_128_GCM_SHA256).unwrap();
//! assert_eq!(suite.aead.name(), "AES_128_GCM");
//! ```

mod cipher_suite;
mod hkdf;
mod hmac;
mod kx_group;
mod random;
mod sign;

pub use cipher_suite::{AES_128_GCM, AES_256_GCM, CHACHA20_POLY1305};
pub use hkdf::HKDF_PROVIDER;
pub use hmac::HMAC_PROVIDER;
pub use kx_group::{KX_FFDHE2048, KX_SECP256R1, KX_SECP384R1, KX_X25519};
pub use kx_group::{KX_GROUP_FFDHE2048, KX_GROUP_P256, KX_GROUP_P384, KX_GROUP_X25519};
pub use random::SECURE_RANDOM;
pub use sign::{CERT_ECDSA_P256, CERT_ED25519, CERT_RSA, CERT_X509};
pub use sign::{FORMAT_ECDSA_P256, FORMAT_ED25519, FORMAT_RSA, FORMAT_X509};

use crate::crypto::provider::{CertificateFormat, HashAlgorithm, KeyExchangeAlgorithm};
use crate::registry::CipherSuite;

pub const SUITE_AES_128_GCM_SHA256: u16 = 0x0001;
pub const SUITE_AES_256_GCM_SHA384: u16 = 0x0002;
pub const SUITE_CHACHA20_POLY1305_SHA256: u16 = 0x0003;

/// The default cipher suites, in preference order.
pub fn cipher_suites() -> Vec<CipherSuite> {
    vec![
        CipherSuite {
            id: SUITE_AES_128_GCM_SHA256,
            aead: &AES_128_GCM,
            digest: HashAlgorithm::SHA256,
            key_exchange: KX_X25519,
        },
        CipherSuite {
            id: SUITE_AES_256_GCM_SHA384,
            aead: &AES_256_GCM,
            digest: HashAlgorithm::SHA384,
            key_exchange: KX_SECP384R1,
        },
        CipherSuite {
            id: SUITE_CHACHA20_POLY1305_SHA256,
            aead: &CHACHA20_POLY1305,
            digest: HashAlgorithm::SHA256,
            key_exchange: KX_X25519,
        },
    ]
}

/// The default key exchange groups, in preference order.
pub fn key_exchanges() -> &'static [&'static dyn KeyExchangeAlgorithm] {
    kx_group::ALL_KX_GROUPS
}

/// The default certificate formats.
pub fn certificate_formats() -> &'static [&'static dyn CertificateFormat] {
    sign::ALL_CERTIFICATE_FORMATS
}
