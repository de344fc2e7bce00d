use std::collections::BTreeMap;
use std::fmt;

use crate::crypto::provider::{AeadAlgorithm, CertificateFormat, HashAlgorithm};
use crate::crypto::provider::{HkdfProvider, HmacProvider, KeyExchangeAlgorithm, SecureRandom};
use crate::crypto::rust_crypto;
use crate::Error;

/// Highest id usable in the u32 capability masks.
const MAX_MASK_ID: u8 = 31;

/// A cipher suite: an AEAD, the hash for the key schedule and the key
/// exchange group a client tries first when it offers this suite first.
#[derive(Clone, Copy)]
pub struct CipherSuite {
    pub id: u16,
    pub aead: &'static dyn AeadAlgorithm,
    pub digest: HashAlgorithm,
    pub key_exchange: u8,
}

impl fmt::Debug for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherSuite")
            .field("id", &format_args!("{:#06x}", self.id))
            .field("aead", &self.aead.name())
            .field("digest", &self.digest)
            .field("key_exchange", &self.key_exchange)
            .finish()
    }
}

/// Tables of the algorithms an engine may negotiate, keyed by wire id.
///
/// Tables are append-only: an id, once registered, keeps its meaning.
/// Engines share a registry read-only through [`Config`](crate::Config).
///
/// ```
/// use mss::{AlertCode, Error, Registry};
/// use mss::crypto::rust_crypto;
///
/// let mut registry = Registry::with_defaults();
/// let err = registry
///     .register_key_exchange(&rust_crypto::KX_GROUP_X25519)
///     .unwrap_err();
/// assert!(matches!(err, Error::AlreadyRegistered { .. }));
/// ```
#[derive(Clone)]
pub struct Registry {
    suites: BTreeMap<u16, CipherSuite>,
    key_exchanges: BTreeMap<u8, &'static dyn KeyExchangeAlgorithm>,
    formats: BTreeMap<u8, &'static dyn CertificateFormat>,
    hkdf: &'static dyn HkdfProvider,
    hmac: &'static dyn HmacProvider,
    random: &'static dyn SecureRandom,
}

impl Registry {
    /// An empty registry using the given primitives for the key schedule.
    pub fn new(
        hkdf: &'static dyn HkdfProvider,
        hmac: &'static dyn HmacProvider,
        random: &'static dyn SecureRandom,
    ) -> Self {
        Registry {
            suites: BTreeMap::new(),
            key_exchanges: BTreeMap::new(),
            formats: BTreeMap::new(),
            hkdf,
            hmac,
            random,
        }
    }

    /// The RustCrypto catalog, see [`rust_crypto`].
    pub fn with_defaults() -> Self {
        let mut registry = Registry::new(
            &rust_crypto::HKDF_PROVIDER,
            &rust_crypto::HMAC_PROVIDER,
            &rust_crypto::SECURE_RANDOM,
        );
        for suite in rust_crypto::cipher_suites() {
            registry.suites.insert(suite.id, suite);
        }
        for kx in rust_crypto::key_exchanges() {
            registry.key_exchanges.insert(kx.id(), *kx);
        }
        for format in rust_crypto::certificate_formats() {
            registry.formats.insert(format.id(), *format);
        }
        registry
    }

    pub fn register_cipher_suite(&mut self, suite: CipherSuite) -> Result<(), Error> {
        if self.suites.contains_key(&suite.id) {
            return Err(Error::AlreadyRegistered {
                table: "cipher suite",
                id: suite.id,
            });
        }
        // 0xFFFF marks a hello-retry on the wire
        if suite.id == 0xFFFF {
            return Err(Error::Config("cipher suite id 0xFFFF is reserved".into()));
        }
        self.suites.insert(suite.id, suite);
        Ok(())
    }

    pub fn register_key_exchange(
        &mut self,
        kx: &'static dyn KeyExchangeAlgorithm,
    ) -> Result<(), Error> {
        let id = kx.id();
        if id > MAX_MASK_ID {
            return Err(Error::Config(format!("key exchange id {} > 31", id)));
        }
        if self.key_exchanges.contains_key(&id) {
            return Err(Error::AlreadyRegistered {
                table: "key exchange",
                id: id as u16,
            });
        }
        self.key_exchanges.insert(id, kx);
        Ok(())
    }

    pub fn register_certificate_format(
        &mut self,
        format: &'static dyn CertificateFormat,
    ) -> Result<(), Error> {
        let id = format.id();
        if id > MAX_MASK_ID {
            return Err(Error::Config(format!("certificate format id {} > 31", id)));
        }
        if self.formats.contains_key(&id) {
            return Err(Error::AlreadyRegistered {
                table: "certificate format",
                id: id as u16,
            });
        }
        self.formats.insert(id, format);
        Ok(())
    }

    pub fn cipher_suite(&self, id: u16) -> Option<&CipherSuite> {
        self.suites.get(&id)
    }

    pub fn key_exchange(&self, id: u8) -> Option<&'static dyn KeyExchangeAlgorithm> {
        self.key_exchanges.get(&id).copied()
    }

    pub fn certificate_format(&self, id: u8) -> Option<&'static dyn CertificateFormat> {
        self.formats.get(&id).copied()
    }

    /// Registered cipher suite ids in ascending order.
    pub fn cipher_suite_ids(&self) -> Vec<u16> {
        self.suites.keys().copied().collect()
    }

    /// Registered key exchange ids in ascending order.
    pub fn key_exchange_ids(&self) -> Vec<u8> {
        self.key_exchanges.keys().copied().collect()
    }

    /// Registered certificate format ids in ascending order.
    pub fn certificate_format_ids(&self) -> Vec<u8> {
        self.formats.keys().copied().collect()
    }

    pub fn hkdf(&self) -> &'static dyn HkdfProvider {
        self.hkdf
    }

    pub fn hmac(&self) -> &'static dyn HmacProvider {
        self.hmac
    }

    pub fn random(&self) -> &'static dyn SecureRandom {
        self.random
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("suites", &self.suites.keys().collect::<Vec<_>>())
            .field("key_exchanges", &self.key_exchanges.keys().collect::<Vec<_>>())
            .field("formats", &self.formats.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::rust_crypto::*;

    #[test]
    fn defaults_are_registered() {
        let r = Registry::with_defaults();
        assert_eq!(r.cipher_suite_ids(), vec![1, 2, 3]);
        assert_eq!(r.key_exchange_ids(), vec![0, 1, 2, 3]);
        assert_eq!(r.certificate_format_ids(), vec![0, 1, 2, 3]);

        let suite = r.cipher_suite(SUITE_AES_256_GCM_SHA384).unwrap();
        assert_eq!(suite.digest, HashAlgorithm::SHA384);
        assert_eq!(suite.key_exchange, KX_SECP384R1);
        assert_eq!(r.key_exchange(KX_FFDHE2048).unwrap().name(), "ffdhe2048");
    }

    #[test]
    fn duplicate_ids_rejected() {
        let mut r = Registry::with_defaults();
        let suite = *r.cipher_suite(SUITE_AES_128_GCM_SHA256).unwrap();
        assert_eq!(
            r.register_cipher_suite(suite),
            Err(Error::AlreadyRegistered {
                table: "cipher suite",
                id: 1
            })
        );
        assert!(r.register_certificate_format(&CERT_X509).is_err());
    }

    #[test]
    fn new_suite_id_accepted() {
        let mut r = Registry::new(&HKDF_PROVIDER, &HMAC_PROVIDER, &SECURE_RANDOM);
        r.register_cipher_suite(CipherSuite {
            id: 0x0100,
            aead: &CHACHA20_POLY1305,
            digest: HashAlgorithm::SHA384,
            key_exchange: KX_SECP256R1,
        })
        .unwrap();
        assert!(r.cipher_suite(0x0100).is_some());
        assert!(r.key_exchange(KX_X25519).is_none());
    }
}
