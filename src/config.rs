use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use crate::crypto::{KeyPair, PublicKey, TrustStore};
use crate::message::{ExtensionHandler, ExtensionStage, Extensions};
use crate::registry::{CipherSuite, Registry};
use crate::session::SessionManager;
use crate::Error;

/// Behaviour switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Switches(u8);

impl Switches {
    /// Only authenticate with pre-shared certificates.
    pub const PSC_ONLY: Switches = Switches(1);
    /// Send (client) or accept (server) 0-RTT early data on resumption.
    pub const ALLOW_0RTT: Switches = Switches(2);
    /// Server: ask the client for a certificate.
    pub const VERIFY_CLIENT: Switches = Switches(4);

    pub const fn empty() -> Self {
        Switches(0)
    }

    pub fn contains(&self, other: Switches) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Switches {
    type Output = Switches;

    fn bitor(self, rhs: Self) -> Self::Output {
        Switches(self.0 | rhs.0)
    }
}

impl BitOrAssign for Switches {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Engine configuration.
///
/// One `Config` is usually shared by many engines through an `Arc`.
#[derive(Clone)]
pub struct Config {
    registry: Arc<Registry>,
    cipher_suites: Vec<u16>,
    key_exchanges: Vec<u8>,
    certificate_formats: Vec<u8>,
    certificates: Vec<Arc<KeyPair>>,
    psc_keys: BTreeMap<u32, PublicKey>,
    psc_identities: BTreeMap<u32, Arc<KeyPair>>,
    switches: Switches,
    trust_store: TrustStore,
    session_manager: Option<Arc<dyn SessionManager>>,
    server_name: Option<String>,
    application_protocol: Option<String>,
    extension_handler: Option<Arc<dyn ExtensionHandler>>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            registry: None,
            cipher_suites: None,
            key_exchanges: None,
            certificate_formats: None,
            certificates: Vec::new(),
            psc_keys: BTreeMap::new(),
            psc_identities: BTreeMap::new(),
            switches: Switches::empty(),
            trust_store: None,
            session_manager: None,
            server_name: None,
            application_protocol: None,
            extension_handler: None,
        }
    }

    #[inline(always)]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Cipher suite ids in preference order.
    #[inline(always)]
    pub fn cipher_suites(&self) -> &[u16] {
        &self.cipher_suites
    }

    /// Key exchange ids in preference order.
    #[inline(always)]
    pub fn key_exchanges(&self) -> &[u8] {
        &self.key_exchanges
    }

    #[inline(always)]
    pub fn certificate_formats(&self) -> &[u8] {
        &self.certificate_formats
    }

    /// Local identities, tried in order.
    #[inline(always)]
    pub fn certificates(&self) -> &[Arc<KeyPair>] {
        &self.certificates
    }

    /// Client side: server keys known in advance, by id.
    #[inline(always)]
    pub fn psc_keys(&self) -> &BTreeMap<u32, PublicKey> {
        &self.psc_keys
    }

    /// Server side: identities the client may know in advance, by id.
    #[inline(always)]
    pub fn psc_identities(&self) -> &BTreeMap<u32, Arc<KeyPair>> {
        &self.psc_identities
    }

    #[inline(always)]
    pub fn switches(&self) -> Switches {
        self.switches
    }

    #[inline(always)]
    pub fn trust_store(&self) -> &TrustStore {
        &self.trust_store
    }

    #[inline(always)]
    pub fn session_manager(&self) -> Option<&Arc<dyn SessionManager>> {
        self.session_manager.as_ref()
    }

    #[inline(always)]
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    #[inline(always)]
    pub fn application_protocol(&self) -> Option<&str> {
        self.application_protocol.as_deref()
    }

    #[inline(always)]
    pub fn extension_handler(&self) -> Option<&Arc<dyn ExtensionHandler>> {
        self.extension_handler.as_ref()
    }

    /// Run the extension handler, if any, adding its output to `out`.
    pub(crate) fn process_extensions(
        &self,
        stage: ExtensionStage,
        received: &Extensions,
        out: &mut Extensions,
    ) -> Result<(), Error> {
        let Some(handler) = &self.extension_handler else {
            return Ok(());
        };
        let mut custom = Extensions::new();
        handler.process(stage, received, &mut custom)?;
        trace!("{:?}: {} custom extension(s)", stage, custom.len());
        out.merge(custom);
        Ok(())
    }

    pub(crate) fn suite(&self, id: u16) -> Option<&CipherSuite> {
        if !self.cipher_suites.contains(&id) {
            return None;
        }
        self.registry.cipher_suite(id)
    }

    pub(crate) fn key_exchange_mask(&self) -> u32 {
        to_mask(&self.key_exchanges)
    }

    pub(crate) fn certificate_format_mask(&self) -> u32 {
        to_mask(&self.certificate_formats)
    }

    /// First local identity the peer can decode, as `(format id, encoding, key)`.
    pub(crate) fn select_certificate(&self, peer_formats: u32) -> Option<(u8, Vec<u8>, &KeyPair)> {
        for key in &self.certificates {
            for id in &self.certificate_formats {
                if peer_formats & (1 << id) == 0 {
                    continue;
                }
                let Some(format) = self.registry.certificate_format(*id) else {
                    continue;
                };
                if let Some(encoded) = format.encode(key) {
                    return Some((*id, encoded, key));
                }
            }
        }
        None
    }
}

fn to_mask(ids: &[u8]) -> u32 {
    ids.iter().fold(0, |m, id| m | (1 << id))
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("cipher_suites", &self.cipher_suites)
            .field("key_exchanges", &self.key_exchanges)
            .field("certificate_formats", &self.certificate_formats)
            .field("certificates", &self.certificates.len())
            .field("psc_keys", &self.psc_keys.keys().collect::<Vec<_>>())
            .field("psc_identities", &self.psc_identities.keys().collect::<Vec<_>>())
            .field("switches", &self.switches)
            .field("trust_store", &self.trust_store)
            .field("session_manager", &self.session_manager.is_some())
            .field("server_name", &self.server_name)
            .field("application_protocol", &self.application_protocol)
            .field("extension_handler", &self.extension_handler.is_some())
            .finish()
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    registry: Option<Arc<Registry>>,
    cipher_suites: Option<Vec<u16>>,
    key_exchanges: Option<Vec<u8>>,
    certificate_formats: Option<Vec<u8>>,
    certificates: Vec<Arc<KeyPair>>,
    psc_keys: BTreeMap<u32, PublicKey>,
    psc_identities: BTreeMap<u32, Arc<KeyPair>>,
    switches: Switches,
    trust_store: Option<TrustStore>,
    session_manager: Option<Arc<dyn SessionManager>>,
    server_name: Option<String>,
    application_protocol: Option<String>,
    extension_handler: Option<Arc<dyn ExtensionHandler>>,
}

impl ConfigBuilder {
    /// Set the algorithm registry.
    ///
    /// Defaults to [`Registry::with_defaults`].
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Cipher suites to offer or accept, most preferred first.
    ///
    /// Defaults to every suite in the registry, in id order.
    pub fn cipher_suites(mut self, ids: &[u16]) -> Self {
        self.cipher_suites = Some(ids.to_vec());
        self
    }

    /// Key exchange groups, most preferred first.
    ///
    /// Defaults to every group in the registry.
    pub fn key_exchanges(mut self, ids: &[u8]) -> Self {
        self.key_exchanges = Some(ids.to_vec());
        self
    }

    /// Certificate formats this side can produce and accept.
    ///
    /// Defaults to every format in the registry.
    pub fn certificate_formats(mut self, ids: &[u8]) -> Self {
        self.certificate_formats = Some(ids.to_vec());
        self
    }

    /// Add a local identity. Required for servers, and for clients when the
    /// server verifies clients.
    pub fn certificate(mut self, key: KeyPair) -> Self {
        self.certificates.push(Arc::new(key));
        self
    }

    /// Client: a server key known in advance under `id`.
    pub fn pre_shared_key(mut self, id: u32, key: PublicKey) -> Self {
        self.psc_keys.insert(id, key);
        self
    }

    /// Server: an identity clients may know in advance under `id`.
    pub fn pre_shared_identity(mut self, id: u32, key: KeyPair) -> Self {
        self.psc_identities.insert(id, Arc::new(key));
        self
    }

    pub fn switches(mut self, switches: Switches) -> Self {
        self.switches = switches;
        self
    }

    /// Trust anchors for X.509 chains.
    ///
    /// Defaults to [`TrustStore::platform_default`].
    pub fn trust_store(mut self, trust_store: TrustStore) -> Self {
        self.trust_store = Some(trust_store);
        self
    }

    /// Enable session resumption.
    pub fn session_manager(mut self, manager: Arc<dyn SessionManager>) -> Self {
        self.session_manager = Some(manager);
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn application_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.application_protocol = Some(protocol.into());
        self
    }

    /// Exchange application extensions during the handshake.
    pub fn extension_handler(mut self, handler: Arc<dyn ExtensionHandler>) -> Self {
        self.extension_handler = Some(handler);
        self
    }

    /// Build the configuration.
    ///
    /// Fails with [`Error::Config`] when an id is not in the registry or a
    /// list ends up empty.
    pub fn build(self) -> Result<Config, Error> {
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(Registry::with_defaults()));

        let cipher_suites = self
            .cipher_suites
            .unwrap_or_else(|| registry.cipher_suite_ids());
        let key_exchanges = self
            .key_exchanges
            .unwrap_or_else(|| registry.key_exchange_ids());
        let certificate_formats = self
            .certificate_formats
            .unwrap_or_else(|| registry.certificate_format_ids());

        if cipher_suites.is_empty() {
            return Err(Error::Config("no cipher suites".into()));
        }
        if key_exchanges.is_empty() {
            return Err(Error::Config("no key exchanges".into()));
        }
        if certificate_formats.is_empty() {
            return Err(Error::Config("no certificate formats".into()));
        }

        for id in &cipher_suites {
            if registry.cipher_suite(*id).is_none() {
                return Err(Error::Config(format!("unknown cipher suite {:#06x}", id)));
            }
        }
        for id in &key_exchanges {
            if registry.key_exchange(*id).is_none() {
                return Err(Error::Config(format!("unknown key exchange {}", id)));
            }
        }
        for id in &certificate_formats {
            if registry.certificate_format(*id).is_none() {
                return Err(Error::Config(format!("unknown certificate format {}", id)));
            }
        }

        Ok(Config {
            registry,
            cipher_suites,
            key_exchanges,
            certificate_formats,
            certificates: self.certificates,
            psc_keys: self.psc_keys,
            psc_identities: self.psc_identities,
            switches: self.switches,
            trust_store: self.trust_store.unwrap_or_else(TrustStore::platform_default),
            session_manager: self.session_manager,
            server_name: self.server_name,
            application_protocol: self.application_protocol,
            extension_handler: self.extension_handler,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::rust_crypto::*;

    #[test]
    fn defaults_cover_registry() {
        let config = Config::builder().trust_store(TrustStore::new()).build().unwrap();
        assert_eq!(config.cipher_suites(), &[1, 2, 3]);
        assert_eq!(config.key_exchange_mask(), 0b1111);
        assert_eq!(config.certificate_format_mask(), 0b1111);
        assert_eq!(config.switches(), Switches::empty());
    }

    #[test]
    fn unknown_ids_rejected() {
        let err = Config::builder().cipher_suites(&[0x99]).build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = Config::builder().key_exchanges(&[17]).build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = Config::builder().key_exchanges(&[]).build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn suite_limited_to_configured() {
        let config = Config::builder()
            .cipher_suites(&[SUITE_CHACHA20_POLY1305_SHA256])
            .trust_store(TrustStore::new())
            .build()
            .unwrap();
        assert!(config.suite(SUITE_CHACHA20_POLY1305_SHA256).is_some());
        assert!(config.suite(SUITE_AES_128_GCM_SHA256).is_none());
    }

    #[test]
    fn select_certificate_by_peer_formats() {
        let config = Config::builder()
            .certificate(KeyPair::generate_ed25519())
            .certificate(KeyPair::generate_p256())
            .trust_store(TrustStore::new())
            .build()
            .unwrap();

        let (id, _, key) = config.select_certificate(1 << FORMAT_ECDSA_P256).unwrap();
        assert_eq!(id, FORMAT_ECDSA_P256);
        assert_eq!(key.algorithm(), crate::crypto::KeyAlgorithm::EcdsaP256);

        let (id, _, _) = config.select_certificate(u32::MAX).unwrap();
        assert_eq!(id, FORMAT_ED25519);

        assert!(config.select_certificate(1 << FORMAT_X509).is_none());
    }

    #[test]
    fn switches_combine() {
        let s = Switches::PSC_ONLY | Switches::VERIFY_CLIENT;
        assert!(s.contains(Switches::PSC_ONLY));
        assert!(s.contains(Switches::VERIFY_CLIENT));
        assert!(!s.contains(Switches::ALLOW_0RTT));
    }
}
