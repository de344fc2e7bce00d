use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use zeroize::Zeroizing;

use crate::crypto::rust_crypto::SECURE_RANDOM;
use crate::crypto::{RecordCipher, SecureRandom, TranscriptSecret, IV_LEN};
use crate::message::RANDOM_LEN;
use crate::registry::Registry;
use crate::Error;

/// Length of the resumption secret kept in a [`Session`].
pub const SESSION_KEY_LEN: usize = 64;

const SESSION_ID_LEN: usize = 16;

/// A resumable session.
///
/// A client starts with [`Session::new`] (empty id, asking the server for a
/// new session) or with a session kept from an earlier connection. After a
/// successful handshake the session carries a secret and the suite it was
/// negotiated with, which is what 0-RTT early data is protected with.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    id: Vec<u8>,
    key: Option<Zeroizing<[u8; SESSION_KEY_LEN]>>,
    suite: Option<u16>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<Vec<u8>>) -> Self {
        Session {
            id: id.into(),
            key: None,
            suite: None,
        }
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn key(&self) -> Option<&[u8; SESSION_KEY_LEN]> {
        self.key.as_deref()
    }

    pub fn suite(&self) -> Option<u16> {
        self.suite
    }

    /// Whether early data can be sent under this session.
    pub fn is_resumable(&self) -> bool {
        !self.id.is_empty() && self.key.is_some() && self.suite.is_some()
    }

    pub(crate) fn set_key(&mut self, key: &[u8], suite: u16) {
        let mut k = Zeroizing::new([0u8; SESSION_KEY_LEN]);
        let n = key.len().min(SESSION_KEY_LEN);
        k[..n].copy_from_slice(&key[..n]);
        self.key = Some(k);
        self.suite = Some(suite);
    }

    /// Record protection for early data sent with the client random of the
    /// current attempt.
    ///
    /// `None` when the session has no key, or its suite is no longer known.
    pub(crate) fn preflight_cipher(
        &self,
        registry: &Registry,
        client_random: &[u8; RANDOM_LEN],
    ) -> Result<Option<RecordCipher>, Error> {
        let (Some(key), Some(suite_id)) = (&self.key, self.suite) else {
            return Ok(None);
        };
        let Some(suite) = registry.cipher_suite(suite_id) else {
            return Ok(None);
        };

        let mut secret =
            TranscriptSecret::new(registry.hkdf(), suite.digest, client_random, &key[..])?;
        let material = secret.derive(registry.hkdf(), "preflight", suite.aead.key_len() + IV_LEN)?;
        let cipher = RecordCipher::new(suite.aead, &material).map_err(Error::internal)?;
        Ok(Some(cipher))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &hex_id(&self.id))
            .field("key", &self.key.is_some())
            .field("suite", &self.suite)
            .finish()
    }
}

fn hex_id(id: &[u8]) -> String {
    id.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Server side session storage.
///
/// Implementations are shared between engines and synchronize internally.
pub trait SessionManager: Send + Sync {
    /// Find the session named by `id`, or start a new one when `id` is empty
    /// or unknown. `None` declines resumption.
    fn get_or_create(&self, id: &[u8]) -> Option<Session>;

    /// Keep a session after a successful handshake.
    fn store(&self, session: Session);
}

/// In-memory [`SessionManager`] with random 16-byte ids.
pub struct MemorySessionManager {
    sessions: Mutex<HashMap<Vec<u8>, Session>>,
    capacity: usize,
    random: &'static dyn SecureRandom,
}

impl MemorySessionManager {
    /// Keep at most `capacity` sessions. When full, an arbitrary session is
    /// evicted to make room.
    pub fn new(capacity: usize) -> Self {
        MemorySessionManager {
            sessions: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            random: &SECURE_RANDOM,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget a session.
    pub fn remove(&self, id: &[u8]) -> Option<Session> {
        self.lock().remove(id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Vec<u8>, Session>> {
        // a panic elsewhere cannot leave the map half-updated
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemorySessionManager {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl SessionManager for MemorySessionManager {
    fn get_or_create(&self, id: &[u8]) -> Option<Session> {
        if !id.is_empty() {
            if let Some(session) = self.lock().get(id) {
                trace!("Resuming session {}", hex_id(id));
                return Some(session.clone());
            }
        }

        let mut new_id = vec![0u8; SESSION_ID_LEN];
        if let Err(e) = self.random.fill(&mut new_id) {
            warn!("Session id generation failed: {}", e);
            return None;
        }
        trace!("New session {}", hex_id(&new_id));
        Some(Session::with_id(new_id))
    }

    fn store(&self, session: Session) {
        let mut sessions = self.lock();
        if sessions.len() >= self.capacity && !sessions.contains_key(&session.id) {
            if let Some(evict) = sessions.keys().next().cloned() {
                sessions.remove(&evict);
            }
        }
        sessions.insert(session.id.clone(), session);
    }
}

impl fmt::Debug for MemorySessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySessionManager")
            .field("sessions", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::buffer::Buf;
    use crate::crypto::rust_crypto::SUITE_AES_256_GCM_SHA384;

    #[test]
    fn unknown_id_creates_new() {
        let manager = MemorySessionManager::default();
        let s = manager.get_or_create(b"nope").unwrap();
        assert_eq!(s.id().len(), 16);
        assert!(!s.is_resumable());
        assert!(manager.is_empty());
    }

    #[test]
    fn stored_session_is_found() {
        let manager = MemorySessionManager::default();
        let mut s = manager.get_or_create(&[]).unwrap();
        s.set_key(&[9; 64], SUITE_AES_256_GCM_SHA384);
        manager.store(s.clone());

        let found = manager.get_or_create(s.id()).unwrap();
        assert_eq!(found, s);
        assert!(found.is_resumable());
    }

    #[test]
    fn capacity_evicts() {
        let manager = MemorySessionManager::new(2);
        for i in 0..5u8 {
            manager.store(Session::with_id(vec![i]));
        }
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn preflight_ciphers_agree() {
        let registry = Registry::with_defaults();
        let mut s = Session::with_id(vec![1; 16]);
        assert!(s.preflight_cipher(&registry, &[0; 32]).unwrap().is_none());

        s.set_key(&[5; 64], SUITE_AES_256_GCM_SHA384);
        let mut tx = s.preflight_cipher(&registry, &[3; 32]).unwrap().unwrap();
        let mut rx = s.preflight_cipher(&registry, &[3; 32]).unwrap().unwrap();
        let mut other = s.preflight_cipher(&registry, &[4; 32]).unwrap().unwrap();

        let mut buf = Buf::from_slice(b"early");
        tx.seal(&[0x31], &mut buf).unwrap();
        let mut copy = buf.clone();
        assert!(other.open(&[0x31], &mut copy).is_err());
        let n = rx.open(&[0x31], &mut buf).unwrap();
        assert_eq!(&buf[..n], b"early");
    }
}
