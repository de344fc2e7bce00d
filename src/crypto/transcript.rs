use std::fmt;

use zeroize::Zeroizing;

use super::provider::{HashAlgorithm, HkdfProvider};
use crate::buffer::Buf;
use crate::Error;

/// The handshake key schedule.
///
/// PRK = HKDF-Extract(salt = client random ‖ server random, ikm = shared
/// secret). Every key is HKDF-Expand(PRK, label) and each label can be
/// expanded exactly once.
pub(crate) struct TranscriptSecret {
    hash: HashAlgorithm,
    prk: Zeroizing<Vec<u8>>,
    used: Vec<&'static str>,
}

impl TranscriptSecret {
    pub fn new(
        hkdf: &dyn HkdfProvider,
        hash: HashAlgorithm,
        salt: &[u8],
        ikm: &[u8],
    ) -> Result<Self, Error> {
        let mut prk = Buf::new();
        hkdf.hkdf_extract(hash, salt, ikm, &mut prk)
            .map_err(Error::internal)?;
        Ok(TranscriptSecret {
            hash,
            prk: Zeroizing::new(prk.into_vec()),
            used: Vec::with_capacity(8),
        })
    }

    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    pub fn derive(
        &mut self,
        hkdf: &dyn HkdfProvider,
        label: &'static str,
        len: usize,
    ) -> Result<Zeroizing<Vec<u8>>, Error> {
        if self.used.contains(&label) {
            return Err(Error::internal(format!("key {} derived twice", label)));
        }
        let mut out = Buf::new();
        hkdf.hkdf_expand(self.hash, &self.prk, label.as_bytes(), &mut out, len)
            .map_err(Error::internal)?;
        self.used.push(label);
        trace!("Derived {} ({} bytes)", label, len);
        Ok(Zeroizing::new(out.into_vec()))
    }
}

impl fmt::Debug for TranscriptSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscriptSecret")
            .field("hash", &self.hash)
            .field("used", &self.used)
            .finish_non_exhaustive()
    }
}
