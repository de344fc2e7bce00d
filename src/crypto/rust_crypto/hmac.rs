//! HMAC using RustCrypto.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384};

use crate::buffer::Buf;
use crate::crypto::provider::{HashAlgorithm, HmacProvider};

/// HMAC provider implementation.
#[derive(Debug)]
pub struct RustCryptoHmacProvider;

impl HmacProvider for RustCryptoHmacProvider {
    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Result<[u8; 32], String> {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(key).map_err(|_| "Invalid HMAC key".to_string())?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().into())
    }

    fn hmac(
        &self,
        hash: HashAlgorithm,
        key: &[u8],
        data: &[u8],
        out: &mut Buf,
    ) -> Result<(), String> {
        out.clear();
        match hash {
            HashAlgorithm::SHA256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key)
                    .map_err(|_| "Invalid HMAC key".to_string())?;
                mac.update(data);
                out.extend_from_slice(&mac.finalize().into_bytes());
            }
            HashAlgorithm::SHA384 => {
                let mut mac = Hmac::<Sha384>::new_from_slice(key)
                    .map_err(|_| "Invalid HMAC key".to_string())?;
                mac.update(data);
                out.extend_from_slice(&mac.finalize().into_bytes());
            }
        }
        Ok(())
    }
}

/// Static instance of the HMAC provider.
pub static HMAC_PROVIDER: RustCryptoHmacProvider = RustCryptoHmacProvider;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lengths_follow_hash() {
        let mut out = Buf::new();
        HMAC_PROVIDER
            .hmac(HashAlgorithm::SHA384, b"k", b"d", &mut out)
            .unwrap();
        assert_eq!(out.len(), 48);

        let tag = HMAC_PROVIDER.hmac_sha256(b"k", b"d").unwrap();
        HMAC_PROVIDER
            .hmac(HashAlgorithm::SHA256, b"k", b"d", &mut out)
            .unwrap();
        assert_eq!(&*out, &tag[..]);
    }
}
