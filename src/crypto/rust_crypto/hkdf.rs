//! HKDF implementation using RustCrypto crates.

use hkdf::Hkdf;
use sha2::{Sha256, Sha384};

use crate::buffer::Buf;
use crate::crypto::provider::{HashAlgorithm, HkdfProvider};

/// HKDF provider implementation using RustCrypto.
#[derive(Debug)]
pub struct RustCryptoHkdfProvider;

impl HkdfProvider for RustCryptoHkdfProvider {
    fn hkdf_extract(
        &self,
        hash: HashAlgorithm,
        salt: &[u8],
        ikm: &[u8],
        out: &mut Buf,
    ) -> Result<(), String> {
        out.clear();
        let salt = if salt.is_empty() { None } else { Some(salt) };

        match hash {
            HashAlgorithm::SHA256 => {
                let (prk, _) = Hkdf::<Sha256>::extract(salt, ikm);
                out.extend_from_slice(prk.as_slice());
            }
            HashAlgorithm::SHA384 => {
                let (prk, _) = Hkdf::<Sha384>::extract(salt, ikm);
                out.extend_from_slice(prk.as_slice());
            }
        }

        Ok(())
    }

    fn hkdf_expand(
        &self,
        hash: HashAlgorithm,
        prk: &[u8],
        info: &[u8],
        out: &mut Buf,
        output_len: usize,
    ) -> Result<(), String> {
        out.clear();
        out.resize(output_len, 0);

        match hash {
            HashAlgorithm::SHA256 => {
                let hk =
                    Hkdf::<Sha256>::from_prk(prk).map_err(|e| format!("Invalid PRK: {:?}", e))?;
                hk.expand(info, out)
                    .map_err(|e| format!("HKDF expand failed: {:?}", e))?;
            }
            HashAlgorithm::SHA384 => {
                let hk =
                    Hkdf::<Sha384>::from_prk(prk).map_err(|e| format!("Invalid PRK: {:?}", e))?;
                hk.expand(info, out)
                    .map_err(|e| format!("HKDF expand failed: {:?}", e))?;
            }
        }

        Ok(())
    }
}

/// Static instance of the HKDF provider.
pub static HKDF_PROVIDER: RustCryptoHkdfProvider = RustCryptoHkdfProvider;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rfc5869_case_1() {
        let ikm = [0x0b; 22];
        let salt: Vec<u8> = (0x00..=0x0c).collect();
        let info: Vec<u8> = (0xf0..=0xf9).collect();

        let mut prk = Buf::new();
        HKDF_PROVIDER
            .hkdf_extract(HashAlgorithm::SHA256, &salt, &ikm, &mut prk)
            .unwrap();
        assert_eq!(prk[..4], [0x07, 0x77, 0x09, 0x36]);

        let mut okm = Buf::new();
        HKDF_PROVIDER
            .hkdf_expand(HashAlgorithm::SHA256, &prk, &info, &mut okm, 42)
            .unwrap();
        assert_eq!(okm.len(), 42);
        assert_eq!(okm[..4], [0x3c, 0xb2, 0x5f, 0x25]);
    }

    #[test]
    fn expand_too_long() {
        let mut out = Buf::new();
        let res = HKDF_PROVIDER.hkdf_expand(HashAlgorithm::SHA256, &[1; 32], b"x", &mut out, 255 * 32 + 1);
        assert!(res.is_err());
    }
}
