//! Certificate generation and fingerprint helpers.
//!
//! Generates self-signed and CA-signed X.509 identities usable with the
//! X.509 certificate format, and formats fingerprints for display.

use std::fmt;

use rcgen::{
    BasicConstraints, Certificate as RcgenCertificate, CertificateParams, DistinguishedName,
    DnType, IsCa, KeyPair as RcgenKeyPair, SignatureAlgorithm, PKCS_ECDSA_P256_SHA256,
    PKCS_ECDSA_P384_SHA384, PKCS_ED25519,
};
use sha2::{Digest, Sha256};

use crate::crypto::{KeyAlgorithm, KeyPair};
use crate::Error;

/// Certificate chain and private key.
#[derive(Clone)]
pub struct Identity {
    /// Leaf certificate in DER format
    pub certificate: Vec<u8>,
    /// Full chain in DER format, leaf first
    pub chain: Vec<Vec<u8>>,
    /// PKCS#8 private key in DER format
    pub private_key: Vec<u8>,
}

impl Identity {
    /// Load the identity as a [`KeyPair`] carrying its certificate chain.
    pub fn key_pair(&self) -> Result<KeyPair, Error> {
        KeyPair::from_pkcs8_der(&self.private_key)?.with_certificate_chain(self.chain.clone())
    }

    /// SHA-256 over the DER leaf certificate.
    pub fn fingerprint(&self) -> Vec<u8> {
        calculate_fingerprint(&self.certificate)
    }

    /// The fingerprint as uppercase hex pairs separated by colons.
    pub fn fingerprint_str(&self) -> String {
        format_fingerprint(&self.fingerprint())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("certificate", &self.certificate.len())
            .field("chain", &self.chain.len())
            .field("private_key", &self.private_key.len())
            .finish()
    }
}

/// A self-signed CA able to issue leaf identities.
pub struct CertificateAuthority {
    /// CA certificate in DER format
    pub certificate: Vec<u8>,
    inner: RcgenCertificate,
}

impl CertificateAuthority {
    /// Issue a P-256 leaf certificate for `name`.
    pub fn issue(&self, name: &str) -> Result<Identity, Error> {
        let params = params(KeyAlgorithm::EcdsaP256, name, IsCa::NoCa)?;
        let leaf = RcgenCertificate::from_params(params).map_err(generation_failed)?;
        let der = leaf
            .serialize_der_with_signer(&self.inner)
            .map_err(generation_failed)?;
        Ok(Identity {
            certificate: der.clone(),
            chain: vec![der, self.certificate.clone()],
            private_key: leaf.serialize_private_key_der(),
        })
    }
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("certificate", &self.certificate.len())
            .finish_non_exhaustive()
    }
}

/// Generate a self-signed P-256 certificate.
pub fn generate_self_signed_certificate() -> Result<Identity, Error> {
    generate_self_signed_certificate_with(KeyAlgorithm::EcdsaP256, "MSS Peer")
}

/// Generate a self-signed certificate for `name` with the given key type.
///
/// RSA is not supported here.
pub fn generate_self_signed_certificate_with(
    algorithm: KeyAlgorithm,
    name: &str,
) -> Result<Identity, Error> {
    let params = params(algorithm, name, IsCa::NoCa)?;
    let cert = RcgenCertificate::from_params(params).map_err(generation_failed)?;
    let der = cert.serialize_der().map_err(generation_failed)?;
    Ok(Identity {
        certificate: der.clone(),
        chain: vec![der],
        private_key: cert.serialize_private_key_der(),
    })
}

/// Generate a self-signed P-256 certificate authority.
pub fn generate_ca() -> Result<CertificateAuthority, Error> {
    let params = params(
        KeyAlgorithm::EcdsaP256,
        "MSS Test CA",
        IsCa::Ca(BasicConstraints::Unconstrained),
    )?;
    let inner = RcgenCertificate::from_params(params).map_err(generation_failed)?;
    let certificate = inner.serialize_der().map_err(generation_failed)?;
    Ok(CertificateAuthority { certificate, inner })
}

pub(crate) fn params(algorithm: KeyAlgorithm, name: &str, is_ca: IsCa) -> Result<CertificateParams, Error> {
    let alg: &'static SignatureAlgorithm = match algorithm {
        KeyAlgorithm::Ed25519 => &PKCS_ED25519,
        KeyAlgorithm::EcdsaP256 => &PKCS_ECDSA_P256_SHA256,
        KeyAlgorithm::EcdsaP384 => &PKCS_ECDSA_P384_SHA384,
        KeyAlgorithm::Rsa => {
            return Err(Error::Certificate("cannot generate RSA certificates".into()))
        }
    };
    let key_pair = RcgenKeyPair::generate(alg).map_err(generation_failed)?;

    let mut params = CertificateParams::new(vec![name.to_string()]);

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::OrganizationName, "MSS".to_string());
    distinguished_name.push(DnType::CommonName, name.to_string());
    params.distinguished_name = distinguished_name;

    params.is_ca = is_ca;
    params.alg = alg;
    params.key_pair = Some(key_pair);

    // Backdated a little to tolerate clock skew between peers.
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::hours(1);
    params.not_after = now + time::Duration::days(365);

    Ok(params)
}

fn generation_failed(e: rcgen::RcgenError) -> Error {
    Error::Certificate(format!("certificate generation failed: {}", e))
}

/// Calculate a fingerprint using SHA-256
pub fn calculate_fingerprint(der: &[u8]) -> Vec<u8> {
    Sha256::digest(der).to_vec()
}

/// Format a fingerprint as a colon-separated hex string
/// Example: "AF:12:F6:..."
pub fn format_fingerprint(fingerprint: &[u8]) -> String {
    fingerprint
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<String>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_signed_certificate() {
        let cert = generate_self_signed_certificate().unwrap();
        assert!(!cert.certificate.is_empty());
        assert_eq!(cert.chain.len(), 1);
        assert_eq!(cert.fingerprint().len(), 32);

        let key = cert.key_pair().unwrap();
        assert_eq!(key.algorithm(), KeyAlgorithm::EcdsaP256);
        assert_eq!(key.public_key().certificate_chain().len(), 1);
    }

    #[test]
    fn test_ed25519_certificate() {
        let cert = generate_self_signed_certificate_with(KeyAlgorithm::Ed25519, "ed").unwrap();
        let key = cert.key_pair().unwrap();
        assert_eq!(key.algorithm(), KeyAlgorithm::Ed25519);
        let sig = key.sign(b"data").unwrap();
        key.public_key().verify(b"data", &sig).unwrap();
    }

    #[test]
    fn test_mismatched_chain_rejected() {
        let a = generate_self_signed_certificate().unwrap();
        let b = generate_self_signed_certificate().unwrap();
        let key = KeyPair::from_pkcs8_der(&a.private_key).unwrap();
        assert!(key.with_certificate_chain(b.chain).is_err());
    }

    #[test]
    fn test_format_fingerprint() {
        assert_eq!(format_fingerprint(&[0xAF, 0x01, 0xFF]), "AF:01:FF");
    }
}
