//! Certificate formats: how an identity is put on the wire.

use crate::crypto::keys::{KeyAlgorithm, KeyPair, PublicKey};
use crate::crypto::provider::CertificateFormat;
use crate::crypto::trust::TrustStore;

pub const FORMAT_ED25519: u8 = 0;
pub const FORMAT_ECDSA_P256: u8 = 1;
pub const FORMAT_RSA: u8 = 2;
pub const FORMAT_X509: u8 = 3;

/// Raw 32-byte Ed25519 public key.
#[derive(Debug)]
pub struct Ed25519Raw;

impl CertificateFormat for Ed25519Raw {
    fn id(&self) -> u8 {
        FORMAT_ED25519
    }

    fn name(&self) -> &'static str {
        "ed25519"
    }

    fn encode(&self, key: &KeyPair) -> Option<Vec<u8>> {
        (key.algorithm() == KeyAlgorithm::Ed25519).then(|| key.public_key().raw().to_vec())
    }

    fn decode(&self, data: &[u8], _: &TrustStore) -> Result<PublicKey, String> {
        PublicKey::from_ed25519(data).map_err(|e| e.to_string())
    }
}

/// Raw SEC1 P-256 point, ECDSA with SHA-256.
#[derive(Debug)]
pub struct EcdsaP256Raw;

impl CertificateFormat for EcdsaP256Raw {
    fn id(&self) -> u8 {
        FORMAT_ECDSA_P256
    }

    fn name(&self) -> &'static str {
        "ecdsa-p256"
    }

    fn encode(&self, key: &KeyPair) -> Option<Vec<u8>> {
        (key.algorithm() == KeyAlgorithm::EcdsaP256).then(|| key.public_key().raw().to_vec())
    }

    fn decode(&self, data: &[u8], _: &TrustStore) -> Result<PublicKey, String> {
        PublicKey::from_p256_sec1(data).map_err(|e| e.to_string())
    }
}

/// Raw PKCS#1 RSA public key, PKCS#1 v1.5 signatures with SHA-256.
#[derive(Debug)]
pub struct RsaRaw;

impl CertificateFormat for RsaRaw {
    fn id(&self) -> u8 {
        FORMAT_RSA
    }

    fn name(&self) -> &'static str {
        "rsa"
    }

    fn encode(&self, key: &KeyPair) -> Option<Vec<u8>> {
        (key.algorithm() == KeyAlgorithm::Rsa).then(|| key.public_key().raw().to_vec())
    }

    fn decode(&self, data: &[u8], _: &TrustStore) -> Result<PublicKey, String> {
        PublicKey::from_rsa_pkcs1_der(data).map_err(|e| e.to_string())
    }
}

/// X.509 chain, leaf first: `(u16 len ‖ DER)*`.
///
/// Decoding validates the chain against the trust store.
#[derive(Debug)]
pub struct X509Chain;

impl CertificateFormat for X509Chain {
    fn id(&self) -> u8 {
        FORMAT_X509
    }

    fn name(&self) -> &'static str {
        "x509"
    }

    fn encode(&self, key: &KeyPair) -> Option<Vec<u8>> {
        let chain = key.public_key().certificate_chain();
        if chain.is_empty() {
            return None;
        }
        let mut out = Vec::new();
        for der in chain {
            let len = u16::try_from(der.len()).ok()?;
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(der);
        }
        Some(out)
    }

    fn decode(&self, mut data: &[u8], trust: &TrustStore) -> Result<PublicKey, String> {
        let mut chain = Vec::new();
        while !data.is_empty() {
            if data.len() < 2 {
                return Err("truncated certificate length".into());
            }
            let len = u16::from_be_bytes([data[0], data[1]]) as usize;
            let rest = &data[2..];
            if rest.len() < len {
                return Err("truncated certificate".into());
            }
            chain.push(rest[..len].to_vec());
            data = &rest[len..];
        }
        trust.verify_chain(&chain)
    }
}

pub static CERT_ED25519: Ed25519Raw = Ed25519Raw;
pub static CERT_ECDSA_P256: EcdsaP256Raw = EcdsaP256Raw;
pub static CERT_RSA: RsaRaw = RsaRaw;
pub static CERT_X509: X509Chain = X509Chain;

pub(super) static ALL_CERTIFICATE_FORMATS: &[&dyn CertificateFormat] =
    &[&CERT_ED25519, &CERT_ECDSA_P256, &CERT_RSA, &CERT_X509];

#[cfg(test)]
mod test {
    use super::*;
    use crate::certificate;

    #[test]
    fn raw_formats_only_take_their_key_type() {
        let ed = KeyPair::generate_ed25519();
        let ec = KeyPair::generate_p256();

        assert!(CERT_ED25519.encode(&ed).is_some());
        assert!(CERT_ED25519.encode(&ec).is_none());
        assert!(CERT_ECDSA_P256.encode(&ec).is_some());
        assert!(CERT_RSA.encode(&ec).is_none());
        assert!(CERT_X509.encode(&ec).is_none());

        let trust = TrustStore::new();
        let wire = CERT_ECDSA_P256.encode(&ec).unwrap();
        assert_eq!(&CERT_ECDSA_P256.decode(&wire, &trust).unwrap(), ec.public_key());
    }

    #[test]
    fn x509_chain_round_trip() {
        let ca = certificate::generate_ca().unwrap();
        let leaf = ca.issue("server").unwrap();
        let key = leaf.key_pair().unwrap();

        let wire = CERT_X509.encode(&key).unwrap();

        assert!(CERT_X509.decode(&wire, &TrustStore::new()).is_err());

        let mut trust = TrustStore::new();
        trust.add_certificate_der(&ca.certificate).unwrap();
        let decoded = CERT_X509.decode(&wire, &trust).unwrap();
        assert_eq!(&decoded, key.public_key());
        assert_eq!(decoded.certificate_chain().len(), 2);

        assert!(CERT_X509.decode(&wire[..wire.len() - 1], &trust).is_err());
    }
}
