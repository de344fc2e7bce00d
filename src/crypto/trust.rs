//! X.509 trust anchors and certificate chain validation.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use spki::der::{Decode, Encode};
use spki::ObjectIdentifier;
use x509_cert::ext::pkix::{BasicConstraints, KeyUsage, KeyUsages};
use x509_cert::Certificate;

use super::keys::{CertSignature, PublicKey, OID_ED25519};
use crate::Error;

const OID_ECDSA_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const OID_ECDSA_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
const OID_RSA_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const OID_RSA_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
const OID_RSA_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");
const OID_KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.15");
const OID_BASIC_CONSTRAINTS: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.19");

/// Longest chain accepted from a peer.
const MAX_CHAIN_LEN: usize = 8;

#[derive(Clone)]
struct Anchor {
    /// DER `Name`.
    subject: Vec<u8>,
    /// DER `SubjectPublicKeyInfo`.
    spki: Vec<u8>,
    /// May issue certificates. A non-CA anchor only vouches for itself.
    ca: bool,
    path_len: Option<u8>,
}

/// Set of trusted root certificates.
///
/// Peer certificate chains (certificate format 3) must end in a certificate
/// issued by one of these anchors.
#[derive(Clone, Default)]
pub struct TrustStore {
    anchors: Vec<Anchor>,
}

impl TrustStore {
    /// An empty store. Every X.509 chain is rejected until anchors are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// The Mozilla root program, as shipped by `webpki-roots`.
    pub fn platform_default() -> Self {
        let anchors = webpki_roots::TLS_SERVER_ROOTS
            .iter()
            .map(|ta| Anchor {
                // webpki keeps the contents of the outer SEQUENCE only.
                subject: wrap_sequence(ta.subject.as_ref()),
                spki: wrap_sequence(ta.subject_public_key_info.as_ref()),
                ca: true,
                path_len: None,
            })
            .collect();
        TrustStore { anchors }
    }

    /// Trust a DER certificate.
    pub fn add_certificate_der(&mut self, der: &[u8]) -> Result<(), Error> {
        let cert =
            Certificate::from_der(der).map_err(|e| Error::Certificate(format!("x509: {}", e)))?;
        self.add_certificate(&cert)
    }

    /// Trust every certificate in a PEM bundle, returning how many were added.
    pub fn add_pem_bundle(&mut self, pem: &str) -> Result<usize, Error> {
        let certs = Certificate::load_pem_chain(pem.as_bytes())
            .map_err(|e| Error::Certificate(format!("pem: {}", e)))?;
        for cert in &certs {
            self.add_certificate(cert)?;
        }
        Ok(certs.len())
    }

    fn add_certificate(&mut self, cert: &Certificate) -> Result<(), Error> {
        let tbs = &cert.tbs_certificate;
        let subject = tbs
            .subject
            .to_der()
            .map_err(|e| Error::Certificate(format!("x509: {}", e)))?;
        let spki = tbs
            .subject_public_key_info
            .to_der()
            .map_err(|e| Error::Certificate(format!("x509: {}", e)))?;
        let constraints = issuer_constraints(cert)?;
        self.anchors.push(Anchor {
            subject,
            spki,
            ca: constraints.ca,
            path_len: constraints.path_len,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Validate a DER chain (leaf first) and return the leaf key.
    ///
    /// Each certificate must be within its validity period and signed by the
    /// next one; the last must be signed by an anchor. Every issuer must be a
    /// CA allowed to sign certificates at its depth in the chain.
    pub(crate) fn verify_chain(&self, chain: &[Vec<u8>]) -> Result<PublicKey, String> {
        if chain.is_empty() {
            return Err("empty certificate chain".into());
        }
        if chain.len() > MAX_CHAIN_LEN {
            return Err(format!("certificate chain too long: {}", chain.len()));
        }

        let certs = chain
            .iter()
            .map(|der| Certificate::from_der(der).map_err(|e| format!("x509: {}", e)))
            .collect::<Result<Vec<_>, _>>()?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);

        for (i, cert) in certs.iter().enumerate() {
            let validity = &cert.tbs_certificate.validity;
            if now < validity.not_before.to_unix_duration()
                || now > validity.not_after.to_unix_duration()
            {
                return Err(format!("certificate #{} expired or not yet valid", i));
            }
        }

        // non self-issued intermediates below the issuer being checked
        let mut intermediates = 0;
        for pair in certs.windows(2) {
            let (cert, issuer) = (&pair[0], &pair[1]);
            if cert.tbs_certificate.issuer != issuer.tbs_certificate.subject {
                return Err("certificate chain out of order".into());
            }
            let constraints = issuer_constraints(issuer).map_err(|e| e.to_string())?;
            constraints.check_issuer(intermediates)?;

            let spki = issuer
                .tbs_certificate
                .subject_public_key_info
                .to_der()
                .map_err(|e| e.to_string())?;
            let key = PublicKey::from_spki_der(&spki).map_err(|e| e.to_string())?;
            verify_signed_by(cert, &key)?;

            if issuer.tbs_certificate.issuer != issuer.tbs_certificate.subject {
                intermediates += 1;
            }
        }

        // The chain always has a last element, checked above.
        let last = &certs[certs.len() - 1];
        let issuer = last.tbs_certificate.issuer.to_der().map_err(|e| e.to_string())?;
        let last_spki = last
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| e.to_string())?;

        let mut anchored = false;
        for anchor in self.anchors.iter().filter(|a| a.subject == issuer) {
            if !anchor.ca && anchor.spki != last_spki {
                trace!("Anchor is not a CA");
                continue;
            }
            if anchor.path_len.is_some_and(|n| intermediates > n as usize) {
                trace!("Anchor path length exceeded");
                continue;
            }
            let Ok(key) = PublicKey::from_spki_der(&anchor.spki) else {
                continue;
            };
            if verify_signed_by(last, &key).is_ok() {
                anchored = true;
                break;
            }
        }
        if !anchored {
            return Err("certificate chain not anchored in trust store".into());
        }

        let leaf = PublicKey::from_certificate_der(&chain[0]).map_err(|e| e.to_string())?;
        trace!("Verified certificate chain of {} certificate(s)", chain.len());
        Ok(leaf.with_chain(chain.to_vec()))
    }
}

/// BasicConstraints and KeyUsage as they bear on issuing certificates.
struct IssuerConstraints {
    ca: bool,
    path_len: Option<u8>,
    key_cert_sign: bool,
}

impl IssuerConstraints {
    /// `depth` is the number of intermediates between this issuer and the leaf.
    fn check_issuer(&self, depth: usize) -> Result<(), String> {
        if !self.ca {
            return Err("issuer is not a CA".into());
        }
        if !self.key_cert_sign {
            return Err("issuer key usage lacks keyCertSign".into());
        }
        if self.path_len.is_some_and(|n| depth > n as usize) {
            return Err("issuer path length exceeded".into());
        }
        Ok(())
    }
}

fn issuer_constraints(cert: &Certificate) -> Result<IssuerConstraints, Error> {
    let malformed = |e: spki::der::Error| Error::Certificate(format!("x509 extension: {}", e));

    // absent KeyUsage places no restriction
    let mut constraints = IssuerConstraints {
        ca: false,
        path_len: None,
        key_cert_sign: true,
    };
    for ext in cert.tbs_certificate.extensions.iter().flatten() {
        if ext.extn_id == OID_BASIC_CONSTRAINTS {
            let bc = BasicConstraints::from_der(ext.extn_value.as_bytes()).map_err(malformed)?;
            constraints.ca = bc.ca;
            constraints.path_len = bc.path_len_constraint;
        } else if ext.extn_id == OID_KEY_USAGE {
            let ku = KeyUsage::from_der(ext.extn_value.as_bytes()).map_err(malformed)?;
            constraints.key_cert_sign = ku.0.contains(KeyUsages::KeyCertSign);
        }
    }
    Ok(constraints)
}

fn verify_signed_by(cert: &Certificate, key: &PublicKey) -> Result<(), String> {
    let oid = cert.signature_algorithm.oid;
    let alg = if oid == OID_ECDSA_SHA256 {
        CertSignature::EcdsaSha256
    } else if oid == OID_ECDSA_SHA384 {
        CertSignature::EcdsaSha384
    } else if oid == OID_RSA_SHA256 {
        CertSignature::RsaSha256
    } else if oid == OID_RSA_SHA384 {
        CertSignature::RsaSha384
    } else if oid == OID_RSA_SHA512 {
        CertSignature::RsaSha512
    } else if oid == OID_ED25519 {
        CertSignature::Ed25519
    } else {
        return Err(format!("unsupported certificate signature {}", oid));
    };

    let tbs = cert.tbs_certificate.to_der().map_err(|e| e.to_string())?;
    let sig = cert
        .signature
        .as_bytes()
        .ok_or_else(|| "certificate signature bit string".to_string())?;
    key.verify_cert_signature(alg, &tbs, sig)
}

fn wrap_sequence(content: &[u8]) -> Vec<u8> {
    let len = content.len();
    let mut out = Vec::with_capacity(len + 4);
    out.push(0x30);
    if len < 0x80 {
        out.push(len as u8);
    } else if len < 0x100 {
        out.extend_from_slice(&[0x81, len as u8]);
    } else if len < 0x10000 {
        out.push(0x82);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(0x83);
        out.extend_from_slice(&(len as u32).to_be_bytes()[1..]);
    }
    out.extend_from_slice(content);
    out
}

impl fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustStore")
            .field("anchors", &self.anchors.len())
            .finish()
    }
}
