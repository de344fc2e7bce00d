//! Identity keys: the signing side held locally and the verifying side
//! learned from the peer.

use std::fmt;

use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey};
use rsa::traits::PublicKeyParts;
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::hazmat::PrehashVerifier;
use signature::{SignatureEncoding, Signer, Verifier};
use spki::der::Decode;
use spki::{DecodePublicKey, ObjectIdentifier};
use x509_cert::Certificate;

use crate::Error;

pub(crate) const OID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");
pub(crate) const OID_EC_PUBLIC_KEY: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
pub(crate) const OID_RSA_ENCRYPTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const OID_SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const OID_SECP384R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");

/// Key algorithm of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    Ed25519,
    EcdsaP256,
    EcdsaP384,
    Rsa,
}

/// Signature algorithms that appear on X.509 certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CertSignature {
    EcdsaSha256,
    EcdsaSha384,
    RsaSha256,
    RsaSha384,
    RsaSha512,
    Ed25519,
}

#[derive(Clone)]
enum Verifying {
    Ed25519(ed25519_dalek::VerifyingKey),
    P256(p256::ecdsa::VerifyingKey),
    P384(p384::ecdsa::VerifyingKey),
    Rsa(Box<rsa::RsaPublicKey>),
}

/// A peer identity: a public key, and the certificate chain it came in if any.
#[derive(Clone)]
pub struct PublicKey {
    key: Verifying,
    /// Raw wire form: Ed25519 bytes, SEC1 uncompressed point or PKCS#1 DER.
    raw: Vec<u8>,
    chain: Vec<Vec<u8>>,
}

impl PublicKey {
    /// A 32-byte Ed25519 public key.
    pub fn from_ed25519(raw: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| Error::Certificate(format!("ed25519 key length {}", raw.len())))?;
        let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map_err(|e| Error::Certificate(format!("ed25519 key: {}", e)))?;
        Ok(Self::new(Verifying::Ed25519(key)))
    }

    /// A SEC1-encoded P-256 point.
    pub fn from_p256_sec1(raw: &[u8]) -> Result<Self, Error> {
        let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(raw)
            .map_err(|e| Error::Certificate(format!("p256 key: {}", e)))?;
        Ok(Self::new(Verifying::P256(key)))
    }

    /// A SEC1-encoded P-384 point.
    pub fn from_p384_sec1(raw: &[u8]) -> Result<Self, Error> {
        let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(raw)
            .map_err(|e| Error::Certificate(format!("p384 key: {}", e)))?;
        Ok(Self::new(Verifying::P384(key)))
    }

    /// A PKCS#1 DER `RSAPublicKey`.
    pub fn from_rsa_pkcs1_der(der: &[u8]) -> Result<Self, Error> {
        let key = rsa::RsaPublicKey::from_pkcs1_der(der)
            .map_err(|e| Error::Certificate(format!("rsa key: {}", e)))?;
        Ok(Self::new(Verifying::Rsa(Box::new(key))))
    }

    /// A DER `SubjectPublicKeyInfo`.
    pub fn from_spki_der(der: &[u8]) -> Result<Self, Error> {
        let spki = spki::SubjectPublicKeyInfoRef::from_der(der)
            .map_err(|e| Error::Certificate(format!("spki: {}", e)))?;
        let oid = spki.algorithm.oid;

        if oid == OID_ED25519 {
            let raw = spki
                .subject_public_key
                .as_bytes()
                .ok_or_else(|| Error::Certificate("ed25519 key bit string".into()))?;
            Self::from_ed25519(raw)
        } else if oid == OID_EC_PUBLIC_KEY {
            if let Ok(key) = p256::PublicKey::from_public_key_der(der) {
                return Ok(Self::new(Verifying::P256(key.into())));
            }
            let key = p384::PublicKey::from_public_key_der(der)
                .map_err(|_| Error::Certificate("unsupported ec curve".into()))?;
            Ok(Self::new(Verifying::P384(key.into())))
        } else if oid == OID_RSA_ENCRYPTION {
            let key = rsa::RsaPublicKey::from_public_key_der(der)
                .map_err(|e| Error::Certificate(format!("rsa key: {}", e)))?;
            Ok(Self::new(Verifying::Rsa(Box::new(key))))
        } else {
            Err(Error::Certificate(format!("unsupported key algorithm {}", oid)))
        }
    }

    /// The subject key of a DER certificate. The certificate becomes a
    /// one-element chain, it is not validated here.
    pub fn from_certificate_der(der: &[u8]) -> Result<Self, Error> {
        let cert =
            Certificate::from_der(der).map_err(|e| Error::Certificate(format!("x509: {}", e)))?;
        let spki = spki::der::Encode::to_der(&cert.tbs_certificate.subject_public_key_info)
            .map_err(|e| Error::Certificate(format!("x509: {}", e)))?;
        let mut key = Self::from_spki_der(&spki)?;
        key.chain = vec![der.to_vec()];
        Ok(key)
    }

    fn new(key: Verifying) -> Self {
        let raw = match &key {
            Verifying::Ed25519(k) => k.as_bytes().to_vec(),
            Verifying::P256(k) => k.to_encoded_point(false).as_bytes().to_vec(),
            Verifying::P384(k) => k.to_encoded_point(false).as_bytes().to_vec(),
            // A key we just decoded always re-encodes.
            Verifying::Rsa(k) => k
                .to_pkcs1_der()
                .map(|d| d.as_bytes().to_vec())
                .unwrap_or_default(),
        };
        PublicKey {
            key,
            raw,
            chain: vec![],
        }
    }

    pub(crate) fn with_chain(mut self, chain: Vec<Vec<u8>>) -> Self {
        self.chain = chain;
        self
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self.key {
            Verifying::Ed25519(_) => KeyAlgorithm::Ed25519,
            Verifying::P256(_) => KeyAlgorithm::EcdsaP256,
            Verifying::P384(_) => KeyAlgorithm::EcdsaP384,
            Verifying::Rsa(_) => KeyAlgorithm::Rsa,
        }
    }

    /// The key in its raw wire form.
    ///
    /// Ed25519 keys are 32 bytes, ECDSA keys an uncompressed SEC1 point, RSA
    /// keys a PKCS#1 DER structure.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// DER certificates the key arrived in, leaf first. Empty for raw keys.
    pub fn certificate_chain(&self) -> &[Vec<u8>] {
        &self.chain
    }

    /// SHA-256 over the raw key.
    pub fn fingerprint(&self) -> [u8; 32] {
        Sha256::digest(&self.raw).into()
    }

    /// Verify a handshake signature.
    ///
    /// ECDSA signatures are DER encoded and hashed with SHA-256 (P-256) or
    /// SHA-384 (P-384). RSA uses PKCS#1 v1.5 with SHA-256.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> Result<(), String> {
        match &self.key {
            Verifying::Ed25519(k) => {
                let sig = ed25519_dalek::Signature::from_slice(sig)
                    .map_err(|_| "Malformed Ed25519 signature".to_string())?;
                k.verify_strict(msg, &sig)
                    .map_err(|_| "Ed25519 signature mismatch".to_string())
            }
            Verifying::P256(k) => {
                let sig = p256::ecdsa::Signature::from_der(sig)
                    .map_err(|_| "Malformed ECDSA signature".to_string())?;
                k.verify(msg, &sig)
                    .map_err(|_| "ECDSA signature mismatch".to_string())
            }
            Verifying::P384(k) => {
                let sig = p384::ecdsa::Signature::from_der(sig)
                    .map_err(|_| "Malformed ECDSA signature".to_string())?;
                k.verify(msg, &sig)
                    .map_err(|_| "ECDSA signature mismatch".to_string())
            }
            Verifying::Rsa(k) => {
                let verifier = rsa::pkcs1v15::VerifyingKey::<Sha256>::new((**k).clone());
                let sig = rsa::pkcs1v15::Signature::try_from(sig)
                    .map_err(|_| "Malformed RSA signature".to_string())?;
                verifier
                    .verify(msg, &sig)
                    .map_err(|_| "RSA signature mismatch".to_string())
            }
        }
    }

    /// Verify a certificate signature made with `alg` over `msg`.
    pub(crate) fn verify_cert_signature(
        &self,
        alg: CertSignature,
        msg: &[u8],
        sig: &[u8],
    ) -> Result<(), String> {
        match (&self.key, alg) {
            (Verifying::Ed25519(_), CertSignature::Ed25519) => self.verify(msg, sig),
            (Verifying::P256(k), CertSignature::EcdsaSha256 | CertSignature::EcdsaSha384) => {
                let sig = p256::ecdsa::Signature::from_der(sig)
                    .map_err(|_| "Malformed ECDSA signature".to_string())?;
                k.verify_prehash(&ecdsa_prehash(alg, msg), &sig)
                    .map_err(|_| "ECDSA signature mismatch".to_string())
            }
            (Verifying::P384(k), CertSignature::EcdsaSha256 | CertSignature::EcdsaSha384) => {
                let sig = p384::ecdsa::Signature::from_der(sig)
                    .map_err(|_| "Malformed ECDSA signature".to_string())?;
                k.verify_prehash(&ecdsa_prehash(alg, msg), &sig)
                    .map_err(|_| "ECDSA signature mismatch".to_string())
            }
            (Verifying::Rsa(k), CertSignature::RsaSha256) => k
                .verify(rsa::Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(msg), sig)
                .map_err(|_| "RSA signature mismatch".to_string()),
            (Verifying::Rsa(k), CertSignature::RsaSha384) => k
                .verify(rsa::Pkcs1v15Sign::new::<Sha384>(), &Sha384::digest(msg), sig)
                .map_err(|_| "RSA signature mismatch".to_string()),
            (Verifying::Rsa(k), CertSignature::RsaSha512) => k
                .verify(rsa::Pkcs1v15Sign::new::<Sha512>(), &Sha512::digest(msg), sig)
                .map_err(|_| "RSA signature mismatch".to_string()),
            (_, alg) => Err(format!(
                "{:?} signature with a {:?} key",
                alg,
                self.algorithm()
            )),
        }
    }
}

fn ecdsa_prehash(alg: CertSignature, msg: &[u8]) -> Vec<u8> {
    match alg {
        CertSignature::EcdsaSha384 => Sha384::digest(msg).to_vec(),
        _ => Sha256::digest(msg).to_vec(),
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm() == other.algorithm() && self.raw == other.raw
    }
}

impl Eq for PublicKey {}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("PublicKey");
        d.field("algorithm", &self.algorithm());
        if let Verifying::Rsa(k) = &self.key {
            d.field("bits", &(k.size() * 8));
        }
        d.field("chain", &self.chain.len()).finish()
    }
}

enum Signing {
    Ed25519(ed25519_dalek::SigningKey),
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
    Rsa(Box<rsa::pkcs1v15::SigningKey<Sha256>>),
}

/// A local identity: a private key, its public key and optionally the
/// certificate chain that vouches for it.
pub struct KeyPair {
    signing: Signing,
    public: PublicKey,
}

impl KeyPair {
    pub fn generate_ed25519() -> Self {
        let key = ed25519_dalek::SigningKey::generate(&mut OsRng);
        let public = PublicKey::new(Verifying::Ed25519(key.verifying_key()));
        KeyPair {
            signing: Signing::Ed25519(key),
            public,
        }
    }

    pub fn generate_p256() -> Self {
        let key = p256::ecdsa::SigningKey::random(&mut OsRng);
        let public = PublicKey::new(Verifying::P256(*key.verifying_key()));
        KeyPair {
            signing: Signing::P256(key),
            public,
        }
    }

    pub fn generate_p384() -> Self {
        let key = p384::ecdsa::SigningKey::random(&mut OsRng);
        let public = PublicKey::new(Verifying::P384(*key.verifying_key()));
        KeyPair {
            signing: Signing::P384(key),
            public,
        }
    }

    /// Generate an RSA key. Slow for realistic sizes.
    pub fn generate_rsa(bits: usize) -> Result<Self, Error> {
        let key = rsa::RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| Error::Certificate(format!("rsa keygen: {}", e)))?;
        Ok(Self::from_rsa(key))
    }

    fn from_rsa(key: rsa::RsaPrivateKey) -> Self {
        let public = PublicKey::new(Verifying::Rsa(Box::new(key.to_public_key())));
        KeyPair {
            signing: Signing::Rsa(Box::new(rsa::pkcs1v15::SigningKey::<Sha256>::new(key))),
            public,
        }
    }

    /// Load a PKCS#8 DER private key (Ed25519, P-256, P-384 or RSA).
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, Error> {
        use pkcs8::DecodePrivateKey;

        if let Some(seed) = ed25519_pkcs8_seed(der) {
            return Ok(Self::from_ed25519_seed(seed));
        }

        let info = pkcs8::PrivateKeyInfo::try_from(der)
            .map_err(|e| Error::Certificate(format!("pkcs8: {}", e)))?;
        let oid = info.algorithm.oid;

        if oid == OID_ED25519 {
            // CurvePrivateKey ::= OCTET STRING
            match info.private_key {
                [0x04, 0x20, seed @ ..] if seed.len() == 32 => Ok(Self::from_ed25519_seed(seed)),
                _ => Err(Error::Certificate("ed25519 private key".into())),
            }
        } else if oid == OID_EC_PUBLIC_KEY {
            if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_der(der) {
                let public = PublicKey::new(Verifying::P256(*key.verifying_key()));
                return Ok(KeyPair {
                    signing: Signing::P256(key),
                    public,
                });
            }
            let key = p384::ecdsa::SigningKey::from_pkcs8_der(der)
                .map_err(|_| Error::Certificate("unsupported ec curve".into()))?;
            let public = PublicKey::new(Verifying::P384(*key.verifying_key()));
            Ok(KeyPair {
                signing: Signing::P384(key),
                public,
            })
        } else if oid == OID_RSA_ENCRYPTION {
            let key = rsa::RsaPrivateKey::from_pkcs8_der(der)
                .map_err(|e| Error::Certificate(format!("rsa key: {}", e)))?;
            Ok(Self::from_rsa(key))
        } else {
            Err(Error::Certificate(format!("unsupported key algorithm {}", oid)))
        }
    }

    fn from_ed25519_seed(seed: &[u8]) -> Self {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(seed);
        let key = ed25519_dalek::SigningKey::from_bytes(&bytes);
        zeroize::Zeroize::zeroize(&mut bytes);
        let public = PublicKey::new(Verifying::Ed25519(key.verifying_key()));
        KeyPair {
            signing: Signing::Ed25519(key),
            public,
        }
    }

    /// Load a SEC1 `EC PRIVATE KEY` (OpenSSL's EC format) for P-256 or P-384.
    pub fn from_sec1_der(der: &[u8]) -> Result<Self, Error> {
        let ec_key = sec1::EcPrivateKey::try_from(der)
            .map_err(|e| Error::Certificate(format!("sec1: {}", e)))?;

        let curve = match &ec_key.parameters {
            Some(sec1::EcParameters::NamedCurve(oid)) => *oid,
            // no parameters, go by scalar size
            None if ec_key.private_key.len() == 32 => OID_SECP256R1,
            None if ec_key.private_key.len() == 48 => OID_SECP384R1,
            None => return Err(Error::Certificate("unknown ec curve".into())),
        };

        let bad_scalar = |_| Error::Certificate("ec private key".into());
        if curve == OID_SECP256R1 {
            let key = p256::ecdsa::SigningKey::from_slice(ec_key.private_key).map_err(bad_scalar)?;
            let public = PublicKey::new(Verifying::P256(*key.verifying_key()));
            Ok(KeyPair {
                signing: Signing::P256(key),
                public,
            })
        } else if curve == OID_SECP384R1 {
            let key = p384::ecdsa::SigningKey::from_slice(ec_key.private_key).map_err(bad_scalar)?;
            let public = PublicKey::new(Verifying::P384(*key.verifying_key()));
            Ok(KeyPair {
                signing: Signing::P384(key),
                public,
            })
        } else {
            Err(Error::Certificate(format!("unsupported ec curve {}", curve)))
        }
    }

    /// Load a PEM `PRIVATE KEY` or `EC PRIVATE KEY` block.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self, Error> {
        let (label, doc) = pkcs8::SecretDocument::from_pem(pem)
            .map_err(|e| Error::Certificate(format!("pem: {}", e)))?;
        match label {
            "PRIVATE KEY" => Self::from_pkcs8_der(doc.as_bytes()),
            "EC PRIVATE KEY" => Self::from_sec1_der(doc.as_bytes()),
            _ => Err(Error::Certificate(format!("unexpected pem label {}", label))),
        }
    }

    /// Attach a DER certificate chain, leaf first.
    ///
    /// The leaf must certify this key pair's public key.
    pub fn with_certificate_chain(mut self, chain: Vec<Vec<u8>>) -> Result<Self, Error> {
        let leaf = chain
            .first()
            .ok_or_else(|| Error::Certificate("empty certificate chain".into()))?;
        let leaf_key = PublicKey::from_certificate_der(leaf)?;
        if leaf_key != self.public {
            return Err(Error::Certificate(
                "certificate does not match private key".into(),
            ));
        }
        self.public.chain = chain;
        Ok(self)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.public.algorithm()
    }

    /// Sign `msg` with the scheme [`PublicKey::verify`] expects.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, String> {
        match &self.signing {
            Signing::Ed25519(k) => Ok(k.sign(msg).to_bytes().to_vec()),
            Signing::P256(k) => {
                let sig: p256::ecdsa::Signature = k
                    .try_sign(msg)
                    .map_err(|_| "ECDSA signing failed".to_string())?;
                Ok(sig.to_der().as_bytes().to_vec())
            }
            Signing::P384(k) => {
                let sig: p384::ecdsa::Signature = k
                    .try_sign(msg)
                    .map_err(|_| "ECDSA signing failed".to_string())?;
                Ok(sig.to_der().as_bytes().to_vec())
            }
            Signing::Rsa(k) => {
                let sig = k
                    .try_sign(msg)
                    .map_err(|_| "RSA signing failed".to_string())?;
                Ok(sig.to_vec())
            }
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// The 32-byte seed of an Ed25519 PKCS#8 key, v1 or v2, matched by layout.
///
/// ring writes the v2 public key as a constructed `[1]`, which `pkcs8`
/// refuses as non-canonical DER.
fn ed25519_pkcs8_seed(der: &[u8]) -> Option<&[u8]> {
    const ALGORITHM: [u8; 7] = [0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70];
    const PRIVATE_KEY: [u8; 4] = [0x04, 0x22, 0x04, 0x20];

    let [0x30, len, 0x02, 0x01, 0x00 | 0x01, rest @ ..] = der else {
        return None;
    };
    if *len >= 0x80 || *len as usize != rest.len() + 3 {
        return None;
    }
    let rest = rest.strip_prefix(&ALGORITHM[..])?;
    let rest = rest.strip_prefix(&PRIVATE_KEY[..])?;
    rest.get(..32)
}
