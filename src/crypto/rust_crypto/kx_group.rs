//! Key exchange implementations using RustCrypto.

use num_bigint::{BigUint, RandBigInt};
use p256::{ecdh::EphemeralSecret, PublicKey as P256PublicKey};
use p384::{ecdh::EphemeralSecret as P384EphemeralSecret, PublicKey as P384PublicKey};
use rand::rngs::OsRng;

use crate::buffer::Buf;
use crate::crypto::provider::{ActiveKeyExchange, KeyExchangeAlgorithm};

pub const KX_X25519: u8 = 0;
pub const KX_SECP256R1: u8 = 1;
pub const KX_SECP384R1: u8 = 2;
pub const KX_FFDHE2048: u8 = 3;

/// ECDHE key exchange implementation.
enum EcdhKeyExchange {
    X25519 {
        secret: x25519_dalek::EphemeralSecret,
        public_key: Buf,
    },
    P256 {
        secret: EphemeralSecret,
        public_key: Buf,
    },
    P384 {
        secret: P384EphemeralSecret,
        public_key: Buf,
    },
}

impl std::fmt::Debug for EcdhKeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EcdhKeyExchange::X25519 { .. } => "EcdhKeyExchange::X25519",
            EcdhKeyExchange::P256 { .. } => "EcdhKeyExchange::P256",
            EcdhKeyExchange::P384 { .. } => "EcdhKeyExchange::P384",
        };
        f.debug_struct(name)
            .field("public_key_len", &self.pub_key().len())
            .finish_non_exhaustive()
    }
}

impl EcdhKeyExchange {
    fn new(id: u8, mut buf: Buf) -> Result<Self, String> {
        buf.clear();
        match id {
            KX_X25519 => {
                let secret = x25519_dalek::EphemeralSecret::random_from_rng(OsRng);
                let public = x25519_dalek::PublicKey::from(&secret);
                buf.extend_from_slice(public.as_bytes());
                Ok(EcdhKeyExchange::X25519 {
                    secret,
                    public_key: buf,
                })
            }
            KX_SECP256R1 => {
                let secret = EphemeralSecret::random(&mut OsRng);
                let public = P256PublicKey::from(&secret);
                buf.extend_from_slice(&public.to_sec1_bytes());
                Ok(EcdhKeyExchange::P256 {
                    secret,
                    public_key: buf,
                })
            }
            KX_SECP384R1 => {
                let secret = P384EphemeralSecret::random(&mut OsRng);
                let public = P384PublicKey::from(&secret);
                buf.extend_from_slice(&public.to_sec1_bytes());
                Ok(EcdhKeyExchange::P384 {
                    secret,
                    public_key: buf,
                })
            }
            _ => Err(format!("Unsupported ECDHE group {}", id)),
        }
    }
}

impl ActiveKeyExchange for EcdhKeyExchange {
    fn pub_key(&self) -> &[u8] {
        match self {
            EcdhKeyExchange::X25519 { public_key, .. } => public_key,
            EcdhKeyExchange::P256 { public_key, .. } => public_key,
            EcdhKeyExchange::P384 { public_key, .. } => public_key,
        }
    }

    fn complete(self: Box<Self>, peer_pub: &[u8], out: &mut Buf) -> Result<(), String> {
        out.clear();
        match *self {
            EcdhKeyExchange::X25519 { secret, .. } => {
                let peer: [u8; 32] = peer_pub
                    .try_into()
                    .map_err(|_| "Invalid X25519 public key".to_string())?;
                let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(peer));
                if !shared.was_contributory() {
                    return Err("X25519 low order point".to_string());
                }
                out.extend_from_slice(shared.as_bytes());
            }
            EcdhKeyExchange::P256 { secret, .. } => {
                let peer_key = P256PublicKey::from_sec1_bytes(peer_pub)
                    .map_err(|_| "Invalid P-256 public key".to_string())?;
                let shared_secret = secret.diffie_hellman(&peer_key);
                out.extend_from_slice(shared_secret.raw_secret_bytes().as_slice());
            }
            EcdhKeyExchange::P384 { secret, .. } => {
                let peer_key = P384PublicKey::from_sec1_bytes(peer_pub)
                    .map_err(|_| "Invalid P-384 public key".to_string())?;
                let shared_secret = secret.diffie_hellman(&peer_key);
                out.extend_from_slice(shared_secret.raw_secret_bytes().as_slice());
            }
        }
        Ok(())
    }

    fn id(&self) -> u8 {
        match self {
            EcdhKeyExchange::X25519 { .. } => KX_X25519,
            EcdhKeyExchange::P256 { .. } => KX_SECP256R1,
            EcdhKeyExchange::P384 { .. } => KX_SECP384R1,
        }
    }
}

/// RFC 7919 ffdhe2048 prime, generator 2.
const FFDHE2048_P: &str = "\
FFFFFFFFFFFFFFFFADF85458A2BB4A9AAFDC5620273D3CF1\
D8B9C583CE2D3695A9E13641146433FBCC939DCE249B3EF9\
7D2FE363630C75D8F681B202AEC4617AD3DF1ED5D5FD6561\
2433F51F5F066ED0856365553DED1AF3B557135E7F57C935\
984F0C70E0E68B77E2A689DAF3EFE8721DF158A136ADE735\
30ACCA4F483A797ABC0AB182B324FB61D108A94BB2C8E3FB\
B96ADAB760D7F4681D4F42A3DE394DF4AE56EDE76372BB19\
0B07A7C8EE0A6D709E02FCE1CDF7E2ECC03404CD28342F61\
9172FE9CE98583FF8E4F1232EEF28183C3FE3B1B4C6FAD73\
3BB5FCBC2EC22005C58EF1837D1683B2C6F34A26C1B2EFFA\
886B423861285C97FFFFFFFFFFFFFFFF";

const FFDHE2048_LEN: usize = 256;

/// Bits of the private exponent (twice the group's security level).
const FFDHE2048_EXPONENT_BITS: u64 = 256;

fn ffdhe2048_prime() -> Result<BigUint, String> {
    BigUint::parse_bytes(FFDHE2048_P.as_bytes(), 16).ok_or_else(|| "ffdhe2048 prime".to_string())
}

/// Left-pad a group element to the full modulus length.
fn to_fixed_len(n: &BigUint, out: &mut Buf) {
    let bytes = n.to_bytes_be();
    out.resize(FFDHE2048_LEN - bytes.len(), 0);
    out.extend_from_slice(&bytes);
}

/// Finite field DHE over ffdhe2048.
struct DheKeyExchange {
    p: BigUint,
    x: BigUint,
    public_key: Buf,
}

impl std::fmt::Debug for DheKeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DheKeyExchange::ffdhe2048")
            .field("public_key_len", &self.public_key.len())
            .finish_non_exhaustive()
    }
}

impl DheKeyExchange {
    fn new(mut buf: Buf) -> Result<Self, String> {
        let p = ffdhe2048_prime()?;
        let x = OsRng.gen_biguint(FFDHE2048_EXPONENT_BITS);
        let y = BigUint::from(2u8).modpow(&x, &p);
        buf.clear();
        to_fixed_len(&y, &mut buf);
        Ok(DheKeyExchange {
            p,
            x,
            public_key: buf,
        })
    }
}

impl ActiveKeyExchange for DheKeyExchange {
    fn pub_key(&self) -> &[u8] {
        &self.public_key
    }

    fn complete(self: Box<Self>, peer_pub: &[u8], out: &mut Buf) -> Result<(), String> {
        if peer_pub.len() != FFDHE2048_LEN {
            return Err(format!("Invalid DHE public value length {}", peer_pub.len()));
        }
        let y = BigUint::from_bytes_be(peer_pub);
        let one = BigUint::from(1u8);
        if y <= one || y >= &self.p - &one {
            return Err("DHE public value out of range".to_string());
        }
        let z = y.modpow(&self.x, &self.p);
        out.clear();
        to_fixed_len(&z, out);
        Ok(())
    }

    fn id(&self) -> u8 {
        KX_FFDHE2048
    }
}

/// X25519 key exchange.
#[derive(Debug)]
pub struct X25519;

impl KeyExchangeAlgorithm for X25519 {
    fn id(&self) -> u8 {
        KX_X25519
    }

    fn name(&self) -> &'static str {
        "x25519"
    }

    fn start_exchange(&self, buf: Buf) -> Result<Box<dyn ActiveKeyExchange>, String> {
        Ok(Box::new(EcdhKeyExchange::new(KX_X25519, buf)?))
    }
}

/// P-256 (secp256r1) key exchange group.
#[derive(Debug)]
pub struct P256;

impl KeyExchangeAlgorithm for P256 {
    fn id(&self) -> u8 {
        KX_SECP256R1
    }

    fn name(&self) -> &'static str {
        "secp256r1"
    }

    fn start_exchange(&self, buf: Buf) -> Result<Box<dyn ActiveKeyExchange>, String> {
        Ok(Box::new(EcdhKeyExchange::new(KX_SECP256R1, buf)?))
    }
}

/// P-384 (secp384r1) key exchange group.
#[derive(Debug)]
pub struct P384;

impl KeyExchangeAlgorithm for P384 {
    fn id(&self) -> u8 {
        KX_SECP384R1
    }

    fn name(&self) -> &'static str {
        "secp384r1"
    }

    fn start_exchange(&self, buf: Buf) -> Result<Box<dyn ActiveKeyExchange>, String> {
        Ok(Box::new(EcdhKeyExchange::new(KX_SECP384R1, buf)?))
    }
}

/// ffdhe2048 finite field group.
#[derive(Debug)]
pub struct Ffdhe2048;

impl KeyExchangeAlgorithm for Ffdhe2048 {
    fn id(&self) -> u8 {
        KX_FFDHE2048
    }

    fn name(&self) -> &'static str {
        "ffdhe2048"
    }

    fn start_exchange(&self, buf: Buf) -> Result<Box<dyn ActiveKeyExchange>, String> {
        Ok(Box::new(DheKeyExchange::new(buf)?))
    }
}

pub static KX_GROUP_X25519: X25519 = X25519;
pub static KX_GROUP_P256: P256 = P256;
pub static KX_GROUP_P384: P384 = P384;
pub static KX_GROUP_FFDHE2048: Ffdhe2048 = Ffdhe2048;

/// All supported key exchange groups, in default preference order.
pub(super) static ALL_KX_GROUPS: &[&dyn KeyExchangeAlgorithm] = &[
    &KX_GROUP_X25519,
    &KX_GROUP_P256,
    &KX_GROUP_P384,
    &KX_GROUP_FFDHE2048,
];
