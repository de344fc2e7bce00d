//! Secure random number generation using the OS RNG.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::crypto::provider::SecureRandom;

/// Secure random number generator implementation.
#[derive(Debug)]
pub struct RustCryptoSecureRandom;

impl SecureRandom for RustCryptoSecureRandom {
    fn fill(&self, buf: &mut [u8]) -> Result<(), String> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| format!("OS RNG failure: {}", e))
    }
}

/// Static instance of the secure random generator.
pub static SECURE_RANDOM: RustCryptoSecureRandom = RustCryptoSecureRandom;
