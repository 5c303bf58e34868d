//! Seed handling for deterministic obfuscation.
//!
//! Every random decision in a run (block shuffles, anti-debug placement, generated names)
//! draws from a stream derived from one 32-byte [`Seed`]. Streams are keyed by a domain
//! string so that each method gets the same randomness no matter which thread processes it.

use crate::errors::SeedError;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// 32-byte root seed for an obfuscation run.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Seed([u8; 32]);

impl Seed {
    /// Wraps raw seed bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Expands a numeric seed into 32 bytes with keccak-256.
    pub fn from_u64(value: u64) -> Self {
        let mut hasher = Keccak256::new();
        hasher.update(value.to_le_bytes());
        Self(hasher.finalize().into())
    }

    /// Parses a 64-character hex string, with or without a `0x` prefix.
    pub fn from_hex(input: &str) -> Result<Self, SeedError> {
        let clean = input.trim().trim_start_matches("0x");
        if clean.len() != 64 {
            return Err(SeedError::InvalidLength(clean.len()));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(clean, &mut bytes).map_err(|_| SeedError::InvalidHex)?;
        Ok(Self(bytes))
    }

    /// Draws a fresh seed from the operating system.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw seed bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns an RNG stream keyed by `domain`.
    ///
    /// The same seed and domain always yield the same stream.
    pub fn rng_for(&self, domain: &[u8]) -> StdRng {
        let mut hasher = Keccak256::new();
        hasher.update(self.0);
        hasher.update(domain);
        StdRng::from_seed(hasher.finalize().into())
    }

    /// Hex form without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for Seed {
    fn default() -> Self {
        Self::from_u64(42)
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seed(0x{})", self.to_hex())
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}
