//! Seeds for the sampler.
//!
//! A named request always maps to the same seed, in this process and in any
//! other, so regenerating for the same name reproduces the same image. The
//! hash is XXH32 with a fixed seed of zero over the UTF-8 bytes of the name
//! followed by the kind's suffix.

use rand::Rng;
use xxhash_rust::xxh32::xxh32;

use crate::ImageKind;

const HASH_SEED: u32 = 0;

/// Stable 32-bit hash of `name` followed by `suffix`.
pub fn stable_seed(name: &str, suffix: &str) -> u32 {
    let mut bytes = Vec::with_capacity(name.len() + suffix.len());
    bytes.extend_from_slice(name.as_bytes());
    bytes.extend_from_slice(suffix.as_bytes());
    xxh32(&bytes, HASH_SEED)
}

/// Derives the seed for a request. Absent or empty names get a fresh random
/// seed.
pub fn derive_seed(name: Option<&str>, suffix: &str) -> u32 {
    match name {
        Some(name) if !name.is_empty() => stable_seed(name, suffix),
        _ => rand::thread_rng().gen(),
    }
}

pub fn seed_for(name: Option<&str>, kind: ImageKind) -> u32 {
    derive_seed(name, kind.seed_suffix())
}
