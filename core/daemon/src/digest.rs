//! DJB string hash used to tag website URLs in logs.
//!
//! Not cryptographic and not collision resistant. Arithmetic wraps at the
//! native word width, so values differ between 32- and 64-bit builds.

const DJB_SEED: usize = 5381;

pub fn djb(input: &str) -> usize {
    input.bytes().fold(DJB_SEED, |hash, byte| {
        hash.wrapping_mul(33).wrapping_add(usize::from(byte))
    })
}
