//! Locality-sensitive signatures and the strong content digest used for
//! exact-match lookups.
//!
//! `sign` is a min-hash over a rolling fingerprint of fixed-width windows: for
//! each of the `num_hashes` output components, a distinct keyed permutation
//! is applied to every window's fingerprint and the minimum across all
//! windows is kept. Two blobs that share most of their byte windows are
//! expected to agree on most components; unrelated blobs are not. This is
//! the engine's only correctness assumption about the signature family —
//! it is not proven here, only relied upon.
//!
//! The window size, fingerprint, and permutation family below are an
//! implementation-private constant, bumped in lockstep with
//! [`SIGNATURE_VERSION`] whenever any of them changes, so that a catalog
//! opened by an incompatible build fails loudly (`StoreError::SignatureVersionMismatch`)
//! instead of returning silently-wrong grades.

/// Bump whenever the window size, fingerprint, or permutation changes.
pub const SIGNATURE_VERSION: u32 = 1;

const WINDOW_LEN: usize = 4;

/// Sentinel component value for inputs shorter than one window, so that all
/// such inputs cluster together rather than comparing as maximally different.
const EMPTY_SENTINEL: i64 = i64::MAX;

/// Byte length of [`strong_hash`]'s output.
pub const STRONG_HASH_LEN: usize = 32;

/// Derives a `num_hashes`-component locality-sensitive signature from `bytes`.
///
/// Deterministic and stable across runs and processes for a given
/// `(bytes, num_hashes)` pair.
pub fn sign(bytes: &[u8], num_hashes: usize) -> Vec<i64> {
    if bytes.len() < WINDOW_LEN {
        return vec![EMPTY_SENTINEL; num_hashes];
    }

    let mut mins = vec![i64::MAX; num_hashes];
    for window in bytes.windows(WINDOW_LEN) {
        let fp = fingerprint(window);
        for (i, slot) in mins.iter_mut().enumerate() {
            let permuted = permute(fp, i as u64);
            if permuted < *slot {
                *slot = permuted;
            }
        }
    }
    mins
}

/// FNV-1a rolling fingerprint of one window.
fn fingerprint(window: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for &b in window {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

/// Keyed permutation of a fingerprint, distinct per component index.
/// splitmix64-style mixing so that nearby `index` values don't correlate.
fn permute(fingerprint: u64, index: u64) -> i64 {
    let mut z = fingerprint
        .wrapping_add(index.wrapping_mul(0x9E3779B97F4A7C15))
        .wrapping_add(0x9E3779B97F4A7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^= z >> 31;
    // Clear the sign bit: components are compared and stored as i64 but a
    // negative minimum is just as valid a signature value, so this is only to
    // keep SQLite's INTEGER affinity free of sign-related surprises.
    (z >> 1) as i64
}

/// Collision-resistant digest of `bytes`, used as the exact-match key.
pub fn strong_hash(bytes: &[u8]) -> [u8; STRONG_HASH_LEN] {
    *blake3::hash(bytes).as_bytes()
}
