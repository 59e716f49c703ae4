//! Random byte generation backed by the operating system CSPRNG.
//!
//! Nothing in SealVault that ends up on disk or in a key may come from a
//! general-purpose PRNG; everything goes through these helpers or `OsRng`.

use rand::rngs::OsRng;
use rand::RngCore;

/// Fill `buf` with random bytes.
pub fn fill_random(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

/// Return `len` random bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    fill_random(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes_length() {
        assert_eq!(random_bytes(0).len(), 0);
        assert_eq!(random_bytes(513).len(), 513);
    }

    #[test]
    fn test_random_bytes_differ() {
        assert_ne!(random_bytes(32), random_bytes(32));
    }
}
