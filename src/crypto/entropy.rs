//! OS entropy for every value that has to look random on the wire.
//!
//! CFB IVs, session ids, the server random, Finished bodies, ticket nonces
//! and the per-process opaque value all come from here.

use rand::RngCore;
use rand_core::OsRng;

/// Overwrite `dest` with fresh random bytes.
pub fn fill(dest: &mut [u8]) {
    OsRng.fill_bytes(dest);
}

/// A fixed-size array of fresh random bytes.
pub fn array<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    fill(&mut out);
    out
}

/// A random 32-bit value.
pub fn u32() -> u32 {
    OsRng.next_u32()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::IV_SIZE;

    #[test]
    fn test_ivs_do_not_repeat() {
        let ivs: std::collections::HashSet<[u8; IV_SIZE]> = (0..64).map(|_| array()).collect();
        assert_eq!(ivs.len(), 64);
    }

    #[test]
    fn test_fill_reaches_every_byte() {
        // A 40-byte Finished body: the tail must be written as well as the head
        let mut body = [0u8; 40];
        let mut seen = [false; 40];
        for _ in 0..16 {
            fill(&mut body);
            for (flag, byte) in seen.iter_mut().zip(body) {
                *flag |= byte != 0;
            }
        }
        assert!(seen.iter().all(|&touched| touched));
    }

    #[test]
    fn test_u32_varies() {
        let values: std::collections::HashSet<u32> = (0..8).map(|_| u32()).collect();
        assert!(values.len() > 1);
    }
}
