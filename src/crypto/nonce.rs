//! Per-record nonce construction for AES-GCM.
//!
//! The 12-byte nonce is the traffic IV XORed with the record counter,
//! left-padded to 12 bytes big-endian:
//!
//! ```text
//! nonce = iv XOR [ zeros (4) | counter (8, BE64) ]
//! ```
//!
//! The counter restarts at 0 whenever a direction's key is replaced, and a
//! fresh key always comes with a fresh IV, so a (key, nonce) pair never
//! repeats.

use crate::core::AEAD_IV_SIZE;

/// Construct the nonce for record `counter` under `iv`.
pub fn construct_nonce(iv: &[u8; AEAD_IV_SIZE], counter: u64) -> [u8; AEAD_IV_SIZE] {
    let mut nonce = *iv;
    for (byte, c) in nonce[AEAD_IV_SIZE - 8..]
        .iter_mut()
        .zip(counter.to_be_bytes())
    {
        *byte ^= c;
    }
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_zero_is_iv() {
        let iv = [0xA5; AEAD_IV_SIZE];
        assert_eq!(construct_nonce(&iv, 0), iv);
    }

    #[test]
    fn test_counter_xored_big_endian() {
        let iv = [0u8; AEAD_IV_SIZE];
        let nonce = construct_nonce(&iv, 0x0102_0304_0506_0708);
        assert_eq!(&nonce[..4], &[0, 0, 0, 0]);
        assert_eq!(&nonce[4..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_distinct_counters_distinct_nonces() {
        let iv: [u8; AEAD_IV_SIZE] = std::array::from_fn(|i| i as u8 + 0xA0);
        assert_ne!(construct_nonce(&iv, 1), construct_nonce(&iv, 2));
        assert_eq!(construct_nonce(&iv, 1)[..4], iv[..4]);
    }
}
