//! XOR mask applied to stored script payloads
//!
//! The keystream is the base key expanded by the block's 64-bit mask key:
//! every base byte is XORed with each of the eight key bytes in turn. The
//! first [`MASK_START`] payload bytes are stored in the clear.

/// Payload bytes before this offset are never masked
pub const MASK_START: usize = 256;

const BASE_KEY: [u8; 11] = [
    0x53, 0x2b, 0x46, 0x31, 0xe4, 0xa7, 0xb9, 0x47, 0x3e, 0x7c, 0xfb,
];

/// Expand a block's mask key into its keystream
#[must_use]
pub fn derive_key(mask_key: u64) -> [u8; BASE_KEY.len() * 8] {
    let key_bytes = mask_key.to_le_bytes();
    let mut stream = [0u8; BASE_KEY.len() * 8];
    for (i, base) in BASE_KEY.iter().enumerate() {
        for (j, k) in key_bytes.iter().enumerate() {
            stream[(i << 3) + j] = base ^ k;
        }
    }
    stream
}

/// Toggle the mask in place; applying it twice restores the input
pub fn apply_mask(data: &mut [u8], mask_key: u64) {
    let stream = derive_key(mask_key);
    for (i, byte) in data.iter_mut().enumerate().skip(MASK_START) {
        *byte ^= stream[i % stream.len()];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_is_involution() {
        let original: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
        let mut data = original.clone();
        apply_mask(&mut data, 0x1234_5678_9abc_def0);
        assert_eq!(&data[..MASK_START], &original[..MASK_START]);
        assert_ne!(data, original);
        apply_mask(&mut data, 0x1234_5678_9abc_def0);
        assert_eq!(data, original);
    }

    #[test]
    fn test_short_payload_untouched() {
        let mut data = vec![7u8; 100];
        apply_mask(&mut data, u64::MAX);
        assert_eq!(data, vec![7u8; 100]);
    }
}
