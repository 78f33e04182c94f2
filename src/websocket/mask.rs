//! Frame payload masking (RFC 6455 §5.3).

/// XORs `data` in place with the 4-byte `mask`. Applying it twice restores
/// the original bytes.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// A fresh random masking key for an outgoing frame.
#[inline]
pub fn generate_mask() -> [u8; 4] {
    fastrand::u32(..).to_ne_bytes()
}
