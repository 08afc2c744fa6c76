//! Block checksum.
//!
//! A block on the wire is `BLOCK_START`, the payload length as a
//! little-endian `u16`, the payload, and one checksum byte. The checksum is
//! chosen so that the length bytes, payload and checksum sum to zero
//! modulo 256.

/// Modular sum of the length bytes and payload.
pub fn sum(payload: &[u8]) -> u8 {
    let len = (payload.len() as u16).to_le_bytes();
    len.iter()
        .chain(payload)
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Checksum byte that closes a block carrying `payload`.
pub fn checksum(payload: &[u8]) -> u8 {
    sum(payload).wrapping_neg()
}

/// Residue of a received block; zero when the checksum is good.
pub fn residue(payload: &[u8], checksum: u8) -> u8 {
    sum(payload).wrapping_add(checksum)
}
