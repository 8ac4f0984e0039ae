//! Byte-level forward-error-correction adapter.
//!
//! Protected packet types carry [`PARITY_SIZE`] Reed-Solomon parity bytes
//! computed over everything after the sync byte. The code spans the full
//! 255-byte GF(256) codeword, so up to 16 corrupted bytes anywhere in the
//! region (header, payload, checksum or parity) are repairable.

use crate::packet::{PACKET_SIZE, PARITY_SIZE};
use reed_solomon::{Decoder, Encoder};

/// Length of the protected data region: everything after the sync byte and
/// before the parity tail.
const DATA_LEN: usize = PACKET_SIZE - 1 - PARITY_SIZE;

/// Compute parity over the protected region and write it to the final
/// [`PARITY_SIZE`] bytes of the packet.
pub fn encode(packet: &mut [u8; PACKET_SIZE]) {
    let encoder = Encoder::new(PARITY_SIZE);
    let encoded = encoder.encode(&packet[1..1 + DATA_LEN]);
    packet[1 + DATA_LEN..].copy_from_slice(encoded.ecc());
}

/// Correct byte errors in the protected region in place.
///
/// Returns the number of corrected bytes, or `None` when the region is beyond
/// repair.
pub fn correct(packet: &mut [u8; PACKET_SIZE]) -> Option<usize> {
    let decoder = Decoder::new(PARITY_SIZE);
    let (corrected, errors) = decoder.correct_err_count(&packet[1..], None).ok()?;
    packet[1..].copy_from_slice(&corrected[..]);
    Some(errors)
}
