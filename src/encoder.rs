//! Encode session: partition a buffer into interleaved sequences and blocks,
//! generate per-sequence recovery blocks, and emit the deterministic packet
//! stream.

use crate::{
    callsign, erasure, fec,
    packet::{self, PacketType, CRC_SIZE, HEADER_SIZE, PACKET_SIZE},
};
use thiserror::Error;
use tracing::debug;

/// Ceiling on original blocks per sequence. With `recovery = ceil(blocks /
/// 2)` this keeps `blocks + recovery` within the erasure code's GF(256)
/// field.
pub const MAX_SEQUENCE_BLOCKS: usize = 170;

/// A sequence index must fit the single-byte header field.
const MAX_SEQUENCES: usize = 255;

#[derive(Error, Debug)]
pub enum Error {
    #[error("input too large to packetize: {0} bytes")]
    DataTooLarge(usize),
    #[error(transparent)]
    Erasure(#[from] erasure::Error),
}

/// An encode session for a single image.
///
/// Construct, [`load`](Self::load) the image bytes once, then poll
/// [`next_packet`](Self::next_packet) until it returns `None`. A session is
/// single-threaded and owned by one caller; buffers are released on drop.
pub struct Encoder {
    packet_type: PacketType,
    callsign: u32,
    image_id: u8,
    payload_size: usize,

    sequences: usize,
    blocks: usize,
    recovery_count: usize,
    /// Whitening-padding byte count in each sequence's final block.
    leftovers: Vec<u8>,

    /// Image bytes, padded to a whole number of blocks per sequence.
    data: Vec<u8>,
    /// Recovery blocks, contiguous per sequence.
    recovery: Vec<u8>,

    packet_id: u16,
    seq: usize,
    blk: usize,
    loaded: bool,
}

impl Encoder {
    pub fn new(packet_type: PacketType, callsign: &str, image_id: u8) -> Self {
        Self {
            packet_type,
            callsign: callsign::encode(callsign),
            image_id,
            payload_size: packet_type.payload_size(),
            sequences: 0,
            blocks: 0,
            recovery_count: 0,
            leftovers: Vec::new(),
            data: Vec::new(),
            recovery: Vec::new(),
            packet_id: 0,
            seq: 0,
            blk: 0,
            loaded: false,
        }
    }

    /// Partition `data` into sequences and blocks, pad the tail with
    /// whitening noise, and generate the recovery blocks for every sequence.
    pub fn load(&mut self, data: &[u8]) -> Result<(), Error> {
        let payload = self.payload_size;

        // An empty input still becomes one (all-padding) block so that the
        // image remains well-formed on the wire.
        let total_blocks = data.len().div_ceil(payload).max(1);

        // Smallest sequence count that keeps every sequence under the
        // erasure code's block ceiling.
        let mut sequences = 1;
        while total_blocks.div_ceil(sequences) > MAX_SEQUENCE_BLOCKS {
            sequences += 1;
            if sequences > MAX_SEQUENCES {
                return Err(Error::DataTooLarge(data.len()));
            }
        }
        let blocks = total_blocks.div_ceil(sequences);
        let recovery_count = blocks.div_ceil(2);

        // Pad to a whole number of blocks per sequence. Whitening noise
        // rather than zeros: an all-zero tail is degenerate erasure input.
        let padded = sequences * blocks * payload;
        self.data = Vec::with_capacity(padded);
        self.data.extend_from_slice(data);
        self.data.resize(padded, 0);
        whiten(&mut self.data[data.len()..]);

        // Distribute the padding across the final blocks, last sequence
        // first. Total padding is always under `sequences * payload`.
        let mut remaining = padded - data.len();
        self.leftovers = vec![0; sequences];
        for seq in (0..sequences).rev() {
            let leftover = remaining.min(payload);
            self.leftovers[seq] = leftover as u8;
            remaining -= leftover;
        }

        // One erasure pass per sequence: originals are strided across the
        // padded buffer, recovery blocks land contiguously per sequence and
        // get interleaved at emission time.
        let params = erasure::Params {
            original_count: blocks,
            recovery_count,
            block_bytes: payload,
        };
        self.recovery = Vec::with_capacity(sequences * recovery_count * payload);
        for seq in 0..sequences {
            let originals: Vec<&[u8]> = (0..blocks)
                .map(|blk| {
                    let start = (blk * sequences + seq) * payload;
                    &self.data[start..start + payload]
                })
                .collect();
            for block in erasure::encode(&params, &originals)? {
                self.recovery.extend_from_slice(&block);
            }
        }

        self.sequences = sequences;
        self.blocks = blocks;
        self.recovery_count = recovery_count;
        self.packet_id = 0;
        self.seq = 0;
        self.blk = 0;
        self.loaded = true;
        debug!(sequences, blocks, recovery_count, "image loaded");
        Ok(())
    }

    /// Emit the next packet, or `None` once the image is exhausted (repeated
    /// calls keep returning `None`).
    pub fn next_packet(&mut self) -> Option<[u8; PACKET_SIZE]> {
        if !self.loaded || self.blk >= self.blocks + self.recovery_count {
            return None;
        }
        let payload = self.payload_size;

        let body: &[u8] = if self.blk < self.blocks {
            let start = (self.blk * self.sequences + self.seq) * payload;
            &self.data[start..start + payload]
        } else {
            let start = (self.recovery_count * self.seq + (self.blk - self.blocks)) * payload;
            &self.recovery[start..start + payload]
        };

        let eoi =
            self.blk == self.blocks + self.recovery_count - 1 && self.seq == self.sequences - 1;

        let mut pkt = [0u8; PACKET_SIZE];
        pkt[0] = packet::SYNC;
        pkt[1] = self.packet_type.wire();
        pkt[2..6].copy_from_slice(&self.callsign.to_be_bytes());
        pkt[6] = self.image_id;
        pkt[7..9].copy_from_slice(&self.packet_id.to_be_bytes());
        pkt[9] = self.sequences as u8;
        pkt[10] = self.blocks as u8;
        pkt[11] = packet::FLAGS_BASE | (u8::from(eoi) << 2);
        pkt[12] = self.leftovers[self.seq];
        pkt[13] = 0xFF;
        pkt[14] = 0xFF;
        pkt[HEADER_SIZE..HEADER_SIZE + payload].copy_from_slice(body);

        let at = 1 + self.packet_type.crc_region();
        let crc = packet::checksum(&pkt[1..at]);
        pkt[at..at + CRC_SIZE].copy_from_slice(&crc.to_be_bytes());

        if self.packet_type.protected() {
            fec::encode(&mut pkt);
        }

        self.packet_id = self.packet_id.wrapping_add(1);
        self.seq += 1;
        if self.seq >= self.sequences {
            self.seq = 0;
            self.blk += 1;
        }
        Some(pkt)
    }

    /// Interleaved sequence count chosen at load time.
    pub fn sequences(&self) -> usize {
        self.sequences
    }

    /// Original blocks per sequence.
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// Recovery blocks per sequence.
    pub fn recovery_count(&self) -> usize {
        self.recovery_count
    }

    /// Total packets the loaded image will emit.
    pub fn total_packets(&self) -> usize {
        self.sequences * (self.blocks + self.recovery_count)
    }
}

impl Iterator for Encoder {
    type Item = [u8; PACKET_SIZE];

    fn next(&mut self) -> Option<Self::Item> {
        self.next_packet()
    }
}

/// Deterministic whitening generator for padding bytes.
fn whiten(buf: &mut [u8]) {
    let mut l: u8 = 0;
    for byte in buf.iter_mut() {
        l = l.wrapping_mul(245).wrapping_add(45);
        *byte = l;
    }
}
