//! Decode session: accumulate validated packets into per-sequence reception
//! state, run erasure recovery, and re-linearize the original byte stream.

use crate::{
    erasure,
    packet::{PacketInfo, HEADER_SIZE, PACKET_SIZE},
};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("no packets fed")]
    Empty,
    #[error("recovery failed for sequences {0:?}")]
    Recovery(Vec<u8>),
}

/// Stream configuration locked in from the first fed packet.
#[derive(Debug, Clone, Copy)]
struct StreamConfig {
    payload_size: usize,
    sequences: usize,
    blocks: usize,
    recovery_count: usize,
}

/// One received block: where its payload sits in the receive buffer and which
/// block index it claims.
#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: usize,
    index: usize,
}

/// A decode session for a single image.
///
/// Feed validated packets in any order, call [`recover`](Self::recover) once
/// feeding ends, then poll [`next_chunk`](Self::next_chunk) for the
/// reconstructed stream. Unrecoverable blocks are skipped silently, so the
/// output degrades to a shorter stream under heavy loss rather than failing.
pub struct Decoder {
    config: Option<StreamConfig>,
    /// All received (and later recovered) payloads, appended in arrival order.
    buffer: Vec<u8>,
    /// Per-sequence reception matrix.
    matrix: Vec<Vec<Slot>>,
    /// Per-sequence padding byte counts; last write wins.
    leftovers: Vec<u8>,
    seq: usize,
    blk: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            config: None,
            buffer: Vec::new(),
            matrix: Vec::new(),
            leftovers: Vec::new(),
            seq: 0,
            blk: 0,
        }
    }

    /// Feed one packet that already passed [`crate::packet::validate`].
    ///
    /// The first packet locks the stream configuration (type, sequences,
    /// blocks); later packets are interpreted under it. Duplicates simply
    /// occupy extra slots, which recovery tolerates.
    pub fn feed(&mut self, packet: &[u8; PACKET_SIZE]) {
        let info = PacketInfo::decode(packet);
        // validate() rejects unknown type ids before packets get here.
        let Some(packet_type) = info.packet_type() else {
            return;
        };

        let config = match self.config {
            Some(config) => config,
            None => {
                let config = StreamConfig {
                    payload_size: packet_type.payload_size(),
                    sequences: usize::from(info.sequences),
                    blocks: usize::from(info.blocks),
                    recovery_count: usize::from(info.blocks).div_ceil(2),
                };
                info!(
                    callsign = %info.callsign_text(),
                    image_id = info.image_id,
                    sequences = info.sequences,
                    blocks = info.blocks,
                    "image configuration locked"
                );
                self.matrix = vec![Vec::new(); config.sequences];
                self.leftovers = vec![0; config.sequences];
                self.config = Some(config);
                config
            }
        };

        let seq = usize::from(info.packet_id) % config.sequences;
        let index = usize::from(info.packet_id) / config.sequences;
        // A hostile but checksum-valid packet can claim more padding than a
        // block holds; clamp so extraction trims at most a whole block.
        self.leftovers[seq] = info.leftover.min(config.payload_size as u8);

        let offset = self.buffer.len();
        self.buffer
            .extend_from_slice(&packet[HEADER_SIZE..HEADER_SIZE + config.payload_size]);
        self.matrix[seq].push(Slot { offset, index });
    }

    /// Run erasure recovery over every sequence.
    ///
    /// Reconstructed original blocks are appended to the receive buffer and
    /// slotted into their sequence. A sequence with too few blocks is
    /// reported in the error but does not stop the others, and everything
    /// already received remains extractable.
    pub fn recover(&mut self) -> Result<(), Error> {
        let config = self.config.ok_or(Error::Empty)?;
        let params = erasure::Params {
            original_count: config.blocks,
            recovery_count: config.recovery_count,
            block_bytes: config.payload_size,
        };

        let mut failed = Vec::new();
        for seq in 0..config.sequences {
            let result = {
                let tagged: Vec<(usize, &[u8])> = self.matrix[seq]
                    .iter()
                    .map(|slot| {
                        (
                            slot.index,
                            &self.buffer[slot.offset..slot.offset + config.payload_size],
                        )
                    })
                    .collect();
                erasure::decode(&params, &tagged)
            };
            let originals = match result {
                Ok(originals) => originals,
                Err(err) => {
                    warn!(seq, %err, "sequence unrecoverable");
                    failed.push(seq as u8);
                    continue;
                }
            };

            // Fill in the slots that were never received.
            for (index, block) in originals.into_iter().enumerate() {
                if self.matrix[seq].iter().any(|slot| slot.index == index) {
                    continue;
                }
                let offset = self.buffer.len();
                self.buffer.extend_from_slice(&block);
                self.matrix[seq].push(Slot { offset, index });
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::Recovery(failed))
        }
    }

    /// Emit the next reconstructed chunk in stream order.
    ///
    /// Walks the encoder's interleaving order over original block indices,
    /// trimming the final block of each sequence of its padding. Blocks that
    /// were neither received nor recovered are skipped. `None` marks end of
    /// image.
    pub fn next_chunk(&mut self) -> Option<&[u8]> {
        let config = self.config?;
        while self.blk < config.blocks {
            let seq = self.seq;
            let blk = self.blk;
            self.seq += 1;
            if self.seq >= config.sequences {
                self.seq = 0;
                self.blk += 1;
            }

            let Some(slot) = self.matrix[seq].iter().find(|slot| slot.index == blk) else {
                continue;
            };
            let len = if blk == config.blocks - 1 {
                config.payload_size - usize::from(self.leftovers[seq])
            } else {
                config.payload_size
            };
            return Some(&self.buffer[slot.offset..slot.offset + len]);
        }
        None
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Encoder, PacketType};

    fn encode(data: &[u8], ty: PacketType) -> Vec<[u8; PACKET_SIZE]> {
        let mut enc = Encoder::new(ty, "N0CALL", 1);
        enc.load(data).unwrap();
        enc.collect()
    }

    fn extract(dec: &mut Decoder) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = dec.next_chunk() {
            out.extend_from_slice(chunk);
        }
        out
    }

    #[test]
    fn recover_without_feeding_is_an_error() {
        let mut dec = Decoder::new();
        assert_eq!(dec.recover(), Err(Error::Empty));
        assert!(dec.next_chunk().is_none());
    }

    #[test]
    fn out_of_order_feeding_is_fine() {
        let data: Vec<u8> = (0..2000u32).map(|i| i as u8).collect();
        let mut packets = encode(&data, PacketType::CbecNoFec);
        packets.reverse();

        let mut dec = Decoder::new();
        for pkt in &packets {
            dec.feed(pkt);
        }
        dec.recover().unwrap();
        assert_eq!(extract(&mut dec), data);
    }

    #[test]
    fn duplicates_are_harmless() {
        let data = vec![0x5A; 700];
        let packets = encode(&data, PacketType::Cbec);

        let mut dec = Decoder::new();
        for pkt in &packets {
            dec.feed(pkt);
            dec.feed(pkt);
        }
        dec.recover().unwrap();
        assert_eq!(extract(&mut dec), data);
    }

    #[test]
    fn leftover_last_write_wins() {
        // Disagreeing leftover fields across a sequence's packets resolve to
        // the most recently fed value.
        let data = vec![0x11; 300];
        let packets = encode(&data, PacketType::CbecNoFec);
        let payload = PacketType::CbecNoFec.payload_size();

        let mut dec = Decoder::new();
        for pkt in &packets {
            dec.feed(pkt);
        }
        // Re-feed the first packet with a forged leftover field and a fixed
        // checksum so it stays structurally valid.
        let mut forged = packets[0];
        forged[12] = (payload - 10) as u8;
        let at = 1 + PacketType::CbecNoFec.crc_region();
        let crc = crate::packet::checksum(&forged[1..at]);
        forged[at..at + 4].copy_from_slice(&crc.to_be_bytes());
        dec.feed(&forged);

        dec.recover().unwrap();
        // Final block now claims only 10 real bytes.
        let out = extract(&mut dec);
        assert_eq!(out.len(), payload + 10);
    }

    #[test]
    fn oversized_leftover_is_clamped() {
        // A leftover field larger than the payload passes validation (the
        // checksum covers it, nothing bounds it); extraction must trim the
        // whole final block rather than underflow.
        let data = vec![0x22; 300];
        let packets = encode(&data, PacketType::CbecNoFec);
        let payload = PacketType::CbecNoFec.payload_size();

        let mut forged = packets[0];
        forged[12] = 0xFF;
        let at = 1 + PacketType::CbecNoFec.crc_region();
        let crc = crate::packet::checksum(&forged[1..at]);
        forged[at..at + 4].copy_from_slice(&crc.to_be_bytes());
        assert!(crate::packet::validate(&mut forged).is_ok());

        let mut dec = Decoder::new();
        for pkt in &packets {
            dec.feed(pkt);
        }
        dec.feed(&forged);
        dec.recover().unwrap();
        // Two blocks, final one trimmed away entirely.
        assert_eq!(extract(&mut dec).len(), payload);
    }
}
