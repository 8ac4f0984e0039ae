//! The canonical 256-byte packet layout and the validation state machine.
//!
//! Field offsets (multi-byte fields are big-endian):
//!
//! | Offset  | Field     | Meaning                                        |
//! |---------|-----------|------------------------------------------------|
//! | 0       | sync      | fixed `0x55`, excluded from the checksum       |
//! | 1       | type      | `0x66` + type id                               |
//! | 2..6    | callsign  | base-40 encoded station id                     |
//! | 6       | image id  | which image this packet belongs to             |
//! | 7..9    | packet id | monotonically increasing sequence number       |
//! | 9       | sequences | interleaved sequence count                     |
//! | 10      | blocks    | original blocks per sequence                   |
//! | 11      | flags     | bit 2 = end of image                           |
//! | 12      | leftover  | whitening-padding bytes in the final block     |
//! | 13..15  | reserved  | `0xFF` compatibility padding                   |
//! | 15..    | payload   | block data, length depends on the type         |
//! | ..+4    | crc32     | checksum over type byte through payload        |
//! | (+32)   | parity    | Reed-Solomon parity, protected types only      |

use crate::{callsign, fec};
use thiserror::Error;

/// Every packet is exactly this many bytes.
pub const PACKET_SIZE: usize = 256;

/// Header length, including the sync byte.
pub const HEADER_SIZE: usize = 15;

/// CRC-32 length.
pub const CRC_SIZE: usize = 4;

/// Reed-Solomon parity length for FEC-protected types.
pub const PARITY_SIZE: usize = 32;

/// Sync marker at offset 0.
pub const SYNC: u8 = 0x55;

/// Constant bits carried in the flags byte.
pub(crate) const FLAGS_BASE: u8 = 0b0100_0000;

const TYPE_BASE: u8 = 0x66;
const EOI_BIT: u8 = 2;

/// Packet type: legacy vs CBEC id space, FEC-protected vs unprotected framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Original type id with Reed-Solomon parity (`0x66`).
    Legacy,
    /// Original type id without parity (`0x67`).
    LegacyNoFec,
    /// CBEC type id with Reed-Solomon parity (`0x68`).
    Cbec,
    /// CBEC type id without parity (`0x69`).
    CbecNoFec,
}

impl PacketType {
    /// Numeric type id carried (offset by `0x66`) in the type byte.
    pub fn id(self) -> u8 {
        match self {
            Self::Legacy => 0,
            Self::LegacyNoFec => 1,
            Self::Cbec => 2,
            Self::CbecNoFec => 3,
        }
    }

    /// The on-air type byte.
    pub fn wire(self) -> u8 {
        TYPE_BASE + self.id()
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Legacy),
            1 => Some(Self::LegacyNoFec),
            2 => Some(Self::Cbec),
            3 => Some(Self::CbecNoFec),
            _ => None,
        }
    }

    pub fn from_wire(byte: u8) -> Option<Self> {
        Self::from_id(byte.wrapping_sub(TYPE_BASE))
    }

    /// Whether packets of this type carry a Reed-Solomon parity tail.
    pub fn protected(self) -> bool {
        matches!(self, Self::Legacy | Self::Cbec)
    }

    /// Block payload bytes per packet.
    pub fn payload_size(self) -> usize {
        if self.protected() {
            PACKET_SIZE - HEADER_SIZE - CRC_SIZE - PARITY_SIZE
        } else {
            PACKET_SIZE - HEADER_SIZE - CRC_SIZE
        }
    }

    /// Byte count covered by the checksum, starting at the type byte.
    pub fn crc_region(self) -> usize {
        HEADER_SIZE + self.payload_size() - 1
    }
}

/// Compute the packet checksum over a header+payload region.
pub fn checksum(region: &[u8]) -> u32 {
    crc32fast::hash(region)
}

/// Header fields, extracted without validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketInfo {
    /// Raw type id (type byte minus `0x66`); may not name a real type.
    pub type_id: u8,
    pub callsign: u32,
    pub image_id: u8,
    pub packet_id: u16,
    pub sequences: u8,
    pub blocks: u8,
    pub eoi: bool,
    pub leftover: u8,
}

impl PacketInfo {
    /// Pure extraction of the header fields.
    pub fn decode(packet: &[u8; PACKET_SIZE]) -> Self {
        Self {
            type_id: packet[1].wrapping_sub(TYPE_BASE),
            callsign: u32::from_be_bytes([packet[2], packet[3], packet[4], packet[5]]),
            image_id: packet[6],
            packet_id: u16::from_be_bytes([packet[7], packet[8]]),
            sequences: packet[9],
            blocks: packet[10],
            eoi: (packet[11] >> EOI_BIT) & 1 == 1,
            leftover: packet[12],
        }
    }

    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_id(self.type_id)
    }

    pub fn callsign_text(&self) -> String {
        callsign::decode(self.callsign)
    }
}

/// Why a candidate packet was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidPacket {
    #[error("checksum mismatch after correction")]
    Checksum,
    #[error("uncorrectable errors")]
    Uncorrectable,
    #[error("declared type does not match framing")]
    TypeMismatch,
    #[error("degenerate header")]
    DegenerateHeader,
}

/// Validate a candidate packet, repairing bit errors in place where the type
/// carries parity. Returns the number of corrected bytes.
///
/// Interpretations are attempted in order, first success wins:
///
/// 1. Unprotected type byte with a matching checksum.
/// 2. Protected type byte with a matching checksum.
/// 3. Forced-protected correction: guess the CBEC protected id, then the
///    legacy one, and let the Reed-Solomon decoder repair the region (a wrong
///    guess at the type byte is just one more correctable error); the
///    checksum must then match.
///
/// Whichever path wins, the declared type must agree with that path's framing
/// and the header must not be degenerate. On success the caller's buffer is
/// replaced with the repaired bytes and the sync byte is normalized.
pub fn validate(packet: &mut [u8; PACKET_SIZE]) -> Result<usize, InvalidPacket> {
    let mut work = *packet;
    work[0] = SYNC;

    let wire = work[1];
    let unprotected_id =
        wire == PacketType::CbecNoFec.wire() || wire == PacketType::LegacyNoFec.wire();
    let protected_id = wire == PacketType::Cbec.wire() || wire == PacketType::Legacy.wire();

    let (protected_framing, errors) = if unprotected_id && crc_matches(&work, false) {
        (false, 0)
    } else if protected_id && crc_matches(&work, true) {
        (true, 0)
    } else {
        let errors = correct_as(&mut work, PacketType::Cbec)
            .or_else(|| correct_as(&mut work, PacketType::Legacy))
            .ok_or(InvalidPacket::Uncorrectable)?;
        if !crc_matches(&work, true) {
            return Err(InvalidPacket::Checksum);
        }
        (true, errors)
    };

    let info = PacketInfo::decode(&work);
    match info.packet_type() {
        Some(declared) if declared.protected() == protected_framing => {}
        _ => return Err(InvalidPacket::TypeMismatch),
    }
    if info.sequences == 0 || info.blocks == 0 {
        return Err(InvalidPacket::DegenerateHeader);
    }

    *packet = work;
    Ok(errors)
}

/// Check the stored CRC against the region sized for the given framing.
fn crc_matches(work: &[u8; PACKET_SIZE], protected: bool) -> bool {
    let region = if protected {
        PacketType::Cbec.crc_region()
    } else {
        PacketType::CbecNoFec.crc_region()
    };
    let at = 1 + region;
    let stored = u32::from_be_bytes([work[at], work[at + 1], work[at + 2], work[at + 3]]);
    checksum(&work[1..at]) == stored
}

/// Force the type byte to `guess` and attempt Reed-Solomon correction.
fn correct_as(work: &mut [u8; PACKET_SIZE], guess: PacketType) -> Option<usize> {
    work[1] = guess.wire();
    fec::correct(work)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn layout_sizes() {
        assert_eq!(PacketType::Cbec.payload_size(), 205);
        assert_eq!(PacketType::Legacy.payload_size(), 205);
        assert_eq!(PacketType::CbecNoFec.payload_size(), 237);
        assert_eq!(PacketType::LegacyNoFec.payload_size(), 237);
        assert_eq!(PacketType::Cbec.crc_region(), 219);
        assert_eq!(PacketType::CbecNoFec.crc_region(), 251);
    }

    #[test]
    fn wire_ids() {
        for ty in [
            PacketType::Legacy,
            PacketType::LegacyNoFec,
            PacketType::Cbec,
            PacketType::CbecNoFec,
        ] {
            assert_eq!(PacketType::from_wire(ty.wire()), Some(ty));
        }
        assert_eq!(PacketType::from_wire(0x55), None);
        assert_eq!(PacketType::from_wire(0x6A), None);
    }

    #[test]
    fn checksum_matches_reference_bit_loop() {
        // Reference implementation: the classic reflected CRC-32 bit loop.
        fn reference(data: &[u8]) -> u32 {
            let mut crc: u32 = 0xFFFF_FFFF;
            for &byte in data {
                let mut x = (crc ^ u32::from(byte)) & 0xFF;
                for _ in 0..8 {
                    x = if x & 1 != 0 { (x >> 1) ^ 0xEDB8_8320 } else { x >> 1 };
                }
                crc = (crc >> 8) ^ x;
            }
            crc ^ 0xFFFF_FFFF
        }

        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
        for data in [&b""[..], b"\x00", b"packetized image data", &[0xFF; 219]] {
            assert_eq!(checksum(data), reference(data));
        }
    }

    /// Build a minimal valid unprotected packet for header tests.
    fn unprotected_packet() -> [u8; PACKET_SIZE] {
        let ty = PacketType::CbecNoFec;
        let mut pkt = [0u8; PACKET_SIZE];
        pkt[0] = SYNC;
        pkt[1] = ty.wire();
        pkt[2..6].copy_from_slice(&crate::callsign::encode("N0CALL").to_be_bytes());
        pkt[6] = 3;
        pkt[7..9].copy_from_slice(&7u16.to_be_bytes());
        pkt[9] = 2;
        pkt[10] = 5;
        pkt[11] = FLAGS_BASE | (1 << EOI_BIT);
        pkt[12] = 40;
        pkt[13] = 0xFF;
        pkt[14] = 0xFF;
        let at = 1 + ty.crc_region();
        let crc = checksum(&pkt[1..at]);
        pkt[at..at + CRC_SIZE].copy_from_slice(&crc.to_be_bytes());
        pkt
    }

    #[test]
    fn header_extraction() {
        let pkt = unprotected_packet();
        let info = PacketInfo::decode(&pkt);
        assert_eq!(info.packet_type(), Some(PacketType::CbecNoFec));
        assert_eq!(info.callsign_text(), "N0CALL");
        assert_eq!(info.image_id, 3);
        assert_eq!(info.packet_id, 7);
        assert_eq!(info.sequences, 2);
        assert_eq!(info.blocks, 5);
        assert!(info.eoi);
        assert_eq!(info.leftover, 40);
    }

    #[test]
    fn unprotected_fast_path() {
        let mut pkt = unprotected_packet();
        assert_eq!(validate(&mut pkt), Ok(0));
    }

    #[test]
    fn sync_byte_is_normalized() {
        let mut pkt = unprotected_packet();
        pkt[0] = 0xAA;
        assert_eq!(validate(&mut pkt), Ok(0));
        assert_eq!(pkt[0], SYNC);
    }

    #[test]
    fn unprotected_corruption_is_fatal() {
        // No parity to lean on: a flipped payload byte can only be rejected.
        let mut pkt = unprotected_packet();
        pkt[100] ^= 0x01;
        assert!(validate(&mut pkt).is_err());
    }

    #[test]
    fn degenerate_header_rejected_despite_valid_checksum() {
        for zeroed in [9usize, 10] {
            let ty = PacketType::CbecNoFec;
            let mut pkt = unprotected_packet();
            pkt[zeroed] = 0;
            let at = 1 + ty.crc_region();
            let crc = checksum(&pkt[1..at]);
            pkt[at..at + CRC_SIZE].copy_from_slice(&crc.to_be_bytes());
            assert_eq!(validate(&mut pkt), Err(InvalidPacket::DegenerateHeader));
        }
    }
}
