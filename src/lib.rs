//! Packetize a byte stream into fixed-size radio packets that survive packet
//! loss and bit corruption on a noisy, one-way broadcast channel.
//!
//! An image (or any byte stream) is partitioned into interleaved *sequences*
//! of payload-sized *blocks*. Each sequence is independently erasure-coded so
//! that losing up to half of its blocks is survivable, and every packet is
//! individually protected by a CRC-32 checksum and (for the FEC-protected
//! packet types) 32 bytes of Reed-Solomon parity that can repair up to 16
//! corrupted bytes in place.
//!
//! # Wire format
//!
//! Every packet is exactly [`packet::PACKET_SIZE`] (256) bytes: a sync byte, a
//! 14-byte header (type, base-40 callsign, image id, packet id, sequence and
//! block geometry, flags, padding bookkeeping), the block payload, a CRC-32,
//! and, for protected types, the parity tail. See [`packet`] for the exact
//! layout.
//!
//! # Usage
//!
//! [`Encoder`] consumes a buffer once and is then polled for packets until
//! exhausted. [`Decoder`] is fed validated packets in any order (with gaps),
//! then asked to run erasure recovery once, then polled for reconstructed
//! chunks. [`packet::validate`] is the gate in front of [`Decoder::feed`]: it
//! checks (and where possible repairs) a candidate 256-byte buffer.
//!
//! ```
//! use ssdv_cbec::{packet, Decoder, Encoder, PacketType};
//!
//! let data = b"hello, stratosphere".repeat(64);
//! let mut encoder = Encoder::new(PacketType::Cbec, "N0CALL", 7);
//! encoder.load(&data).unwrap();
//!
//! let mut decoder = Decoder::new();
//! while let Some(mut pkt) = encoder.next_packet() {
//!     packet::validate(&mut pkt).unwrap();
//!     decoder.feed(&pkt);
//! }
//! decoder.recover().unwrap();
//!
//! let mut out = Vec::new();
//! while let Some(chunk) = decoder.next_chunk() {
//!     out.extend_from_slice(chunk);
//! }
//! assert_eq!(out, data);
//! ```

pub mod callsign;
pub mod decoder;
pub mod encoder;
pub mod erasure;
pub mod fec;
pub mod packet;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use packet::{PacketInfo, PacketType};
