//! Block erasure-coding adapter.
//!
//! Each sequence is coded independently over GF(256): `original_count`
//! payload blocks produce `recovery_count` recovery blocks, and any
//! `original_count` of the tagged `original_count + recovery_count` blocks
//! are enough to reconstruct the originals. The geometry must keep the total
//! within the 256-element field.

use reed_solomon_erasure::galois_8::ReedSolomon;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid erasure geometry: {0}")]
    Geometry(reed_solomon_erasure::Error),
    #[error("too few blocks to recover sequence")]
    TooFewBlocks,
    #[error("erasure coding failed: {0}")]
    Coding(reed_solomon_erasure::Error),
}

/// Erasure-code geometry for one sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    /// Payload blocks per sequence.
    pub original_count: usize,
    /// Recovery blocks generated per sequence.
    pub recovery_count: usize,
    /// Bytes per block.
    pub block_bytes: usize,
}

impl Params {
    pub fn total(&self) -> usize {
        self.original_count + self.recovery_count
    }
}

/// Produce the recovery blocks for one sequence of original blocks.
pub fn encode(params: &Params, originals: &[&[u8]]) -> Result<Vec<Vec<u8>>, Error> {
    let rs = ReedSolomon::new(params.original_count, params.recovery_count)
        .map_err(Error::Geometry)?;
    let mut shards: Vec<Vec<u8>> = originals.iter().map(|block| block.to_vec()).collect();
    shards.extend((0..params.recovery_count).map(|_| vec![0u8; params.block_bytes]));
    rs.encode(&mut shards).map_err(Error::Coding)?;
    Ok(shards.split_off(params.original_count))
}

/// Reconstruct the original blocks of one sequence from any sufficient subset
/// of index-tagged blocks (original or recovery). Tags outside the geometry
/// are ignored; duplicate tags collapse to the last one seen.
pub fn decode(params: &Params, tagged: &[(usize, &[u8])]) -> Result<Vec<Vec<u8>>, Error> {
    let rs = ReedSolomon::new(params.original_count, params.recovery_count)
        .map_err(Error::Geometry)?;
    let mut shards: Vec<Option<Vec<u8>>> = vec![None; params.total()];
    for &(index, block) in tagged {
        if index < params.total() {
            shards[index] = Some(block.to_vec());
        }
    }
    rs.reconstruct_data(&mut shards).map_err(|err| match err {
        reed_solomon_erasure::Error::TooFewShardsPresent => Error::TooFewBlocks,
        err => Error::Coding(err),
    })?;
    shards.truncate(params.original_count);
    shards
        .into_iter()
        .map(|shard| shard.ok_or(Error::TooFewBlocks))
        .collect()
}
