//! Per-fragment bookkeeping metadata.
//!
//! Bookkeeping travels with a fragment and answers the questions the read
//! state cannot answer from the schema alone: how many tiles the fragment
//! holds, how full the last one is, where compressed tiles start inside
//! the attribute files, how large variable tiles are once decompressed,
//! and (for sparse fragments) each tile's MBR and bounding coordinates.

use serde::{Deserialize, Serialize};

use crate::storage::schema::CoordValues;
use crate::{LatticaError, Result};

/// Fragment metadata consulted by the read state.
///
/// Per-attribute vectors are indexed by attribute id, with one extra slot
/// at `attribute_num` for the coordinates pseudo-attribute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bookkeeping {
    tile_num: i64,
    last_tile_cell_num: i64,
    /// Sparse only: per-tile minimum bounding rectangle, flat lo/hi pairs.
    mbrs: Vec<CoordValues>,
    /// Sparse only: per-tile first and last cell coordinates, concatenated.
    bounding_coords: Vec<CoordValues>,
    /// Compressed attributes only: per-tile start offsets in the fixed file.
    tile_offsets: Vec<Vec<u64>>,
    /// Compressed variable attributes only: per-tile start offsets in the
    /// `_var` payload file.
    tile_var_offsets: Vec<Vec<u64>>,
    /// Compressed variable attributes only: decompressed payload sizes.
    tile_var_sizes: Vec<Vec<u64>>,
}

impl Bookkeeping {
    pub fn new(attribute_num: usize, tile_num: i64, last_tile_cell_num: i64) -> Self {
        Self {
            tile_num,
            last_tile_cell_num,
            mbrs: Vec::new(),
            bounding_coords: Vec::new(),
            tile_offsets: vec![Vec::new(); attribute_num + 1],
            tile_var_offsets: vec![Vec::new(); attribute_num + 1],
            tile_var_sizes: vec![Vec::new(); attribute_num + 1],
        }
    }

    pub fn tile_num(&self) -> i64 {
        self.tile_num
    }

    pub fn last_tile_cell_num(&self) -> i64 {
        self.last_tile_cell_num
    }

    /// Cells in the tile at `pos`.
    pub fn tile_cell_num(&self, pos: i64, cell_num_per_tile: i64) -> i64 {
        if pos == self.tile_num - 1 {
            self.last_tile_cell_num
        } else {
            cell_num_per_tile
        }
    }

    pub fn mbrs(&self) -> &[CoordValues] {
        &self.mbrs
    }

    pub fn bounding_coords(&self) -> &[CoordValues] {
        &self.bounding_coords
    }

    pub fn tile_offsets(&self, attr_id: usize) -> &[u64] {
        &self.tile_offsets[attr_id]
    }

    pub fn tile_var_offsets(&self, attr_id: usize) -> &[u64] {
        &self.tile_var_offsets[attr_id]
    }

    pub fn tile_var_sizes(&self, attr_id: usize) -> &[u64] {
        &self.tile_var_sizes[attr_id]
    }

    /// Compressed size of the tile at `pos` in the attribute's fixed file,
    /// derived from consecutive tile offsets (the file length closes the
    /// last tile).
    pub fn tile_compressed_size(&self, attr_id: usize, pos: i64, file_size: u64) -> Result<u64> {
        span(&self.tile_offsets[attr_id], pos, self.tile_num, file_size, "tile offsets")
    }

    /// Compressed size of the tile at `pos` in the `_var` payload file.
    pub fn tile_var_compressed_size(
        &self,
        attr_id: usize,
        pos: i64,
        file_size: u64,
    ) -> Result<u64> {
        span(&self.tile_var_offsets[attr_id], pos, self.tile_num, file_size, "var tile offsets")
    }

    pub fn push_mbr(&mut self, mbr: CoordValues) {
        self.mbrs.push(mbr);
    }

    pub fn push_bounding_coords(&mut self, bounds: CoordValues) {
        self.bounding_coords.push(bounds);
    }

    pub fn set_tile_offsets(&mut self, attr_id: usize, offsets: Vec<u64>) {
        self.tile_offsets[attr_id] = offsets;
    }

    pub fn set_tile_var_offsets(&mut self, attr_id: usize, offsets: Vec<u64>) {
        self.tile_var_offsets[attr_id] = offsets;
    }

    pub fn set_tile_var_sizes(&mut self, attr_id: usize, sizes: Vec<u64>) {
        self.tile_var_sizes[attr_id] = sizes;
    }
}

fn span(offsets: &[u64], pos: i64, tile_num: i64, file_size: u64, what: &str) -> Result<u64> {
    let i = pos as usize;
    if i >= offsets.len() {
        return Err(LatticaError::Bookkeeping(format!(
            "{what} missing for tile {pos} ({} recorded)",
            offsets.len()
        )));
    }
    let end = if pos == tile_num - 1 { file_size } else { offsets[i + 1] };
    if end < offsets[i] {
        return Err(LatticaError::Bookkeeping(format!("{what} not monotone at tile {pos}")));
    }
    Ok(end - offsets[i])
}
