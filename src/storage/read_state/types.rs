//! State carried by the fragment read path.

use byteorder::{ByteOrder, LittleEndian};
use memmap2::MmapMut;

use crate::storage::schema::{Coordinate, Overlap, VAR_OFFSET_SIZE};

/// One tile intersected with the query range.
#[derive(Debug)]
pub(crate) struct OverlappingTile<T: Coordinate> {
    /// Global tile index inside the fragment; -1 for the end sentinel.
    pub pos: i64,
    /// Dense only: the tile's coordinates in tile space.
    pub tile_coords: Vec<T>,
    /// Flat lo/hi pairs bounding the intersection. Dense: tile-local cell
    /// coordinates. Sparse: absolute coordinates.
    pub overlap_range: Vec<T>,
    pub overlap: Overlap,
    /// Cells stored in this tile (short for the fragment's last tile).
    pub cell_num: i64,
    /// Sparse partial overlaps: inclusive intra-tile position runs of the
    /// qualifying cells, in tile order.
    pub cell_pos_ranges: Vec<(i64, i64)>,
    /// Sparse: whether the coordinates tile for this overlap is staged in
    /// the coordinates cursor.
    pub coords_tile_fetched: bool,
}

impl<T: Coordinate> OverlappingTile<T> {
    pub fn sentinel() -> Self {
        Self {
            pos: -1,
            tile_coords: Vec::new(),
            overlap_range: Vec::new(),
            overlap: Overlap::None,
            cell_num: 0,
            cell_pos_ranges: Vec::new(),
            coords_tile_fetched: false,
        }
    }
}

/// Staged tile bytes. The variant records provenance, so release on drop
/// is always the right one: `Vec` frees, the map unmaps.
#[derive(Debug, Default)]
pub(crate) enum TileBuf {
    #[default]
    Unset,
    Owned(Vec<u8>),
    Mapped(MmapMut),
}

impl TileBuf {
    pub fn bytes(&self) -> &[u8] {
        match self {
            TileBuf::Unset => &[],
            TileBuf::Owned(v) => v,
            TileBuf::Mapped(m) => m,
        }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            TileBuf::Unset => &mut [],
            TileBuf::Owned(v) => v,
            TileBuf::Mapped(m) => m,
        }
    }

    /// Make this buffer an owned allocation of at least `len` bytes.
    /// Existing owned capacity is kept (buffers grow monotonically);
    /// a mapped region is replaced.
    pub fn ensure_owned(&mut self, len: usize) -> &mut Vec<u8> {
        match self {
            TileBuf::Owned(v) => {
                if v.len() < len {
                    v.resize(len, 0);
                }
            }
            _ => *self = TileBuf::Owned(vec![0u8; len]),
        }
        match self {
            TileBuf::Owned(v) => v,
            _ => unreachable!(),
        }
    }
}

/// Per-attribute read cursor. One per attribute id, plus one slot for the
/// coordinates pseudo-attribute.
#[derive(Debug, Default)]
pub(crate) struct AttrCursor {
    pub tile: TileBuf,
    /// Staged bytes and next-byte-to-emit position in the fixed tile.
    pub tile_size: usize,
    pub tile_offset: usize,
    /// Global index of the tile currently staged in `tile`, if any.
    pub staged_tile: Option<i64>,

    pub tile_var: TileBuf,
    pub tile_var_size: usize,
    pub tile_var_offset: usize,

    /// Index into the shared overlapping-tile list.
    pub overlapping_pos: usize,
    /// Index of the next qualifying sub-range (sparse non-contiguous).
    pub cell_range_pos: usize,
    /// Sticky per-call flag: the output buffer could not take more bytes.
    pub overflow: bool,
}

// ----------------------------------------------------------------------
// Variable-offset cells
// ----------------------------------------------------------------------

/// Read the `cell`-th u64 offset of a staged offsets tile.
pub(crate) fn offset_at(tile: &[u8], cell: usize) -> u64 {
    LittleEndian::read_u64(&tile[cell * VAR_OFFSET_SIZE..])
}

/// Rebase offsets in place so the tile's first payload byte is offset 0.
pub(crate) fn shift_offsets_tile_local(tile: &mut [u8], cell_num: usize) {
    if cell_num == 0 {
        return;
    }
    let first = offset_at(tile, 0);
    for k in 0..cell_num {
        let v = offset_at(tile, k) - first;
        LittleEndian::write_u64(&mut tile[k * VAR_OFFSET_SIZE..], v);
    }
}

/// Rebase `offset_num` offsets just written to the output so they are
/// relative to the caller's variable buffer: the first becomes
/// `new_start`, the rest keep their relative spacing.
pub(crate) fn rebase_offsets(out: &mut [u8], offset_num: usize, new_start: u64) {
    if offset_num == 0 {
        return;
    }
    let first = offset_at(out, 0);
    for k in 0..offset_num {
        let v = offset_at(out, k) - first + new_start;
        LittleEndian::write_u64(&mut out[k * VAR_OFFSET_SIZE..], v);
    }
}
