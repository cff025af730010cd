//! Tile locator: which tiles of the fragment overlap the query range.
//!
//! Dense fragments clip the query into tile space and walk the clipped
//! box in tile order. Sparse fragments binary-search the per-tile
//! bounding coordinates for a search window, then advance linearly over
//! MBRs until the next overlapping tile shows up. Either way the walk
//! ends by appending a tile whose overlap is `None`.

use std::cmp::Ordering;

use crate::storage::schema::{
    cmp_col_order, cmp_hilbert_order, cmp_row_order, is_unary_range, CellOrder, Coordinate,
    GridCoordinate, Overlap,
};
use crate::Result;

use super::types::OverlappingTile;
use super::ReadState;

impl<'a, T: GridCoordinate> ReadState<'a, T> {
    /// Clip the query range into tile-domain coordinates. An empty clip
    /// seeds the end sentinel immediately.
    pub(super) fn init_range_in_tile_domain(&mut self) -> Result<()> {
        let dim_num = self.schema.dim_num();
        let domain = self.schema.typed_domain::<T>()?;
        let extents = self.schema.typed_extents::<T>()?;
        let tile_counts = self.schema.tile_counts::<T>()?;

        let mut range = vec![T::from_i64(0); 2 * dim_num];
        let mut empty = false;
        for i in 0..dim_num {
            let ext = extents[i].as_i64();
            let dom_lo = domain[2 * i].as_i64();
            let lo = ((self.query[2 * i].as_i64() - dom_lo) / ext).max(0);
            let hi = ((self.query[2 * i + 1].as_i64() - dom_lo) / ext).min(tile_counts[i] - 1);
            range[2 * i] = T::from_i64(lo);
            range[2 * i + 1] = T::from_i64(hi);
            if hi < lo {
                empty = true;
            }
        }
        self.range_in_tile_domain = range;

        if empty {
            self.overlapping_tiles.push(OverlappingTile::sentinel());
        }
        Ok(())
    }

    /// Append the next tile of the dense walk, classified against the
    /// query range.
    pub(super) fn next_overlapping_tile_dense(&mut self) -> Result<()> {
        let dim_num = self.schema.dim_num();

        let coords: Vec<T> = match self.overlapping_tiles.last() {
            // Start from the low corner of the clipped range.
            None => (0..dim_num).map(|i| self.range_in_tile_domain[2 * i]).collect(),
            Some(prev) => {
                let mut c = prev.tile_coords.clone();
                self.schema.next_tile_coords(&self.range_in_tile_domain, &mut c);
                c
            }
        };

        let pos = self.schema.tile_pos(&coords)?;
        let (overlap_range, overlap) =
            self.schema.compute_tile_range_overlap(&self.query, &coords)?;

        self.overlapping_tiles.push(OverlappingTile {
            pos,
            tile_coords: coords,
            overlap_range,
            overlap,
            cell_num: self.schema.cell_num_per_tile(),
            cell_pos_ranges: Vec::new(),
            coords_tile_fetched: false,
        });
        self.compact_overlapping_tiles();
        Ok(())
    }
}

impl<'a, T: Coordinate> ReadState<'a, T> {
    /// Binary-search the sparse fragment's bounding coordinates for the
    /// window of tiles worth probing. An inverted window seeds the end
    /// sentinel immediately.
    pub(super) fn init_tile_search_range(&mut self) -> Result<()> {
        let tile_num = self.bookkeeping.tile_num();
        if tile_num == 0 {
            self.tile_search_range = [0, -1];
            self.overlapping_tiles.push(OverlappingTile::sentinel());
            return Ok(());
        }

        let bounds: Vec<&[T]> = self
            .bookkeeping
            .bounding_coords()
            .iter()
            .map(|c| c.typed::<T>())
            .collect::<Result<_>>()?;
        let dim_num = self.schema.dim_num();
        let range_min: Vec<T> = (0..dim_num).map(|i| self.query[2 * i]).collect();
        let range_max: Vec<T> = (0..dim_num).map(|i| self.query[2 * i + 1]).collect();

        match self.schema.cell_order() {
            CellOrder::RowMajor => {
                self.tile_search_range = search_range_ordered(
                    &bounds,
                    dim_num,
                    &range_min,
                    &range_max,
                    is_unary_range(&self.query),
                    cmp_row_order,
                );
            }
            CellOrder::ColMajor => {
                self.tile_search_range = search_range_ordered(
                    &bounds,
                    dim_num,
                    &range_min,
                    &range_max,
                    is_unary_range(&self.query),
                    cmp_col_order,
                );
            }
            CellOrder::Hilbert => {
                if is_unary_range(&self.query) {
                    let point_id = self.schema.hilbert_id(&range_min)?;
                    let mut ids = Vec::with_capacity(bounds.len());
                    for b in &bounds {
                        let start_id = self.schema.hilbert_id(&b[..dim_num])?;
                        let end_id = self.schema.hilbert_id(&b[dim_num..])?;
                        ids.push((start_id, end_id));
                    }
                    let lo = hilbert_point_search(&bounds, &ids, dim_num, &range_min, point_id);
                    self.tile_search_range = [lo, lo];
                } else {
                    self.tile_search_range = [0, tile_num - 1];
                }
            }
        }

        if self.tile_search_range[1] < self.tile_search_range[0] {
            self.overlapping_tiles.push(OverlappingTile::sentinel());
        }
        Ok(())
    }

    /// Advance linearly from the previous tile, probing MBRs until one
    /// overlaps or the search window is exhausted. Partial overlaps get
    /// their qualifying cell positions resolved right away.
    pub(super) fn next_overlapping_tile_sparse(&mut self) -> Result<()> {
        let tile_num = self.bookkeeping.tile_num();
        let dim_num = self.schema.dim_num();

        let mut tile_pos = match self.overlapping_tiles.last() {
            None => self.tile_search_range[0],
            Some(prev) => prev.pos + 1,
        };

        let mut overlap = Overlap::None;
        let mut overlap_range: Vec<T> = Vec::new();
        let mut found_pos = tile_pos;

        if self.tile_search_range[0] >= 0 && self.tile_search_range[0] < tile_num {
            while overlap == Overlap::None && tile_pos <= self.tile_search_range[1] {
                let mbr = self.bookkeeping.mbrs()[tile_pos as usize].typed::<T>()?;
                debug_assert_eq!(mbr.len(), 2 * dim_num);
                let (range, kind) = self.schema.compute_mbr_range_overlap(&self.query, mbr);
                if kind != Overlap::None {
                    overlap = kind;
                    overlap_range = range;
                    found_pos = tile_pos;
                }
                tile_pos += 1;
            }
        }

        let cell_num = self
            .bookkeeping
            .tile_cell_num(found_pos, self.schema.cell_num_per_tile());

        self.overlapping_tiles.push(OverlappingTile {
            pos: found_pos,
            tile_coords: Vec::new(),
            overlap_range,
            overlap,
            cell_num,
            cell_pos_ranges: Vec::new(),
            coords_tile_fetched: false,
        });

        if overlap == Overlap::PartialContig || overlap == Overlap::PartialNonContig {
            self.resolve_cell_pos_ranges()?;
        }

        self.compact_overlapping_tiles();
        Ok(())
    }
}

/// Two binary searches over per-tile `[start, end]` bounding pairs: one
/// for the range minimum (window start) and, unless the range is unary,
/// one for the range maximum (window end).
fn search_range_ordered<T: Coordinate>(
    bounds: &[&[T]],
    dim_num: usize,
    range_min: &[T],
    range_max: &[T],
    unary: bool,
    cmp: fn(&[T], &[T]) -> Ordering,
) -> [i64; 2] {
    let lo = bound_search(bounds, dim_num, range_min, cmp, true);
    let hi = if unary { lo } else { bound_search(bounds, dim_num, range_max, cmp, false) };
    [lo, hi]
}

/// Probe the sorted bounding pairs for `point`. Goes left when the probe
/// precedes a tile's start, right when it succeeds the end, stops inside.
/// Outside any tile, a range minimum resolves to the following tile and a
/// range maximum to the preceding one.
fn bound_search<T: Coordinate>(
    bounds: &[&[T]],
    dim_num: usize,
    point: &[T],
    cmp: fn(&[T], &[T]) -> Ordering,
    is_min: bool,
) -> i64 {
    let mut min = 0i64;
    let mut max = bounds.len() as i64 - 1;
    let mut med = 0i64;
    while min <= max {
        med = min + (max - min) / 2;
        let b = bounds[med as usize];
        let tile_start = &b[..dim_num];
        let tile_end = &b[dim_num..];
        if cmp(point, tile_start) == Ordering::Less {
            max = med - 1;
        } else if cmp(point, tile_end) == Ordering::Greater {
            min = med + 1;
        } else {
            break;
        }
    }
    if max < min {
        if is_min {
            min
        } else {
            max
        }
    } else {
        med
    }
}

/// Unary-range search over Hilbert-ordered bounding pairs, comparing by
/// curve index with coordinate tiebreak.
fn hilbert_point_search<T: Coordinate>(
    bounds: &[&[T]],
    ids: &[(u64, u64)],
    dim_num: usize,
    point: &[T],
    point_id: u64,
) -> i64 {
    let mut min = 0i64;
    let mut max = bounds.len() as i64 - 1;
    let mut med = 0i64;
    while min <= max {
        med = min + (max - min) / 2;
        let b = bounds[med as usize];
        let (start_id, end_id) = ids[med as usize];
        if cmp_hilbert_order(point_id, point, start_id, &b[..dim_num]) == Ordering::Less {
            max = med - 1;
        } else if cmp_hilbert_order(point_id, point, end_id, &b[dim_num..]) == Ordering::Greater {
            min = med + 1;
        } else {
            break;
        }
    }
    if max < min {
        min
    } else {
        med
    }
}
