//! Cell-position resolver for sparse partial overlaps.
//!
//! With the coordinates tile resident, works out which intra-tile cell
//! positions fall inside the query range, as inclusive `(start, end)`
//! runs in tile order. Contiguous overlaps take two binary searches;
//! non-contiguous ones bound the candidates first and then scan,
//! run-length-encoding the qualifying stretches. Hilbert order scans the
//! whole tile unless the range is a single point.

use std::cmp::Ordering;

use crate::storage::schema::{
    cell_in_range, cmp_col_order, cmp_hilbert_order, cmp_row_order, is_unary_range, ArraySchema,
    CellOrder, Coordinate, Overlap,
};
use crate::Result;

use super::types::OverlappingTile;
use super::ReadState;

impl<'a, T: Coordinate> ReadState<'a, T> {
    /// Resolve the qualifying cell runs of the most recently located
    /// tile. Stages its coordinates tile first (re-using the coordinates
    /// cursor when that does not disturb a paused drain).
    pub(super) fn resolve_cell_pos_ranges(&mut self) -> Result<()> {
        let k = self.overlapping_tiles.len() - 1;
        let staged_in_cursor = self.stage_coords_for_resolve(k)?;

        let coords_slot = self.coords_slot();
        let coords_bytes: &[u8] = if staged_in_cursor {
            let c = &self.cursors[coords_slot];
            &c.tile.bytes()[..c.tile_size]
        } else {
            &self.resolve_scratch
        };

        let tile = &self.overlapping_tiles[k];
        let ranges = compute_cell_pos_ranges(self.schema, &self.query, tile, coords_bytes)?;
        self.overlapping_tiles[k].cell_pos_ranges = ranges;
        Ok(())
    }
}

/// Compute the qualifying `(start, end)` cell position runs of one tile.
fn compute_cell_pos_ranges<T: Coordinate>(
    schema: &ArraySchema,
    query: &[T],
    tile: &OverlappingTile<T>,
    coords_bytes: &[u8],
) -> Result<Vec<(i64, i64)>> {
    let cells = CoordTile::new(schema, coords_bytes, tile.cell_num);

    if is_unary_range(query) {
        return unary_range(schema, tile, &cells);
    }
    match tile.overlap {
        Overlap::PartialContig => contig_range(schema, tile, &cells),
        _ => non_contig_ranges(schema, query, tile, &cells),
    }
}

/// Decoded view over a coordinates tile.
struct CoordTile<'b> {
    bytes: &'b [u8],
    dim_num: usize,
    elem_size: usize,
    cell_num: i64,
}

impl<'b> CoordTile<'b> {
    fn new(schema: &ArraySchema, bytes: &'b [u8], cell_num: i64) -> Self {
        Self {
            bytes,
            dim_num: schema.dim_num(),
            elem_size: schema.coord_datatype().size(),
            cell_num,
        }
    }

    fn cell<T: Coordinate>(&self, pos: i64) -> Vec<T> {
        let base = pos as usize * self.dim_num * self.elem_size;
        (0..self.dim_num)
            .map(|d| T::read_le(&self.bytes[base + d * self.elem_size..]))
            .collect()
    }
}

enum Probe {
    /// The probe matched the cell at this position.
    Hit(i64),
    /// No match; the probe sorts between positions `miss - 1` and `miss`.
    Miss(i64),
}

/// Binary search the cell-ordered coordinates for `point`.
fn coord_search<T: Coordinate>(
    cells: &CoordTile<'_>,
    point: &[T],
    cmp: impl Fn(&[T], &[T]) -> Ordering,
) -> Probe {
    let mut min = 0i64;
    let mut max = cells.cell_num - 1;
    while min <= max {
        let med = min + (max - min) / 2;
        let cell = cells.cell::<T>(med);
        match cmp(point, &cell) {
            Ordering::Less => max = med - 1,
            Ordering::Greater => min = med + 1,
            Ordering::Equal => return Probe::Hit(med),
        }
    }
    Probe::Miss(min)
}

fn unary_range<T: Coordinate>(
    schema: &ArraySchema,
    tile: &OverlappingTile<T>,
    cells: &CoordTile<'_>,
) -> Result<Vec<(i64, i64)>> {
    let dim_num = schema.dim_num();
    let point: Vec<T> = (0..dim_num).map(|i| tile.overlap_range[2 * i]).collect();

    let probe = match schema.cell_order() {
        CellOrder::RowMajor => coord_search(cells, &point, cmp_row_order),
        CellOrder::ColMajor => coord_search(cells, &point, cmp_col_order),
        CellOrder::Hilbert => {
            let point_id = schema.hilbert_id(&point)?;
            let mut result = Probe::Miss(cells.cell_num);
            let mut min = 0i64;
            let mut max = cells.cell_num - 1;
            while min <= max {
                let med = min + (max - min) / 2;
                let cell = cells.cell::<T>(med);
                let cell_id = schema.hilbert_id(&cell)?;
                match cmp_hilbert_order(point_id, &point, cell_id, &cell) {
                    Ordering::Less => max = med - 1,
                    Ordering::Greater => min = med + 1,
                    Ordering::Equal => {
                        result = Probe::Hit(med);
                        break;
                    }
                }
            }
            result
        }
    };

    Ok(match probe {
        Probe::Hit(pos) => vec![(pos, pos)],
        Probe::Miss(_) => Vec::new(),
    })
}

/// Bound the overlap with two binary searches; the qualifying cells form
/// one run for contiguous overlaps.
fn contig_bounds<T: Coordinate>(
    schema: &ArraySchema,
    tile: &OverlappingTile<T>,
    cells: &CoordTile<'_>,
) -> (i64, i64) {
    let dim_num = schema.dim_num();
    let range_min: Vec<T> = (0..dim_num).map(|i| tile.overlap_range[2 * i]).collect();
    let range_max: Vec<T> = (0..dim_num).map(|i| tile.overlap_range[2 * i + 1]).collect();

    let cmp: fn(&[T], &[T]) -> Ordering = match schema.cell_order() {
        CellOrder::ColMajor => cmp_col_order,
        _ => cmp_row_order,
    };

    let start = match coord_search(cells, &range_min, cmp) {
        Probe::Hit(pos) => pos,
        // Range min precedes the cell at the miss position.
        Probe::Miss(pos) => pos,
    };
    let end = match coord_search(cells, &range_max, cmp) {
        Probe::Hit(pos) => pos,
        // Range max succeeds the cell before the miss position.
        Probe::Miss(pos) => pos - 1,
    };
    (start, end)
}

fn contig_range<T: Coordinate>(
    schema: &ArraySchema,
    tile: &OverlappingTile<T>,
    cells: &CoordTile<'_>,
) -> Result<Vec<(i64, i64)>> {
    let (start, end) = contig_bounds(schema, tile, cells);
    Ok(if start <= end { vec![(start, end)] } else { Vec::new() })
}

fn non_contig_ranges<T: Coordinate>(
    schema: &ArraySchema,
    query: &[T],
    tile: &OverlappingTile<T>,
    cells: &CoordTile<'_>,
) -> Result<Vec<(i64, i64)>> {
    let (start, end) = match schema.cell_order() {
        CellOrder::Hilbert => (0, cells.cell_num - 1),
        _ => {
            let (s, e) = contig_bounds(schema, tile, cells);
            if s > e {
                return Ok(Vec::new());
            }
            (s, e)
        }
    };

    // Scan the bounded stretch, run-length-encoding qualifying cells.
    let mut ranges = Vec::new();
    let mut run_start = 0i64;
    let mut run_end = -2i64;
    for pos in start..=end {
        let cell = cells.cell::<T>(pos);
        if cell_in_range(&cell, query) {
            if pos - 1 == run_end {
                run_end = pos;
            } else {
                run_start = pos;
                run_end = pos;
            }
        } else if pos - 1 == run_end {
            ranges.push((run_start, run_end));
            run_end = -2;
        }
    }
    if run_end != -2 {
        ranges.push((run_start, run_end));
    }
    Ok(ranges)
}
