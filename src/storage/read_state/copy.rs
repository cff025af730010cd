//! The overlap copiers: staged-tile drains and direct disk-to-output
//! fast paths.
//!
//! Every copier obeys one discipline: advance the output offset and the
//! attribute's tile cursor by exactly the bytes moved, and raise the
//! attribute's overflow flag iff in-range bytes of the current tile
//! remain unemitted. Variable attributes move two streams in lockstep:
//! offset cells into the fixed buffer (rebased against the caller's
//! variable buffer) and payload bytes into the variable buffer, with
//! `compute_bytes_to_copy` trimming each chunk to whole cells that fit
//! both buffers.

use crate::storage::schema::{Coordinate, GridCoordinate, VAR_OFFSET_SIZE};
use crate::Result;

use super::types::{offset_at, rebase_offsets};
use super::ReadState;

/// Largest `end >= start` whose inclusive payload `[start, end]` fits in
/// `var_free` bytes, with that payload size. Offsets are tile-local;
/// cell `cell_num`'s exclusive bound is the staged payload size.
fn clamp_end_to_var_space(
    offsets: &[u8],
    tile_var_size: usize,
    cell_num: i64,
    start: i64,
    end: i64,
    var_free: usize,
) -> Option<(i64, usize)> {
    let off_excl = |k: i64| -> u64 {
        if k >= cell_num {
            tile_var_size as u64
        } else {
            offset_at(offsets, k as usize)
        }
    };
    let start_off = offset_at(offsets, start as usize);

    let bytes = (off_excl(end + 1) - start_off) as usize;
    if bytes <= var_free {
        return Some((end, bytes));
    }

    let mut lo = start;
    let mut hi = end;
    let mut best = None;
    while lo <= hi {
        let med = lo + (hi - lo) / 2;
        let b = (off_excl(med + 1) - start_off) as usize;
        if b <= var_free {
            best = Some((med, b));
            lo = med + 1;
        } else {
            hi = med - 1;
        }
    }
    best
}

impl<'a, T: Coordinate> ReadState<'a, T> {
    /// Bytes of offsets and payload to move for cells
    /// `[start_cell, end_cell]` of the staged tile, trimmed to whole
    /// cells fitting both free spaces.
    fn compute_bytes_to_copy(
        &self,
        attr_id: usize,
        start_cell: i64,
        end_cell: i64,
        free: usize,
        var_free: usize,
    ) -> (usize, usize) {
        if free == 0 || var_free == 0 || end_cell < start_cell {
            return (0, 0);
        }
        let cells_fit = (free / VAR_OFFSET_SIZE) as i64;
        if cells_fit == 0 {
            return (0, 0);
        }
        let end_cell = end_cell.min(start_cell + cells_fit - 1);

        let cell_num = self.current_tile(attr_id).cell_num;
        let cursor = &self.cursors[attr_id];
        let offsets = &cursor.tile.bytes()[..cursor.tile_size];
        match clamp_end_to_var_space(
            offsets,
            cursor.tile_var_size,
            cell_num,
            start_cell,
            end_cell,
            var_free,
        ) {
            None => (0, 0),
            Some((end, bytes_var)) => {
                ((end - start_cell + 1) as usize * VAR_OFFSET_SIZE, bytes_var)
            }
        }
    }

    /// Move `n` staged fixed-tile bytes to the output.
    fn emit(&mut self, attr_id: usize, buffer: &mut [u8], buffer_offset: &mut usize, n: usize) {
        if n == 0 {
            return;
        }
        let off = self.cursors[attr_id].tile_offset;
        buffer[*buffer_offset..*buffer_offset + n]
            .copy_from_slice(&self.cursors[attr_id].tile.bytes()[off..off + n]);
        self.cursors[attr_id].tile_offset += n;
        *buffer_offset += n;
    }

    /// Move `n` staged variable-payload bytes to the variable output.
    fn emit_var(&mut self, attr_id: usize, buffer_var: &mut [u8], buffer_var_offset: &mut usize, n: usize) {
        if n == 0 {
            return;
        }
        let off = self.cursors[attr_id].tile_var_offset;
        buffer_var[*buffer_var_offset..*buffer_var_offset + n]
            .copy_from_slice(&self.cursors[attr_id].tile_var.bytes()[off..off + n]);
        self.cursors[attr_id].tile_var_offset += n;
        *buffer_var_offset += n;
    }

    /// Park the cursor past the current tile.
    fn advance_past_tile(&mut self, attr_id: usize, var: bool) {
        let c = &mut self.cursors[attr_id];
        c.tile_offset = c.tile_size;
        if var {
            c.tile_var_offset = c.tile_var_size;
        }
        c.overlapping_pos += 1;
        c.cell_range_pos = 0;
    }

    // ------------------------------------------------------------------
    // FULL overlap
    // ------------------------------------------------------------------

    pub(super) fn copy_from_tile_buffer_full(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_offset: &mut usize,
    ) -> Result<()> {
        let bytes_left = self.cursors[attr_id].tile_size - self.cursors[attr_id].tile_offset;
        let free = buffer.len() - *buffer_offset;
        let n = bytes_left.min(free);
        self.emit(attr_id, buffer, buffer_offset, n);

        if bytes_left > n {
            self.cursors[attr_id].overflow = true;
        } else {
            self.advance_past_tile(attr_id, false);
        }
        Ok(())
    }

    pub(super) fn copy_from_tile_buffer_full_var(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_offset: &mut usize,
        buffer_var: &mut [u8],
        buffer_var_offset: &mut usize,
    ) -> Result<()> {
        let free = buffer.len() - *buffer_offset;
        let var_free = buffer_var.len() - *buffer_var_offset;
        let cursor = &self.cursors[attr_id];
        let bytes_left = cursor.tile_size - cursor.tile_offset;
        let start_cell = (cursor.tile_offset / VAR_OFFSET_SIZE) as i64;
        let end_cell = start_cell + (bytes_left / VAR_OFFSET_SIZE) as i64 - 1;

        let (n, n_var) = self.compute_bytes_to_copy(attr_id, start_cell, end_cell, free, var_free);
        if n != 0 {
            let out_start = *buffer_offset;
            self.emit(attr_id, buffer, buffer_offset, n);
            rebase_offsets(
                &mut buffer[out_start..out_start + n],
                n / VAR_OFFSET_SIZE,
                *buffer_var_offset as u64,
            );
            self.emit_var(attr_id, buffer_var, buffer_var_offset, n_var);
        }

        if self.cursors[attr_id].tile_offset == self.cursors[attr_id].tile_size {
            self.advance_past_tile(attr_id, true);
        } else {
            self.cursors[attr_id].overflow = true;
        }
        Ok(())
    }

    /// FULL overlap, uncompressed fixed cells: read the whole tile
    /// straight into the output when it fits, else stage and drain.
    pub(super) fn copy_tile_full(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_offset: &mut usize,
    ) -> Result<()> {
        let free = buffer.len() - *buffer_offset;
        if free == 0 {
            self.cursors[attr_id].overflow = true;
            return Ok(());
        }
        let (pos, cell_num) = {
            let t = self.current_tile(attr_id);
            (t.pos, t.cell_num)
        };
        let tile_size = cell_num as usize * self.schema.cell_size(attr_id);

        if tile_size <= free {
            let full_tile_size = self.schema.tile_size(attr_id);
            let path = self.attr_file(attr_id);
            self.read_into(
                &path,
                pos as u64 * full_tile_size as u64,
                &mut buffer[*buffer_offset..*buffer_offset + tile_size],
            )?;
            *buffer_offset += tile_size;
            self.cursors[attr_id].overlapping_pos += 1;
            self.cursors[attr_id].cell_range_pos = 0;
        } else {
            self.fetch_tile_plain(attr_id)?;
            self.copy_from_tile_buffer_full(attr_id, buffer, buffer_offset)?;
        }
        Ok(())
    }

    /// FULL overlap, uncompressed variable cells: both streams straight
    /// into the outputs when they fit (offsets rebased in place), else
    /// stage and drain.
    pub(super) fn copy_tile_full_var(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_offset: &mut usize,
        buffer_var: &mut [u8],
        buffer_var_offset: &mut usize,
    ) -> Result<()> {
        let free = buffer.len() - *buffer_offset;
        let var_free = buffer_var.len() - *buffer_var_offset;
        if free == 0 || var_free == 0 {
            self.cursors[attr_id].overflow = true;
            return Ok(());
        }
        let (pos, cell_num) = {
            let t = self.current_tile(attr_id);
            (t.pos, t.cell_num)
        };
        let tile_size = cell_num as usize * VAR_OFFSET_SIZE;
        let full_tile_size = self.schema.tile_size(attr_id);
        let tile_num = self.bookkeeping.tile_num();
        let path = self.attr_file(attr_id);
        let var_path = self.attr_var_file(attr_id);

        // Size the payload from the bracketing offsets.
        let mut word = [0u8; VAR_OFFSET_SIZE];
        crate::storage::io::read_exact_at(&path, pos as u64 * full_tile_size as u64, &mut word)?;
        let start_var_offset = u64::from_le_bytes(word);
        let end_var_offset = if pos != tile_num - 1 {
            crate::storage::io::read_exact_at(
                &path,
                (pos + 1) as u64 * full_tile_size as u64,
                &mut word,
            )?;
            u64::from_le_bytes(word)
        } else {
            crate::storage::io::file_size(&var_path)?
        };
        let tile_var_size = (end_var_offset - start_var_offset) as usize;

        if tile_size <= free && tile_var_size <= var_free {
            let out_start = *buffer_offset;
            self.read_into(
                &path,
                pos as u64 * full_tile_size as u64,
                &mut buffer[out_start..out_start + tile_size],
            )?;
            if tile_var_size != 0 {
                self.read_into(
                    &var_path,
                    start_var_offset,
                    &mut buffer_var[*buffer_var_offset..*buffer_var_offset + tile_var_size],
                )?;
            }
            rebase_offsets(
                &mut buffer[out_start..out_start + tile_size],
                tile_size / VAR_OFFSET_SIZE,
                *buffer_var_offset as u64,
            );
            *buffer_offset += tile_size;
            *buffer_var_offset += tile_var_size;
            self.cursors[attr_id].overlapping_pos += 1;
            self.cursors[attr_id].cell_range_pos = 0;
        } else {
            self.fetch_tile_var_plain(attr_id)?;
            self.copy_from_tile_buffer_full_var(
                attr_id,
                buffer,
                buffer_offset,
                buffer_var,
                buffer_var_offset,
            )?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // PARTIAL overlaps, sparse
    // ------------------------------------------------------------------

    pub(super) fn copy_from_tile_buffer_partial_contig_sparse(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_offset: &mut usize,
    ) -> Result<()> {
        let free = buffer.len() - *buffer_offset;
        if free == 0 {
            self.cursors[attr_id].overflow = true;
            return Ok(());
        }
        let range = self.current_tile(attr_id).cell_pos_ranges.first().copied();
        let (start, end) = match range {
            None => {
                // No qualifying cells: move on without emitting.
                self.advance_past_tile(attr_id, false);
                return Ok(());
            }
            Some(r) => r,
        };
        let cell_size = self.schema.cell_size(attr_id);
        let start_offset = start as usize * cell_size;
        let end_offset = (end + 1) as usize * cell_size - 1;

        if self.cursors[attr_id].tile_offset < start_offset {
            self.cursors[attr_id].tile_offset = start_offset;
        }
        let bytes_left = end_offset - self.cursors[attr_id].tile_offset + 1;
        let n = bytes_left.min(free);
        self.emit(attr_id, buffer, buffer_offset, n);

        if self.cursors[attr_id].tile_offset == end_offset + 1 {
            self.advance_past_tile(attr_id, false);
        } else {
            self.cursors[attr_id].overflow = true;
        }
        Ok(())
    }

    pub(super) fn copy_from_tile_buffer_partial_contig_sparse_var(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_offset: &mut usize,
        buffer_var: &mut [u8],
        buffer_var_offset: &mut usize,
    ) -> Result<()> {
        let free = buffer.len() - *buffer_offset;
        let var_free = buffer_var.len() - *buffer_var_offset;
        if free == 0 || var_free == 0 {
            self.cursors[attr_id].overflow = true;
            return Ok(());
        }
        let range = self.current_tile(attr_id).cell_pos_ranges.first().copied();
        let (start, end) = match range {
            None => {
                self.advance_past_tile(attr_id, true);
                return Ok(());
            }
            Some(r) => r,
        };
        let start_offset = start as usize * VAR_OFFSET_SIZE;
        let end_offset = (end + 1) as usize * VAR_OFFSET_SIZE - 1;

        if self.cursors[attr_id].tile_offset < start_offset {
            self.cursors[attr_id].tile_offset = start_offset;
            let o = offset_at(self.cursors[attr_id].tile.bytes(), start as usize);
            self.cursors[attr_id].tile_var_offset = o as usize;
        }
        let cur_cell = (self.cursors[attr_id].tile_offset / VAR_OFFSET_SIZE) as i64;
        let (n, n_var) = self.compute_bytes_to_copy(attr_id, cur_cell, end, free, var_free);
        if n == 0 {
            self.cursors[attr_id].overflow = true;
            return Ok(());
        }

        let out_start = *buffer_offset;
        self.emit(attr_id, buffer, buffer_offset, n);
        rebase_offsets(
            &mut buffer[out_start..out_start + n],
            n / VAR_OFFSET_SIZE,
            *buffer_var_offset as u64,
        );
        self.emit_var(attr_id, buffer_var, buffer_var_offset, n_var);

        if self.cursors[attr_id].tile_offset == end_offset + 1 {
            self.advance_past_tile(attr_id, true);
        } else {
            self.cursors[attr_id].overflow = true;
        }
        Ok(())
    }

    pub(super) fn copy_from_tile_buffer_partial_non_contig_sparse(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_offset: &mut usize,
    ) -> Result<()> {
        if buffer.len() - *buffer_offset == 0 {
            self.cursors[attr_id].overflow = true;
            return Ok(());
        }
        let ranges = self.current_tile(attr_id).cell_pos_ranges.clone();
        if ranges.is_empty() {
            self.advance_past_tile(attr_id, false);
            return Ok(());
        }
        let cell_size = self.schema.cell_size(attr_id);

        for i in self.cursors[attr_id].cell_range_pos..ranges.len() {
            let (start, end) = ranges[i];
            let start_offset = start as usize * cell_size;
            let end_offset = (end + 1) as usize * cell_size - 1;

            if self.cursors[attr_id].tile_offset < start_offset {
                self.cursors[attr_id].tile_offset = start_offset;
            }
            let free = buffer.len() - *buffer_offset;
            let bytes_left = end_offset - self.cursors[attr_id].tile_offset + 1;
            let n = bytes_left.min(free);
            self.emit(attr_id, buffer, buffer_offset, n);

            if self.cursors[attr_id].tile_offset != end_offset + 1 {
                // Paused inside this sub-range; resume here next call.
                self.cursors[attr_id].overflow = true;
                self.cursors[attr_id].cell_range_pos = i;
                return Ok(());
            }
        }
        self.advance_past_tile(attr_id, false);
        Ok(())
    }

    pub(super) fn copy_from_tile_buffer_partial_non_contig_sparse_var(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_offset: &mut usize,
        buffer_var: &mut [u8],
        buffer_var_offset: &mut usize,
    ) -> Result<()> {
        if buffer.len() - *buffer_offset == 0 || buffer_var.len() - *buffer_var_offset == 0 {
            self.cursors[attr_id].overflow = true;
            return Ok(());
        }
        let ranges = self.current_tile(attr_id).cell_pos_ranges.clone();
        if ranges.is_empty() {
            self.advance_past_tile(attr_id, true);
            return Ok(());
        }

        for i in self.cursors[attr_id].cell_range_pos..ranges.len() {
            let (start, end) = ranges[i];
            let start_offset = start as usize * VAR_OFFSET_SIZE;
            let end_offset = (end + 1) as usize * VAR_OFFSET_SIZE - 1;

            if self.cursors[attr_id].tile_offset < start_offset {
                self.cursors[attr_id].tile_offset = start_offset;
            }
            let cur_cell = self.cursors[attr_id].tile_offset / VAR_OFFSET_SIZE;
            let var_start = offset_at(self.cursors[attr_id].tile.bytes(), cur_cell) as usize;
            if self.cursors[attr_id].tile_var_offset < var_start {
                self.cursors[attr_id].tile_var_offset = var_start;
            }

            let free = buffer.len() - *buffer_offset;
            let var_free = buffer_var.len() - *buffer_var_offset;
            let (n, n_var) =
                self.compute_bytes_to_copy(attr_id, cur_cell as i64, end, free, var_free);
            if n != 0 {
                let out_start = *buffer_offset;
                self.emit(attr_id, buffer, buffer_offset, n);
                rebase_offsets(
                    &mut buffer[out_start..out_start + n],
                    n / VAR_OFFSET_SIZE,
                    *buffer_var_offset as u64,
                );
                self.emit_var(attr_id, buffer_var, buffer_var_offset, n_var);
            }

            if self.cursors[attr_id].tile_offset != end_offset + 1 {
                self.cursors[attr_id].overflow = true;
                self.cursors[attr_id].cell_range_pos = i;
                return Ok(());
            }
        }
        self.advance_past_tile(attr_id, true);
        Ok(())
    }
}

impl<'a, T: GridCoordinate> ReadState<'a, T> {
    // ------------------------------------------------------------------
    // PARTIAL overlaps, dense
    // ------------------------------------------------------------------

    /// Tile-local window of a dense contiguous overlap: start cell
    /// position and cell count.
    fn dense_window(&self, attr_id: usize) -> Result<(i64, i64)> {
        let tile = self.current_tile(attr_id);
        let dim_num = self.schema.dim_num();
        let start_coords: Vec<T> = (0..dim_num).map(|i| tile.overlap_range[2 * i]).collect();
        let start_cell = self.schema.cell_pos(&start_coords)?;
        let cell_num = self.schema.cell_num_in_range(&tile.overlap_range);
        Ok((start_cell, cell_num))
    }

    pub(super) fn copy_from_tile_buffer_partial_contig_dense(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_offset: &mut usize,
    ) -> Result<()> {
        let free = buffer.len() - *buffer_offset;
        if free == 0 {
            self.cursors[attr_id].overflow = true;
            return Ok(());
        }
        let cell_size = self.schema.cell_size(attr_id);
        let (start_cell, range_cell_num) = self.dense_window(attr_id)?;
        let start_offset = start_cell as usize * cell_size;
        let end_offset = start_offset + range_cell_num as usize * cell_size - 1;

        // First entry into this tile: snap to the window start.
        if self.cursors[attr_id].tile_offset == 0 {
            self.cursors[attr_id].tile_offset = start_offset;
        }
        let bytes_left = end_offset - self.cursors[attr_id].tile_offset + 1;
        let n = bytes_left.min(free);
        self.emit(attr_id, buffer, buffer_offset, n);

        if self.cursors[attr_id].tile_offset == end_offset + 1 {
            self.advance_past_tile(attr_id, false);
        } else {
            self.cursors[attr_id].overflow = true;
        }
        Ok(())
    }

    pub(super) fn copy_from_tile_buffer_partial_contig_dense_var(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_offset: &mut usize,
        buffer_var: &mut [u8],
        buffer_var_offset: &mut usize,
    ) -> Result<()> {
        let free = buffer.len() - *buffer_offset;
        let var_free = buffer_var.len() - *buffer_var_offset;
        if free == 0 || var_free == 0 {
            self.cursors[attr_id].overflow = true;
            return Ok(());
        }
        let (start_cell, range_cell_num) = self.dense_window(attr_id)?;
        let start_offset = start_cell as usize * VAR_OFFSET_SIZE;
        let end_cell = start_cell + range_cell_num - 1;
        let end_offset = (end_cell + 1) as usize * VAR_OFFSET_SIZE - 1;

        if self.cursors[attr_id].tile_offset == 0 {
            self.cursors[attr_id].tile_offset = start_offset;
            let o = offset_at(self.cursors[attr_id].tile.bytes(), start_cell as usize);
            self.cursors[attr_id].tile_var_offset = o as usize;
        }
        let cur_cell = (self.cursors[attr_id].tile_offset / VAR_OFFSET_SIZE) as i64;
        let (n, n_var) = self.compute_bytes_to_copy(attr_id, cur_cell, end_cell, free, var_free);
        if n == 0 {
            self.cursors[attr_id].overflow = true;
            return Ok(());
        }

        let out_start = *buffer_offset;
        self.emit(attr_id, buffer, buffer_offset, n);
        rebase_offsets(
            &mut buffer[out_start..out_start + n],
            n / VAR_OFFSET_SIZE,
            *buffer_var_offset as u64,
        );
        self.emit_var(attr_id, buffer_var, buffer_var_offset, n_var);

        if self.cursors[attr_id].tile_offset == end_offset + 1 {
            self.advance_past_tile(attr_id, true);
        } else {
            self.cursors[attr_id].overflow = true;
        }
        Ok(())
    }

    pub(super) fn copy_from_tile_buffer_partial_non_contig_dense(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_offset: &mut usize,
    ) -> Result<()> {
        if buffer.len() - *buffer_offset == 0 {
            self.cursors[attr_id].overflow = true;
            return Ok(());
        }
        let cell_size = self.schema.cell_size(attr_id);
        let (range_start_cell, _) = self.dense_window(attr_id)?;
        let range_vec = self.current_tile(attr_id).overlap_range.clone();
        let range_start_offset = range_start_cell as usize * cell_size;
        let range_end_cell = {
            let dim_num = self.schema.dim_num();
            let end_coords: Vec<T> = (0..dim_num).map(|i| range_vec[2 * i + 1]).collect();
            self.schema.cell_pos(&end_coords)?
        };
        let range_end_offset = (range_end_cell + 1) as usize * cell_size - 1;

        let range_slab = self.schema.cell_num_in_range_slab(&range_vec) as usize * cell_size;
        let tile_slab = self.schema.cell_num_in_tile_slab::<T>()? as usize * cell_size;

        if self.cursors[attr_id].tile_offset < range_start_offset {
            self.cursors[attr_id].tile_offset = range_start_offset;
        }

        loop {
            let free = buffer.len() - *buffer_offset;
            if free == 0 {
                break;
            }
            let tile_offset = self.cursors[attr_id].tile_offset;
            let slab_start =
                (tile_offset - range_start_offset) / tile_slab * tile_slab + range_start_offset;
            let slab_end = slab_start + range_slab - 1;
            let bytes_in_slab = slab_end - tile_offset + 1;
            let n = bytes_in_slab.min(free);
            self.emit(attr_id, buffer, buffer_offset, n);

            if self.cursors[attr_id].tile_offset == range_end_offset + 1 {
                break;
            }
            if n == bytes_in_slab {
                // Hop over the out-of-range remainder of the tile slab.
                self.cursors[attr_id].tile_offset += tile_slab - range_slab;
            } else {
                break;
            }
        }

        if self.cursors[attr_id].tile_offset == range_end_offset + 1 {
            self.advance_past_tile(attr_id, false);
        } else {
            self.cursors[attr_id].overflow = true;
        }
        Ok(())
    }

    pub(super) fn copy_from_tile_buffer_partial_non_contig_dense_var(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_offset: &mut usize,
        buffer_var: &mut [u8],
        buffer_var_offset: &mut usize,
    ) -> Result<()> {
        if buffer.len() - *buffer_offset == 0 || buffer_var.len() - *buffer_var_offset == 0 {
            self.cursors[attr_id].overflow = true;
            return Ok(());
        }
        let (range_start_cell, _) = self.dense_window(attr_id)?;
        let range_vec = self.current_tile(attr_id).overlap_range.clone();
        let range_start_offset = range_start_cell as usize * VAR_OFFSET_SIZE;
        let range_end_cell = {
            let dim_num = self.schema.dim_num();
            let end_coords: Vec<T> = (0..dim_num).map(|i| range_vec[2 * i + 1]).collect();
            self.schema.cell_pos(&end_coords)?
        };
        let range_end_offset = (range_end_cell + 1) as usize * VAR_OFFSET_SIZE - 1;

        let range_slab =
            self.schema.cell_num_in_range_slab(&range_vec) as usize * VAR_OFFSET_SIZE;
        let tile_slab = self.schema.cell_num_in_tile_slab::<T>()? as usize * VAR_OFFSET_SIZE;

        if self.cursors[attr_id].tile_offset < range_start_offset {
            self.cursors[attr_id].tile_offset = range_start_offset;
            let o = offset_at(self.cursors[attr_id].tile.bytes(), range_start_cell as usize);
            self.cursors[attr_id].tile_var_offset = o as usize;
        }

        loop {
            let free = buffer.len() - *buffer_offset;
            let var_free = buffer_var.len() - *buffer_var_offset;
            let tile_offset = self.cursors[attr_id].tile_offset;
            let slab_start =
                (tile_offset - range_start_offset) / tile_slab * tile_slab + range_start_offset;
            let slab_end = slab_start + range_slab - 1;
            let start_cell = (tile_offset / VAR_OFFSET_SIZE) as i64;
            let end_cell = ((slab_end + 1) / VAR_OFFSET_SIZE) as i64 - 1;

            let (n, n_var) =
                self.compute_bytes_to_copy(attr_id, start_cell, end_cell, free, var_free);
            if n == 0 {
                break;
            }
            let out_start = *buffer_offset;
            self.emit(attr_id, buffer, buffer_offset, n);
            rebase_offsets(
                &mut buffer[out_start..out_start + n],
                n / VAR_OFFSET_SIZE,
                *buffer_var_offset as u64,
            );
            self.emit_var(attr_id, buffer_var, buffer_var_offset, n_var);

            if self.cursors[attr_id].tile_offset == range_end_offset + 1 {
                break;
            }
            if self.cursors[attr_id].tile_offset == slab_end + 1 {
                // Hop to the next slab; realign the payload cursor.
                self.cursors[attr_id].tile_offset += tile_slab - range_slab;
                let c = &mut self.cursors[attr_id];
                if c.tile_offset != c.tile_size {
                    let cell = c.tile_offset / VAR_OFFSET_SIZE;
                    c.tile_var_offset = offset_at(c.tile.bytes(), cell) as usize;
                } else {
                    c.tile_var_offset = c.tile_var_size;
                }
            } else {
                break;
            }
        }

        if self.cursors[attr_id].tile_offset == range_end_offset + 1 {
            self.advance_past_tile(attr_id, true);
        } else {
            self.cursors[attr_id].overflow = true;
        }
        Ok(())
    }

    /// PARTIAL_CONTIG dense, uncompressed fixed cells: the window is one
    /// contiguous disk run, so read it straight into the output when it
    /// fits.
    pub(super) fn copy_tile_partial_contig_dense(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_offset: &mut usize,
    ) -> Result<()> {
        let free = buffer.len() - *buffer_offset;
        if free == 0 {
            self.cursors[attr_id].overflow = true;
            return Ok(());
        }
        let cell_size = self.schema.cell_size(attr_id);
        let (start_cell, range_cell_num) = self.dense_window(attr_id)?;
        let result_size = range_cell_num as usize * cell_size;

        if result_size <= free {
            let pos = self.current_tile(attr_id).pos;
            let full_tile_size = self.schema.tile_size(attr_id);
            let file_offset = pos as u64 * full_tile_size as u64 + start_cell as u64 * cell_size as u64;
            let path = self.attr_file(attr_id);
            self.read_into(
                &path,
                file_offset,
                &mut buffer[*buffer_offset..*buffer_offset + result_size],
            )?;
            *buffer_offset += result_size;
            self.cursors[attr_id].overlapping_pos += 1;
            self.cursors[attr_id].cell_range_pos = 0;
        } else {
            self.fetch_tile_plain(attr_id)?;
            self.copy_from_tile_buffer_partial_contig_dense(attr_id, buffer, buffer_offset)?;
        }
        Ok(())
    }
}

impl<'a, T: Coordinate> ReadState<'a, T> {
    /// PARTIAL_CONTIG sparse, uncompressed fixed cells: one qualifying
    /// run, read straight from disk when it fits.
    pub(super) fn copy_tile_partial_contig_sparse(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_offset: &mut usize,
    ) -> Result<()> {
        let range = self.current_tile(attr_id).cell_pos_ranges.first().copied();
        let (start, end) = match range {
            None => {
                self.advance_past_tile(attr_id, false);
                return Ok(());
            }
            Some(r) => r,
        };
        let free = buffer.len() - *buffer_offset;
        let cell_size = self.schema.cell_size(attr_id);
        let result_size = (end - start + 1) as usize * cell_size;

        if result_size <= free {
            let pos = self.current_tile(attr_id).pos;
            let full_tile_size = self.schema.tile_size(attr_id);
            let file_offset = pos as u64 * full_tile_size as u64 + start as u64 * cell_size as u64;
            let path = self.attr_file(attr_id);
            self.read_into(
                &path,
                file_offset,
                &mut buffer[*buffer_offset..*buffer_offset + result_size],
            )?;
            *buffer_offset += result_size;
            self.cursors[attr_id].overlapping_pos += 1;
            self.cursors[attr_id].cell_range_pos = 0;
        } else {
            self.fetch_tile_plain(attr_id)?;
            self.copy_from_tile_buffer_partial_contig_sparse(attr_id, buffer, buffer_offset)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets_tile(offsets: &[u64]) -> Vec<u8> {
        offsets.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn var_clamp_keeps_whole_cells() {
        // Cells of sizes 1, 2, 3, 4 (tile-local offsets 0,1,3,6; total 10).
        let tile = offsets_tile(&[0, 1, 3, 6]);

        // Everything fits.
        assert_eq!(clamp_end_to_var_space(&tile, 10, 4, 0, 3, 10), Some((3, 10)));
        // 5 free bytes: cells 0 and 1 fit (3 bytes), cell 2 would need 6.
        assert_eq!(clamp_end_to_var_space(&tile, 10, 4, 0, 3, 5), Some((1, 3)));
        // Exact boundary: 6 free bytes covers cells 0..=2 inclusive.
        assert_eq!(clamp_end_to_var_space(&tile, 10, 4, 0, 3, 6), Some((2, 6)));
        // Not even the first cell fits.
        assert_eq!(clamp_end_to_var_space(&tile, 10, 4, 0, 3, 0), None);
        // Starting mid-tile uses the local base.
        assert_eq!(clamp_end_to_var_space(&tile, 10, 4, 2, 3, 7), Some((3, 7)));
        assert_eq!(clamp_end_to_var_space(&tile, 10, 4, 2, 3, 6), Some((2, 3)));
    }
}
