//! Tile fetch: staging fragment bytes into per-attribute buffers.
//!
//! Four shapes (plain or gzip, fixed or variable), each served by
//! either backend. Plain fixed tiles sit at `pos * full_tile_size` in the
//! attribute file; compressed tiles start where bookkeeping says they do.
//! Variable attributes stage the offsets tile first, size the payload
//! from the next tile's first offset (or the payload file's length for
//! the last tile), then rebase the staged offsets to a zero base.

use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::storage::codec::gzip_decompress_into;
use crate::storage::io::{self, IoBackend};
use crate::storage::schema::{Compression, Coordinate, VAR_OFFSET_SIZE};
use crate::{LatticaError, Result};

use super::types::{shift_offsets_tile_local, TileBuf};
use super::ReadState;

impl<'a, T: Coordinate> ReadState<'a, T> {
    /// Read `dst.len()` bytes at `offset` straight into `dst`, honoring
    /// the configured backend. Used by the direct disk-to-output paths.
    pub(super) fn read_into(&self, path: &Path, offset: u64, dst: &mut [u8]) -> Result<()> {
        match self.backend {
            IoBackend::Read => io::read_exact_at(path, offset, dst),
            IoBackend::Mmap => {
                let map = io::map_range(path, offset, dst.len())?;
                dst.copy_from_slice(&map);
                Ok(())
            }
        }
    }

    /// Pull raw compressed bytes into the shared scratch.
    fn load_compressed(&mut self, path: &Path, offset: u64, len: usize) -> Result<()> {
        match self.backend {
            IoBackend::Read => {
                let buf = self.compressed.ensure_owned(len);
                io::read_exact_at(path, offset, &mut buf[..len])?;
            }
            IoBackend::Mmap => {
                self.compressed = TileBuf::Mapped(io::map_range(path, offset, len)?);
            }
        }
        Ok(())
    }

    pub(super) fn fetch_tile_plain(&mut self, attr_id: usize) -> Result<()> {
        let tile_idx = self.cursors[attr_id].overlapping_pos;
        self.fetch_tile_plain_at(attr_id, tile_idx)
    }

    fn fetch_tile_plain_at(&mut self, attr_id: usize, tile_idx: usize) -> Result<()> {
        let tile = &self.overlapping_tiles[tile_idx];
        if attr_id == self.coords_slot()
            && tile.coords_tile_fetched
            && self.cursors[attr_id].staged_tile == Some(tile.pos)
        {
            return Ok(());
        }
        let pos = tile.pos;
        let cell_num = tile.cell_num;

        let cell_size = self.schema.cell_size(attr_id);
        let full_tile_size = self.schema.tile_size(attr_id);
        let tile_size = cell_num as usize * cell_size;
        let file_offset = pos as u64 * full_tile_size as u64;
        let path = self.attr_file(attr_id);

        match self.backend {
            IoBackend::Read => {
                let buf = self.cursors[attr_id].tile.ensure_owned(full_tile_size);
                io::read_exact_at(&path, file_offset, &mut buf[..tile_size])?;
            }
            IoBackend::Mmap => {
                self.cursors[attr_id].tile = TileBuf::Mapped(io::map_range(
                    &path,
                    file_offset,
                    tile_size,
                )?);
            }
        }

        let cursor = &mut self.cursors[attr_id];
        cursor.tile_size = tile_size;
        cursor.tile_offset = 0;
        cursor.staged_tile = Some(pos);
        if attr_id == self.schema.attribute_num() {
            self.overlapping_tiles[tile_idx].coords_tile_fetched = true;
        }
        Ok(())
    }

    pub(super) fn fetch_tile_gzip(&mut self, attr_id: usize) -> Result<()> {
        let tile_idx = self.cursors[attr_id].overlapping_pos;
        self.fetch_tile_gzip_at(attr_id, tile_idx)
    }

    fn fetch_tile_gzip_at(&mut self, attr_id: usize, tile_idx: usize) -> Result<()> {
        let tile = &self.overlapping_tiles[tile_idx];
        if attr_id == self.coords_slot()
            && tile.coords_tile_fetched
            && self.cursors[attr_id].staged_tile == Some(tile.pos)
        {
            return Ok(());
        }
        let pos = tile.pos;
        let cell_num = tile.cell_num;

        let cell_size = self.schema.cell_size(attr_id);
        let full_tile_size = self.schema.tile_size(attr_id);
        let tile_size = cell_num as usize * cell_size;
        let path = self.attr_file(attr_id);

        let offsets = self.bookkeeping.tile_offsets(attr_id);
        let file_offset = *offsets.get(pos as usize).ok_or_else(|| {
            LatticaError::Bookkeeping(format!(
                "no tile offset for attribute {attr_id} tile {pos}"
            ))
        })?;
        let compressed_size =
            self.bookkeeping
                .tile_compressed_size(attr_id, pos, io::file_size(&path)?)? as usize;

        self.load_compressed(&path, file_offset, compressed_size)?;
        let out_size = {
            let src = &self.compressed.bytes()[..compressed_size];
            let dst = self.cursors[attr_id].tile.ensure_owned(full_tile_size);
            gzip_decompress_into(src, &mut dst[..tile_size])?
        };
        if out_size != tile_size {
            log::error!(
                "tile {pos} of {} inflated to {out_size} bytes, expected {tile_size}",
                path.display()
            );
            return Err(LatticaError::TileSizeMismatch { expected: tile_size, actual: out_size });
        }

        let cursor = &mut self.cursors[attr_id];
        cursor.tile_size = tile_size;
        cursor.tile_offset = 0;
        cursor.staged_tile = Some(pos);
        if attr_id == self.schema.attribute_num() {
            self.overlapping_tiles[tile_idx].coords_tile_fetched = true;
        }
        Ok(())
    }

    pub(super) fn fetch_tile_var_plain(&mut self, attr_id: usize) -> Result<()> {
        // Offsets tile first; its first cell locates the payload.
        self.fetch_tile_plain(attr_id)?;

        let tile_idx = self.cursors[attr_id].overlapping_pos;
        let pos = self.overlapping_tiles[tile_idx].pos;
        let cell_num = self.overlapping_tiles[tile_idx].cell_num as usize;
        let full_tile_size = self.schema.tile_size(attr_id);
        let tile_num = self.bookkeeping.tile_num();
        let var_path = self.attr_var_file(attr_id);

        let start_var_offset = LittleEndian::read_u64(self.cursors[attr_id].tile.bytes());
        let end_var_offset = if pos != tile_num - 1 {
            // First offset of the next tile.
            let mut peek = [0u8; VAR_OFFSET_SIZE];
            let path = self.attr_file(attr_id);
            io::read_exact_at(&path, pos as u64 * full_tile_size as u64 + full_tile_size as u64, &mut peek)?;
            LittleEndian::read_u64(&peek)
        } else {
            io::file_size(&var_path)?
        };
        let tile_var_size = (end_var_offset - start_var_offset) as usize;

        match self.backend {
            _ if tile_var_size == 0 => {
                self.cursors[attr_id].tile_var.ensure_owned(0);
            }
            IoBackend::Read => {
                let buf = self.cursors[attr_id].tile_var.ensure_owned(tile_var_size);
                io::read_exact_at(&var_path, start_var_offset, &mut buf[..tile_var_size])?;
            }
            IoBackend::Mmap => {
                self.cursors[attr_id].tile_var =
                    TileBuf::Mapped(io::map_range(&var_path, start_var_offset, tile_var_size)?);
            }
        }

        let cursor = &mut self.cursors[attr_id];
        cursor.tile_var_size = tile_var_size;
        cursor.tile_var_offset = 0;
        shift_offsets_tile_local(cursor.tile.bytes_mut(), cell_num);
        Ok(())
    }

    pub(super) fn fetch_tile_var_gzip(&mut self, attr_id: usize) -> Result<()> {
        // Offsets tile, inflated into the fixed slot.
        self.fetch_tile_gzip(attr_id)?;

        let tile_idx = self.cursors[attr_id].overlapping_pos;
        let pos = self.overlapping_tiles[tile_idx].pos;
        let cell_num = self.overlapping_tiles[tile_idx].cell_num as usize;
        let var_path = self.attr_var_file(attr_id);

        let var_offsets = self.bookkeeping.tile_var_offsets(attr_id);
        let file_offset = *var_offsets.get(pos as usize).ok_or_else(|| {
            LatticaError::Bookkeeping(format!(
                "no var tile offset for attribute {attr_id} tile {pos}"
            ))
        })?;
        let compressed_size = self
            .bookkeeping
            .tile_var_compressed_size(attr_id, pos, io::file_size(&var_path)?)?
            as usize;
        let tile_var_size =
            *self.bookkeeping.tile_var_sizes(attr_id).get(pos as usize).ok_or_else(|| {
                LatticaError::Bookkeeping(format!(
                    "no var tile size for attribute {attr_id} tile {pos}"
                ))
            })? as usize;

        self.load_compressed(&var_path, file_offset, compressed_size)?;
        let out_size = {
            let src = &self.compressed.bytes()[..compressed_size];
            let dst = self.cursors[attr_id].tile_var.ensure_owned(tile_var_size);
            gzip_decompress_into(src, &mut dst[..tile_var_size])?
        };
        if out_size != tile_var_size {
            log::error!(
                "var tile {pos} of {} inflated to {out_size} bytes, expected {tile_var_size}",
                var_path.display()
            );
            return Err(LatticaError::TileSizeMismatch {
                expected: tile_var_size,
                actual: out_size,
            });
        }

        let cursor = &mut self.cursors[attr_id];
        cursor.tile_var_size = tile_var_size;
        cursor.tile_var_offset = 0;
        shift_offsets_tile_local(cursor.tile.bytes_mut(), cell_num);
        Ok(())
    }

    /// Make the coordinates of the tile at `tile_idx` readable for the
    /// cell-position resolver. Stages into the coordinates cursor when
    /// that cursor is parked on this tile (or unselected); otherwise the
    /// bytes land in a side scratch so a paused drain stays intact.
    /// Returns whether the cursor holds the bytes.
    pub(super) fn stage_coords_for_resolve(&mut self, tile_idx: usize) -> Result<bool> {
        let coords_slot = self.coords_slot();
        let tile = &self.overlapping_tiles[tile_idx];
        let pos = tile.pos;
        if tile.coords_tile_fetched && self.cursors[coords_slot].staged_tile == Some(pos) {
            return Ok(true);
        }
        let cell_num = tile.cell_num;

        let cursor_free = self.cursors[coords_slot].overlapping_pos == tile_idx
            || !self.attribute_ids.contains(&coords_slot);
        let compression = self.schema.attr_compression(coords_slot);

        if cursor_free {
            match compression {
                Compression::None => self.fetch_tile_plain_at(coords_slot, tile_idx)?,
                Compression::Gzip => self.fetch_tile_gzip_at(coords_slot, tile_idx)?,
            }
            return Ok(true);
        }

        // The coordinates cursor is mid-drain on an earlier tile; resolve
        // from a private copy.
        let cell_size = self.schema.cell_size(coords_slot);
        let tile_size = cell_num as usize * cell_size;
        let path = self.attr_file(coords_slot);
        self.resolve_scratch.resize(tile_size, 0);
        match compression {
            Compression::None => {
                let full_tile_size = self.schema.tile_size(coords_slot);
                let file_offset = pos as u64 * full_tile_size as u64;
                io::read_exact_at(&path, file_offset, &mut self.resolve_scratch)?;
            }
            Compression::Gzip => {
                let file_offset = self.bookkeeping.tile_offsets(coords_slot)[pos as usize];
                let compressed_size = self
                    .bookkeeping
                    .tile_compressed_size(coords_slot, pos, io::file_size(&path)?)?
                    as usize;
                self.load_compressed(&path, file_offset, compressed_size)?;
                let src = &self.compressed.bytes()[..compressed_size];
                let out = gzip_decompress_into(src, &mut self.resolve_scratch)?;
                if out != tile_size {
                    return Err(LatticaError::TileSizeMismatch {
                        expected: tile_size,
                        actual: out,
                    });
                }
            }
        }
        Ok(false)
    }
}
