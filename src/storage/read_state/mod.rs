//! Fragment read state: resumable materialization of a query sub-range.
//!
//! A `FragmentReader` is opened against one fragment with a query range
//! and an ordered attribute selection. Each `read()` call packs as many
//! qualifying bytes as fit into the caller's buffers, in the fragment's
//! cell order; when a buffer fills mid-tile the affected attribute's
//! cursor pauses on the exact byte and the next call resumes there with
//! fresh buffers, never re-emitting data.

mod cell_ranges;
mod copy;
mod fetch;
mod locator;
mod types;

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};

use crate::storage::bookkeeping::Bookkeeping;
use crate::storage::io::{self, IoBackend};
use crate::storage::schema::{
    ArraySchema, Compression, Coordinate, CoordDatatype, CoordValues, GridCoordinate, Overlap,
};
use crate::{LatticaError, Result};

use types::{AttrCursor, OverlappingTile, TileBuf};

/// Read direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Read,
    /// Declared but not implemented: accepted, produces no data.
    ReadReverse,
}

/// Read state for one fragment, generic over the coordinate element type.
pub(crate) struct ReadState<'a, T: Coordinate> {
    schema: &'a ArraySchema,
    bookkeeping: &'a Bookkeeping,
    fragment_dir: PathBuf,
    query: Vec<T>,
    attribute_ids: Vec<usize>,
    backend: IoBackend,

    /// Overlapping tiles discovered so far, compacted as cursors pass.
    overlapping_tiles: Vec<OverlappingTile<T>>,
    /// One cursor per attribute plus the coordinates slot.
    cursors: Vec<AttrCursor>,
    /// Shared scratch for raw compressed tile bytes.
    compressed: TileBuf,
    /// Coordinates bytes staged for resolution when the coordinates
    /// cursor is mid-tile and must not be disturbed.
    resolve_scratch: Vec<u8>,

    /// Dense: the query range clipped into tile space (flat lo/hi pairs).
    range_in_tile_domain: Vec<T>,
    /// Sparse: inclusive global tile positions worth probing.
    tile_search_range: [i64; 2],
}

impl<'a, T: Coordinate> ReadState<'a, T> {
    fn new_common(
        schema: &'a ArraySchema,
        bookkeeping: &'a Bookkeeping,
        fragment_dir: PathBuf,
        query: Vec<T>,
        attribute_ids: Vec<usize>,
        backend: IoBackend,
    ) -> Self {
        let slots = schema.attribute_num() + 1;
        let mut cursors = Vec::with_capacity(slots);
        cursors.resize_with(slots, AttrCursor::default);
        Self {
            schema,
            bookkeeping,
            fragment_dir,
            query,
            attribute_ids,
            backend,
            overlapping_tiles: Vec::new(),
            cursors,
            compressed: TileBuf::Unset,
            resolve_scratch: Vec::new(),
            range_in_tile_domain: Vec::new(),
            tile_search_range: [0, -1],
        }
    }

    fn new_sparse(
        schema: &'a ArraySchema,
        bookkeeping: &'a Bookkeeping,
        fragment_dir: PathBuf,
        query: Vec<T>,
        attribute_ids: Vec<usize>,
        backend: IoBackend,
    ) -> Result<Self> {
        let mut state =
            Self::new_common(schema, bookkeeping, fragment_dir, query, attribute_ids, backend);
        state.init_tile_search_range()?;
        Ok(state)
    }

    fn coords_slot(&self) -> usize {
        self.schema.attribute_num()
    }

    fn current_tile(&self, attr_id: usize) -> &OverlappingTile<T> {
        &self.overlapping_tiles[self.cursors[attr_id].overlapping_pos]
    }

    fn attr_file(&self, attr_id: usize) -> PathBuf {
        io::attr_path(&self.fragment_dir, self.schema.attr_name(attr_id))
    }

    fn attr_var_file(&self, attr_id: usize) -> PathBuf {
        io::attr_var_path(&self.fragment_dir, self.schema.attr_name(attr_id))
    }

    fn is_empty_attribute(&self, attr_id: usize) -> bool {
        !self.attr_file(attr_id).exists()
    }

    fn reset_overflow(&mut self) {
        for c in self.cursors.iter_mut() {
            c.overflow = false;
        }
    }

    fn overflow(&self, attr_id: usize) -> bool {
        self.cursors[attr_id].overflow
    }

    /// Drop overlapping tiles every selected cursor has moved past and
    /// rebase the cursors, so long scans stay bounded.
    fn compact_overlapping_tiles(&mut self) {
        let min_pos = self
            .attribute_ids
            .iter()
            .map(|&a| self.cursors[a].overlapping_pos)
            .min()
            .unwrap_or(0);
        if min_pos != 0 {
            self.overlapping_tiles.drain(..min_pos);
            for c in self.cursors.iter_mut() {
                if c.overlapping_pos != 0 {
                    c.overlapping_pos -= min_pos;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Sparse read loops
    // ------------------------------------------------------------------

    fn read_sparse(&mut self, buffers: &mut [&mut [u8]], sizes: &mut [usize]) -> Result<()> {
        let mut buf_i = 0;
        for a in 0..self.attribute_ids.len() {
            let attr_id = self.attribute_ids[a];
            if !self.schema.attr_is_var(attr_id) {
                sizes[buf_i] = self.read_sparse_attr(attr_id, &mut *buffers[buf_i])?;
                buf_i += 1;
            } else {
                let (head, tail) = buffers.split_at_mut(buf_i + 1);
                let (n, n_var) =
                    self.read_sparse_attr_var(attr_id, &mut *head[buf_i], &mut *tail[0])?;
                sizes[buf_i] = n;
                sizes[buf_i + 1] = n_var;
                buf_i += 2;
            }
        }
        Ok(())
    }

    fn read_sparse_attr(&mut self, attr_id: usize, buffer: &mut [u8]) -> Result<usize> {
        if buffer.is_empty() {
            self.cursors[attr_id].overflow = true;
            return Ok(0);
        }
        if self.is_empty_attribute(attr_id) {
            return Ok(0);
        }
        let compression = self.schema.attr_compression(attr_id);
        let mut buffer_offset = 0usize;

        loop {
            // Drain bytes still staged from a previous call.
            if self.cursors[attr_id].tile_offset < self.cursors[attr_id].tile_size {
                self.copy_from_tile_buffer_sparse(attr_id, buffer, &mut buffer_offset)?;
            }
            if self.cursors[attr_id].overflow {
                return Ok(buffer_offset);
            }

            if self.cursors[attr_id].overlapping_pos >= self.overlapping_tiles.len() {
                self.next_overlapping_tile_sparse()?;
            }

            let tile = self.current_tile(attr_id);
            let overlap = tile.overlap;
            if overlap == Overlap::None {
                return Ok(buffer_offset);
            }
            let coords_resident = attr_id == self.coords_slot()
                && tile.coords_tile_fetched
                && self.cursors[attr_id].staged_tile == Some(tile.pos);

            match compression {
                Compression::Gzip => {
                    self.fetch_tile_gzip(attr_id)?;
                    self.copy_from_tile_buffer_sparse(attr_id, buffer, &mut buffer_offset)?;
                }
                Compression::None => {
                    if coords_resident {
                        // Staged by the cell-position resolver already.
                        self.copy_from_tile_buffer_sparse(attr_id, buffer, &mut buffer_offset)?;
                    } else {
                        match overlap {
                            Overlap::Full => {
                                self.copy_tile_full(attr_id, buffer, &mut buffer_offset)?
                            }
                            Overlap::PartialContig => self.copy_tile_partial_contig_sparse(
                                attr_id,
                                buffer,
                                &mut buffer_offset,
                            )?,
                            _ => {
                                self.fetch_tile_plain(attr_id)?;
                                self.copy_from_tile_buffer_partial_non_contig_sparse(
                                    attr_id,
                                    buffer,
                                    &mut buffer_offset,
                                )?;
                            }
                        }
                    }
                }
            }

            if self.cursors[attr_id].overflow {
                return Ok(buffer_offset);
            }
        }
    }

    fn read_sparse_attr_var(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_var: &mut [u8],
    ) -> Result<(usize, usize)> {
        if buffer.is_empty() || buffer_var.is_empty() {
            self.cursors[attr_id].overflow = true;
            return Ok((0, 0));
        }
        if self.is_empty_attribute(attr_id) {
            return Ok((0, 0));
        }
        let compression = self.schema.attr_compression(attr_id);
        let mut buffer_offset = 0usize;
        let mut buffer_var_offset = 0usize;

        loop {
            if self.cursors[attr_id].tile_offset < self.cursors[attr_id].tile_size {
                self.copy_from_tile_buffer_sparse_var(
                    attr_id,
                    buffer,
                    &mut buffer_offset,
                    buffer_var,
                    &mut buffer_var_offset,
                )?;
            }
            if self.cursors[attr_id].overflow {
                return Ok((buffer_offset, buffer_var_offset));
            }

            if self.cursors[attr_id].overlapping_pos >= self.overlapping_tiles.len() {
                self.next_overlapping_tile_sparse()?;
            }

            let overlap = self.current_tile(attr_id).overlap;
            if overlap == Overlap::None {
                return Ok((buffer_offset, buffer_var_offset));
            }

            match compression {
                Compression::Gzip => {
                    self.fetch_tile_var_gzip(attr_id)?;
                    self.copy_from_tile_buffer_sparse_var(
                        attr_id,
                        buffer,
                        &mut buffer_offset,
                        buffer_var,
                        &mut buffer_var_offset,
                    )?;
                }
                Compression::None => match overlap {
                    Overlap::Full => self.copy_tile_full_var(
                        attr_id,
                        buffer,
                        &mut buffer_offset,
                        buffer_var,
                        &mut buffer_var_offset,
                    )?,
                    _ => {
                        self.fetch_tile_var_plain(attr_id)?;
                        self.copy_from_tile_buffer_sparse_var(
                            attr_id,
                            buffer,
                            &mut buffer_offset,
                            buffer_var,
                            &mut buffer_var_offset,
                        )?;
                    }
                },
            }

            if self.cursors[attr_id].overflow {
                return Ok((buffer_offset, buffer_var_offset));
            }
        }
    }

    /// Drain dispatch for sparse tiles by overlap kind.
    fn copy_from_tile_buffer_sparse(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_offset: &mut usize,
    ) -> Result<()> {
        match self.current_tile(attr_id).overlap {
            Overlap::Full => self.copy_from_tile_buffer_full(attr_id, buffer, buffer_offset),
            Overlap::PartialContig => {
                self.copy_from_tile_buffer_partial_contig_sparse(attr_id, buffer, buffer_offset)
            }
            Overlap::PartialNonContig => self.copy_from_tile_buffer_partial_non_contig_sparse(
                attr_id,
                buffer,
                buffer_offset,
            ),
            Overlap::None => Ok(()),
        }
    }

    fn copy_from_tile_buffer_sparse_var(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_offset: &mut usize,
        buffer_var: &mut [u8],
        buffer_var_offset: &mut usize,
    ) -> Result<()> {
        match self.current_tile(attr_id).overlap {
            Overlap::Full => self.copy_from_tile_buffer_full_var(
                attr_id,
                buffer,
                buffer_offset,
                buffer_var,
                buffer_var_offset,
            ),
            Overlap::PartialContig => self.copy_from_tile_buffer_partial_contig_sparse_var(
                attr_id,
                buffer,
                buffer_offset,
                buffer_var,
                buffer_var_offset,
            ),
            Overlap::PartialNonContig => self
                .copy_from_tile_buffer_partial_non_contig_sparse_var(
                    attr_id,
                    buffer,
                    buffer_offset,
                    buffer_var,
                    buffer_var_offset,
                ),
            Overlap::None => Ok(()),
        }
    }
}

impl<'a, T: GridCoordinate> ReadState<'a, T> {
    fn new_grid(
        schema: &'a ArraySchema,
        bookkeeping: &'a Bookkeeping,
        fragment_dir: PathBuf,
        query: Vec<T>,
        attribute_ids: Vec<usize>,
        backend: IoBackend,
    ) -> Result<Self> {
        let mut state =
            Self::new_common(schema, bookkeeping, fragment_dir, query, attribute_ids, backend);
        if schema.is_dense() {
            state.init_range_in_tile_domain()?;
        } else {
            state.init_tile_search_range()?;
        }
        Ok(state)
    }

    fn read(&mut self, buffers: &mut [&mut [u8]], sizes: &mut [usize]) -> Result<()> {
        if self.schema.is_dense() {
            self.read_dense(buffers, sizes)
        } else {
            self.read_sparse(buffers, sizes)
        }
    }

    // ------------------------------------------------------------------
    // Dense read loops
    // ------------------------------------------------------------------

    fn read_dense(&mut self, buffers: &mut [&mut [u8]], sizes: &mut [usize]) -> Result<()> {
        let mut buf_i = 0;
        for a in 0..self.attribute_ids.len() {
            let attr_id = self.attribute_ids[a];
            if !self.schema.attr_is_var(attr_id) {
                sizes[buf_i] = self.read_dense_attr(attr_id, &mut *buffers[buf_i])?;
                buf_i += 1;
            } else {
                let (head, tail) = buffers.split_at_mut(buf_i + 1);
                let (n, n_var) =
                    self.read_dense_attr_var(attr_id, &mut *head[buf_i], &mut *tail[0])?;
                sizes[buf_i] = n;
                sizes[buf_i + 1] = n_var;
                buf_i += 2;
            }
        }
        Ok(())
    }

    fn read_dense_attr(&mut self, attr_id: usize, buffer: &mut [u8]) -> Result<usize> {
        if buffer.is_empty() {
            self.cursors[attr_id].overflow = true;
            return Ok(0);
        }
        if self.is_empty_attribute(attr_id) {
            return Ok(0);
        }
        let compression = self.schema.attr_compression(attr_id);
        let mut buffer_offset = 0usize;

        loop {
            if self.cursors[attr_id].tile_offset < self.cursors[attr_id].tile_size {
                self.copy_from_tile_buffer_dense(attr_id, buffer, &mut buffer_offset)?;
            }
            if self.cursors[attr_id].overflow {
                return Ok(buffer_offset);
            }

            if self.cursors[attr_id].overlapping_pos >= self.overlapping_tiles.len() {
                self.next_overlapping_tile_dense()?;
            }

            let overlap = self.current_tile(attr_id).overlap;
            if overlap == Overlap::None {
                return Ok(buffer_offset);
            }

            match compression {
                Compression::Gzip => {
                    self.fetch_tile_gzip(attr_id)?;
                    self.copy_from_tile_buffer_dense(attr_id, buffer, &mut buffer_offset)?;
                }
                Compression::None => match overlap {
                    Overlap::Full => self.copy_tile_full(attr_id, buffer, &mut buffer_offset)?,
                    Overlap::PartialContig => {
                        self.copy_tile_partial_contig_dense(attr_id, buffer, &mut buffer_offset)?
                    }
                    _ => {
                        self.fetch_tile_plain(attr_id)?;
                        self.copy_from_tile_buffer_partial_non_contig_dense(
                            attr_id,
                            buffer,
                            &mut buffer_offset,
                        )?;
                    }
                },
            }

            if self.cursors[attr_id].overflow {
                return Ok(buffer_offset);
            }
        }
    }

    fn read_dense_attr_var(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_var: &mut [u8],
    ) -> Result<(usize, usize)> {
        if buffer.is_empty() || buffer_var.is_empty() {
            self.cursors[attr_id].overflow = true;
            return Ok((0, 0));
        }
        if self.is_empty_attribute(attr_id) {
            return Ok((0, 0));
        }
        let compression = self.schema.attr_compression(attr_id);
        let mut buffer_offset = 0usize;
        let mut buffer_var_offset = 0usize;

        loop {
            if self.cursors[attr_id].tile_offset < self.cursors[attr_id].tile_size {
                self.copy_from_tile_buffer_dense_var(
                    attr_id,
                    buffer,
                    &mut buffer_offset,
                    buffer_var,
                    &mut buffer_var_offset,
                )?;
            }
            if self.cursors[attr_id].overflow {
                return Ok((buffer_offset, buffer_var_offset));
            }

            if self.cursors[attr_id].overlapping_pos >= self.overlapping_tiles.len() {
                self.next_overlapping_tile_dense()?;
            }

            let overlap = self.current_tile(attr_id).overlap;
            if overlap == Overlap::None {
                return Ok((buffer_offset, buffer_var_offset));
            }

            match compression {
                Compression::Gzip => {
                    self.fetch_tile_var_gzip(attr_id)?;
                    self.copy_from_tile_buffer_dense_var(
                        attr_id,
                        buffer,
                        &mut buffer_offset,
                        buffer_var,
                        &mut buffer_var_offset,
                    )?;
                }
                Compression::None => match overlap {
                    Overlap::Full => self.copy_tile_full_var(
                        attr_id,
                        buffer,
                        &mut buffer_offset,
                        buffer_var,
                        &mut buffer_var_offset,
                    )?,
                    _ => {
                        self.fetch_tile_var_plain(attr_id)?;
                        self.copy_from_tile_buffer_dense_var(
                            attr_id,
                            buffer,
                            &mut buffer_offset,
                            buffer_var,
                            &mut buffer_var_offset,
                        )?;
                    }
                },
            }

            if self.cursors[attr_id].overflow {
                return Ok((buffer_offset, buffer_var_offset));
            }
        }
    }

    fn copy_from_tile_buffer_dense(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_offset: &mut usize,
    ) -> Result<()> {
        match self.current_tile(attr_id).overlap {
            Overlap::Full => self.copy_from_tile_buffer_full(attr_id, buffer, buffer_offset),
            Overlap::PartialContig => {
                self.copy_from_tile_buffer_partial_contig_dense(attr_id, buffer, buffer_offset)
            }
            Overlap::PartialNonContig => self.copy_from_tile_buffer_partial_non_contig_dense(
                attr_id,
                buffer,
                buffer_offset,
            ),
            Overlap::None => Ok(()),
        }
    }

    fn copy_from_tile_buffer_dense_var(
        &mut self,
        attr_id: usize,
        buffer: &mut [u8],
        buffer_offset: &mut usize,
        buffer_var: &mut [u8],
        buffer_var_offset: &mut usize,
    ) -> Result<()> {
        match self.current_tile(attr_id).overlap {
            Overlap::Full => self.copy_from_tile_buffer_full_var(
                attr_id,
                buffer,
                buffer_offset,
                buffer_var,
                buffer_var_offset,
            ),
            Overlap::PartialContig => self.copy_from_tile_buffer_partial_contig_dense_var(
                attr_id,
                buffer,
                buffer_offset,
                buffer_var,
                buffer_var_offset,
            ),
            Overlap::PartialNonContig => self
                .copy_from_tile_buffer_partial_non_contig_dense_var(
                    attr_id,
                    buffer,
                    buffer_offset,
                    buffer_var,
                    buffer_var_offset,
                ),
            Overlap::None => Ok(()),
        }
    }
}

// ============================================================================
// Public reader handle
// ============================================================================

enum Inner<'a> {
    I32(ReadState<'a, i32>),
    I64(ReadState<'a, i64>),
    F32(ReadState<'a, f32>),
    F64(ReadState<'a, f64>),
}

/// Read cursor over one fragment.
///
/// Coordinate-type dispatch happens once, here; everything below is
/// generic over the element type.
pub struct FragmentReader<'a> {
    inner: Inner<'a>,
    mode: ReadMode,
    buffer_slots: usize,
}

impl<'a> FragmentReader<'a> {
    /// Open a reader with the backend implied by the build (`mmap`
    /// feature); see [`IoBackend::default`].
    pub fn new(
        schema: &'a ArraySchema,
        bookkeeping: &'a Bookkeeping,
        fragment_dir: &Path,
        query: &CoordValues,
        attribute_ids: Vec<usize>,
        mode: ReadMode,
    ) -> Result<Self> {
        Self::with_backend(
            schema,
            bookkeeping,
            fragment_dir,
            query,
            attribute_ids,
            mode,
            IoBackend::default(),
        )
    }

    pub fn with_backend(
        schema: &'a ArraySchema,
        bookkeeping: &'a Bookkeeping,
        fragment_dir: &Path,
        query: &CoordValues,
        attribute_ids: Vec<usize>,
        mode: ReadMode,
        backend: IoBackend,
    ) -> Result<Self> {
        if query.datatype() != schema.coord_datatype() {
            return Err(LatticaError::CoordTypeMismatch {
                expected: schema.coord_datatype().name(),
                actual: query.datatype().name(),
            });
        }
        if query.len() != 2 * schema.dim_num() {
            return Err(LatticaError::InvalidQuery(format!(
                "query holds {} values, expected {}",
                query.len(),
                2 * schema.dim_num()
            )));
        }
        if attribute_ids.is_empty() {
            return Err(LatticaError::InvalidQuery("no attributes selected".into()));
        }
        let mut buffer_slots = 0;
        for &id in &attribute_ids {
            if id > schema.attribute_num() {
                return Err(LatticaError::InvalidQuery(format!("attribute id {id} out of range")));
            }
            if id == schema.attribute_num() && schema.is_dense() {
                return Err(LatticaError::InvalidQuery(
                    "dense fragments store no explicit coordinates".into(),
                ));
            }
            buffer_slots += if schema.attr_is_var(id) { 2 } else { 1 };
        }

        let dir = fragment_dir.to_path_buf();
        let inner = match schema.coord_datatype() {
            CoordDatatype::Int32 => Inner::I32(ReadState::new_grid(
                schema,
                bookkeeping,
                dir,
                query.typed::<i32>()?.to_vec(),
                attribute_ids,
                backend,
            )?),
            CoordDatatype::Int64 => Inner::I64(ReadState::new_grid(
                schema,
                bookkeeping,
                dir,
                query.typed::<i64>()?.to_vec(),
                attribute_ids,
                backend,
            )?),
            CoordDatatype::Float32 => Inner::F32(ReadState::new_sparse(
                schema,
                bookkeeping,
                dir,
                query.typed::<f32>()?.to_vec(),
                attribute_ids,
                backend,
            )?),
            CoordDatatype::Float64 => Inner::F64(ReadState::new_sparse(
                schema,
                bookkeeping,
                dir,
                query.typed::<f64>()?.to_vec(),
                attribute_ids,
                backend,
            )?),
        };
        Ok(Self { inner, mode, buffer_slots })
    }

    /// Materialize the next chunk of the query result.
    ///
    /// `buffers` supplies one byte slice per fixed attribute and two per
    /// variable attribute (offsets, then payload), in selection order;
    /// `sizes` receives the bytes written into each. A size smaller than
    /// the supplied capacity with [`overflow`](Self::overflow) set means
    /// the attribute paused mid-tile; call again with fresh buffers.
    pub fn read(&mut self, buffers: &mut [&mut [u8]], sizes: &mut [usize]) -> Result<()> {
        if buffers.len() != self.buffer_slots || sizes.len() != self.buffer_slots {
            return Err(LatticaError::InvalidQuery(format!(
                "expected {} buffer slots, got {}",
                self.buffer_slots,
                buffers.len()
            )));
        }
        match self.inner {
            Inner::I32(ref mut rs) => rs.reset_overflow(),
            Inner::I64(ref mut rs) => rs.reset_overflow(),
            Inner::F32(ref mut rs) => rs.reset_overflow(),
            Inner::F64(ref mut rs) => rs.reset_overflow(),
        }
        match self.mode {
            ReadMode::Read => {}
            ReadMode::ReadReverse => {
                sizes.iter_mut().for_each(|s| *s = 0);
                return Ok(());
            }
        }
        match self.inner {
            Inner::I32(ref mut rs) => rs.read(buffers, sizes),
            Inner::I64(ref mut rs) => rs.read(buffers, sizes),
            Inner::F32(ref mut rs) => rs.read_sparse(buffers, sizes),
            Inner::F64(ref mut rs) => rs.read_sparse(buffers, sizes),
        }
    }

    /// Whether the last `read` paused this attribute for lack of buffer
    /// space.
    pub fn overflow(&self, attr_id: usize) -> bool {
        match self.inner {
            Inner::I32(ref rs) => rs.overflow(attr_id),
            Inner::I64(ref rs) => rs.overflow(attr_id),
            Inner::F32(ref rs) => rs.overflow(attr_id),
            Inner::F64(ref rs) => rs.overflow(attr_id),
        }
    }
}
