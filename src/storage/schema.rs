//! Array schema and coordinate-space geometry.
//!
//! The schema is the read path's oracle: it reports the shape of the array
//! (dimensions, domain, tile extents, cell order, attribute layout) and
//! answers the geometric questions the tile locator and copy engine ask:
//! which cell position a coordinate tuple maps to inside a tile, how a
//! query range intersects a tile or an MBR, and how large the contiguous
//! slabs of an intersection are.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::storage::hilbert;
use crate::{LatticaError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Size in bytes of one variable-cell offset as stored in the fixed file.
pub const VAR_OFFSET_SIZE: usize = 8;

/// Suffix of every attribute data file inside a fragment directory.
pub const ATTR_FILE_SUFFIX: &str = ".lat";

/// Infix marking the payload file of a variable-sized attribute.
pub const VAR_FILE_INFIX: &str = "_var";

/// Name of the coordinates pseudo-attribute.
pub const COORDS_ATTR_NAME: &str = "__coords";

// ============================================================================
// Data Types
// ============================================================================

/// Coordinate element type of the array domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordDatatype {
    Int32,
    Int64,
    Float32,
    Float64,
}

impl CoordDatatype {
    pub fn size(&self) -> usize {
        match self {
            CoordDatatype::Int32 | CoordDatatype::Float32 => 4,
            CoordDatatype::Int64 | CoordDatatype::Float64 => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CoordDatatype::Int32 => "int32",
            CoordDatatype::Int64 => "int64",
            CoordDatatype::Float32 => "float32",
            CoordDatatype::Float64 => "float64",
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, CoordDatatype::Int32 | CoordDatatype::Int64)
    }
}

/// Traversal order of cells within a tile (and of tiles within a fragment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellOrder {
    RowMajor,
    ColMajor,
    Hilbert,
}

/// Per-attribute compression of tile payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    None,
    Gzip,
}

/// How a tile (or MBR) intersects the query range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    /// No intersection; for the locator this is also the end-of-tiles marker.
    None,
    /// The whole tile qualifies.
    Full,
    /// The qualifying cells form one contiguous run in the cell order.
    PartialContig,
    /// The qualifying cells form multiple runs.
    PartialNonContig,
}

/// Typed storage for a flat list of coordinate values (domain bounds,
/// tile extents, query ranges, MBRs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoordValues {
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

impl CoordValues {
    pub fn datatype(&self) -> CoordDatatype {
        match self {
            CoordValues::Int32(_) => CoordDatatype::Int32,
            CoordValues::Int64(_) => CoordDatatype::Int64,
            CoordValues::Float32(_) => CoordDatatype::Float32,
            CoordValues::Float64(_) => CoordDatatype::Float64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CoordValues::Int32(v) => v.len(),
            CoordValues::Int64(v) => v.len(),
            CoordValues::Float32(v) => v.len(),
            CoordValues::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn typed<T: Coordinate>(&self) -> Result<&[T]> {
        T::from_values(self).ok_or(LatticaError::CoordTypeMismatch {
            expected: T::DATATYPE.name(),
            actual: self.datatype().name(),
        })
    }
}

/// A coordinate element type usable in sparse fragments: comparisons and
/// raw encoding, no grid arithmetic.
pub trait Coordinate: Copy + PartialOrd + std::fmt::Debug + 'static {
    const DATATYPE: CoordDatatype;

    fn from_values(values: &CoordValues) -> Option<&[Self]>;

    /// Decode one value from its little-endian on-disk form.
    fn read_le(src: &[u8]) -> Self;

    /// Non-negative Hilbert bucket relative to the domain origin.
    /// `None` for real-valued coordinates (Hilbert order is integer-only).
    fn hilbert_bucket(self, origin: Self) -> Option<u64>;
}

/// A coordinate element type usable in dense fragments: adds the grid
/// arithmetic behind tile clipping and cell positions.
pub trait GridCoordinate: Coordinate {
    fn as_i64(self) -> i64;
    fn from_i64(v: i64) -> Self;
}

macro_rules! impl_int_coordinate {
    ($t:ty, $dtype:expr, $variant:ident) => {
        impl Coordinate for $t {
            const DATATYPE: CoordDatatype = $dtype;

            fn from_values(values: &CoordValues) -> Option<&[Self]> {
                match values {
                    CoordValues::$variant(v) => Some(v.as_slice()),
                    _ => None,
                }
            }

            fn read_le(src: &[u8]) -> Self {
                let mut b = [0u8; std::mem::size_of::<$t>()];
                b.copy_from_slice(&src[..std::mem::size_of::<$t>()]);
                <$t>::from_le_bytes(b)
            }

            fn hilbert_bucket(self, origin: Self) -> Option<u64> {
                Some((self as i64).wrapping_sub(origin as i64) as u64)
            }
        }

        impl GridCoordinate for $t {
            fn as_i64(self) -> i64 {
                self as i64
            }

            fn from_i64(v: i64) -> Self {
                v as $t
            }
        }
    };
}

macro_rules! impl_float_coordinate {
    ($t:ty, $dtype:expr, $variant:ident) => {
        impl Coordinate for $t {
            const DATATYPE: CoordDatatype = $dtype;

            fn from_values(values: &CoordValues) -> Option<&[Self]> {
                match values {
                    CoordValues::$variant(v) => Some(v.as_slice()),
                    _ => None,
                }
            }

            fn read_le(src: &[u8]) -> Self {
                let mut b = [0u8; std::mem::size_of::<$t>()];
                b.copy_from_slice(&src[..std::mem::size_of::<$t>()]);
                <$t>::from_le_bytes(b)
            }

            fn hilbert_bucket(self, _origin: Self) -> Option<u64> {
                None
            }
        }
    };
}

impl_int_coordinate!(i32, CoordDatatype::Int32, Int32);
impl_int_coordinate!(i64, CoordDatatype::Int64, Int64);
impl_float_coordinate!(f32, CoordDatatype::Float32, Float32);
impl_float_coordinate!(f64, CoordDatatype::Float64, Float64);

// ============================================================================
// Attribute definitions
// ============================================================================

/// Attribute definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDef {
    pub name: String,
    /// Bytes per cell for fixed-sized attributes; unused for variable ones.
    pub cell_size: usize,
    pub var_size: bool,
    pub compression: Compression,
}

impl AttributeDef {
    pub fn fixed(name: &str, cell_size: usize, compression: Compression) -> Self {
        Self { name: name.to_string(), cell_size, var_size: false, compression }
    }

    pub fn var(name: &str, compression: Compression) -> Self {
        Self { name: name.to_string(), cell_size: 0, var_size: true, compression }
    }

    /// Bytes per cell in the attribute's fixed file. For a variable
    /// attribute the fixed file holds one u64 offset per cell.
    pub fn fixed_cell_size(&self) -> usize {
        if self.var_size {
            VAR_OFFSET_SIZE
        } else {
            self.cell_size
        }
    }
}

// ============================================================================
// Array schema
// ============================================================================

/// Schema of a multi-dimensional array.
///
/// Attribute ids `0..attribute_num()` address the user attributes;
/// id `attribute_num()` addresses the coordinates pseudo-attribute
/// (meaningful for sparse arrays, whose fragments store explicit
/// coordinates).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArraySchema {
    dim_names: Vec<String>,
    domain: CoordValues,
    tile_extents: Option<CoordValues>,
    cell_order: CellOrder,
    capacity: i64,
    dense: bool,
    attributes: Vec<AttributeDef>,
    coords_compression: Compression,
}

impl ArraySchema {
    /// Define a dense array. The tile extents partition the domain into a
    /// rectangular grid of tiles; coordinates are implicit.
    pub fn dense(
        dim_names: Vec<String>,
        domain: CoordValues,
        tile_extents: CoordValues,
        cell_order: CellOrder,
        attributes: Vec<AttributeDef>,
    ) -> Result<Self> {
        let schema = Self {
            dim_names,
            domain,
            tile_extents: Some(tile_extents),
            cell_order,
            capacity: 0,
            dense: true,
            attributes,
            coords_compression: Compression::None,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Define a sparse array. Tiles hold up to `capacity` explicitly
    /// addressed cells in the fragment's cell order.
    pub fn sparse(
        dim_names: Vec<String>,
        domain: CoordValues,
        cell_order: CellOrder,
        capacity: i64,
        attributes: Vec<AttributeDef>,
        coords_compression: Compression,
    ) -> Result<Self> {
        let schema = Self {
            dim_names,
            domain,
            tile_extents: None,
            cell_order,
            capacity,
            dense: false,
            attributes,
            coords_compression,
        };
        schema.validate()?;
        Ok(schema)
    }

    fn validate(&self) -> Result<()> {
        let dim_num = self.dim_names.len();
        if dim_num == 0 {
            return Err(LatticaError::InvalidSchema("no dimensions".into()));
        }
        if self.domain.len() != 2 * dim_num {
            return Err(LatticaError::InvalidSchema(format!(
                "domain holds {} values, expected {}",
                self.domain.len(),
                2 * dim_num
            )));
        }
        if self.attributes.is_empty() {
            return Err(LatticaError::InvalidSchema("no attributes".into()));
        }
        for (i, a) in self.attributes.iter().enumerate() {
            if a.name.is_empty() || a.name == COORDS_ATTR_NAME {
                return Err(LatticaError::InvalidSchema(format!("bad attribute name at {i}")));
            }
            if !a.var_size && a.cell_size == 0 {
                return Err(LatticaError::InvalidSchema(format!(
                    "fixed attribute '{}' has zero cell size",
                    a.name
                )));
            }
        }
        if self.dense {
            if !self.coord_datatype().is_integer() {
                return Err(LatticaError::InvalidSchema(
                    "dense arrays require integer coordinates".into(),
                ));
            }
            if self.cell_order == CellOrder::Hilbert {
                return Err(LatticaError::InvalidSchema(
                    "dense arrays support row- or column-major cell order only".into(),
                ));
            }
            let extents = self
                .tile_extents
                .as_ref()
                .ok_or_else(|| LatticaError::InvalidSchema("dense array without tile extents".into()))?;
            if extents.len() != dim_num {
                return Err(LatticaError::InvalidSchema("tile extents do not match dimensions".into()));
            }
            if extents.datatype() != self.domain.datatype() {
                return Err(LatticaError::InvalidSchema(
                    "tile extent type differs from domain type".into(),
                ));
            }
        } else {
            if self.capacity <= 0 {
                return Err(LatticaError::InvalidSchema("sparse capacity must be positive".into()));
            }
            if self.cell_order == CellOrder::Hilbert && !self.coord_datatype().is_integer() {
                return Err(LatticaError::InvalidSchema(
                    "Hilbert cell order requires integer coordinates".into(),
                ));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Plain accessors
    // ------------------------------------------------------------------

    pub fn dim_num(&self) -> usize {
        self.dim_names.len()
    }

    pub fn is_dense(&self) -> bool {
        self.dense
    }

    pub fn cell_order(&self) -> CellOrder {
        self.cell_order
    }

    pub fn coord_datatype(&self) -> CoordDatatype {
        self.domain.datatype()
    }

    pub fn domain(&self) -> &CoordValues {
        &self.domain
    }

    pub fn attribute_num(&self) -> usize {
        self.attributes.len()
    }

    /// Bytes of one coordinate tuple.
    pub fn coords_size(&self) -> usize {
        self.dim_num() * self.coord_datatype().size()
    }

    pub fn attr_name(&self, attr_id: usize) -> &str {
        if attr_id == self.attribute_num() {
            COORDS_ATTR_NAME
        } else {
            &self.attributes[attr_id].name
        }
    }

    pub fn attr_is_var(&self, attr_id: usize) -> bool {
        attr_id < self.attribute_num() && self.attributes[attr_id].var_size
    }

    pub fn attr_compression(&self, attr_id: usize) -> Compression {
        if attr_id == self.attribute_num() {
            self.coords_compression
        } else {
            self.attributes[attr_id].compression
        }
    }

    /// Bytes per cell of the attribute's fixed file (offset cells for
    /// variable attributes, coordinate tuples for the coordinates slot).
    pub fn cell_size(&self, attr_id: usize) -> usize {
        if attr_id == self.attribute_num() {
            self.coords_size()
        } else {
            self.attributes[attr_id].fixed_cell_size()
        }
    }

    pub fn attribute_id(&self, name: &str) -> Result<usize> {
        if name == COORDS_ATTR_NAME {
            return Ok(self.attribute_num());
        }
        self.attributes
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| LatticaError::AttributeNotFound(name.to_string()))
    }

    /// Cells per (full) tile.
    pub fn cell_num_per_tile(&self) -> i64 {
        if self.dense {
            match self.tile_extents.as_ref() {
                Some(CoordValues::Int32(e)) => e.iter().map(|&x| x as i64).product(),
                Some(CoordValues::Int64(e)) => e.iter().product(),
                _ => 0,
            }
        } else {
            self.capacity
        }
    }

    /// Bytes of a full tile in the attribute's fixed file.
    pub fn tile_size(&self, attr_id: usize) -> usize {
        self.cell_num_per_tile() as usize * self.cell_size(attr_id)
    }

    pub(crate) fn typed_domain<T: Coordinate>(&self) -> Result<&[T]> {
        self.domain.typed::<T>()
    }

    pub(crate) fn typed_extents<T: Coordinate>(&self) -> Result<&[T]> {
        self.tile_extents
            .as_ref()
            .ok_or_else(|| LatticaError::InvalidSchema("sparse array has no tile extents".into()))?
            .typed::<T>()
    }

    // ------------------------------------------------------------------
    // Dense grid geometry
    // ------------------------------------------------------------------

    /// Number of tiles along each dimension of the (dense) tile domain.
    pub(crate) fn tile_counts<T: GridCoordinate>(&self) -> Result<Vec<i64>> {
        let domain = self.typed_domain::<T>()?;
        let extents = self.typed_extents::<T>()?;
        let mut counts = Vec::with_capacity(self.dim_num());
        for i in 0..self.dim_num() {
            let span = domain[2 * i + 1].as_i64() - domain[2 * i].as_i64() + 1;
            let ext = extents[i].as_i64();
            counts.push((span + ext - 1) / ext);
        }
        Ok(counts)
    }

    /// Position of a cell inside a tile, given tile-local coordinates.
    pub fn cell_pos<T: GridCoordinate>(&self, coords: &[T]) -> Result<i64> {
        let extents = self.typed_extents::<T>()?;
        let dim_num = self.dim_num();
        let mut pos = 0i64;
        match self.cell_order {
            CellOrder::RowMajor => {
                let mut stride = 1i64;
                for i in (0..dim_num).rev() {
                    pos += coords[i].as_i64() * stride;
                    stride *= extents[i].as_i64();
                }
            }
            CellOrder::ColMajor => {
                let mut stride = 1i64;
                for i in 0..dim_num {
                    pos += coords[i].as_i64() * stride;
                    stride *= extents[i].as_i64();
                }
            }
            CellOrder::Hilbert => {
                return Err(LatticaError::InvalidSchema(
                    "cell positions are undefined for Hilbert order on dense tiles".into(),
                ))
            }
        }
        Ok(pos)
    }

    /// Advance tile coordinates to the next tile inside `range` (flat
    /// lo/hi pairs in tile-domain space), following the cell order.
    pub fn next_tile_coords<T: GridCoordinate>(&self, range: &[T], coords: &mut [T]) {
        let dim_num = self.dim_num();
        match self.cell_order {
            CellOrder::ColMajor => {
                let mut i = 0;
                coords[i] = T::from_i64(coords[i].as_i64() + 1);
                while i < dim_num - 1 && coords[i].as_i64() > range[2 * i + 1].as_i64() {
                    coords[i] = range[2 * i];
                    i += 1;
                    coords[i] = T::from_i64(coords[i].as_i64() + 1);
                }
            }
            // Hilbert is rejected for dense schemas at construction.
            _ => {
                let mut i = dim_num - 1;
                coords[i] = T::from_i64(coords[i].as_i64() + 1);
                while i > 0 && coords[i].as_i64() > range[2 * i + 1].as_i64() {
                    coords[i] = range[2 * i];
                    i -= 1;
                    coords[i] = T::from_i64(coords[i].as_i64() + 1);
                }
            }
        }
    }

    /// Global position of a tile in the fragment's tile order.
    pub fn tile_pos<T: GridCoordinate>(&self, tile_coords: &[T]) -> Result<i64> {
        let counts = self.tile_counts::<T>()?;
        let dim_num = self.dim_num();
        let mut pos = 0i64;
        match self.cell_order {
            CellOrder::ColMajor => {
                let mut stride = 1i64;
                for i in 0..dim_num {
                    pos += tile_coords[i].as_i64() * stride;
                    stride *= counts[i];
                }
            }
            _ => {
                let mut stride = 1i64;
                for i in (0..dim_num).rev() {
                    pos += tile_coords[i].as_i64() * stride;
                    stride *= counts[i];
                }
            }
        }
        Ok(pos)
    }

    /// Cells in a flat lo/hi range.
    pub fn cell_num_in_range<T: GridCoordinate>(&self, range: &[T]) -> i64 {
        let mut n = 1i64;
        for i in 0..self.dim_num() {
            n *= range[2 * i + 1].as_i64() - range[2 * i].as_i64() + 1;
        }
        n
    }

    /// Cells in one contiguous slab of the overlap range: its extent in
    /// the fastest-varying dimension.
    pub fn cell_num_in_range_slab<T: GridCoordinate>(&self, range: &[T]) -> i64 {
        let i = match self.cell_order {
            CellOrder::ColMajor => 0,
            _ => self.dim_num() - 1,
        };
        range[2 * i + 1].as_i64() - range[2 * i].as_i64() + 1
    }

    /// Cells in one full tile slab: the tile extent in the fastest-varying
    /// dimension.
    pub fn cell_num_in_tile_slab<T: GridCoordinate>(&self) -> Result<i64> {
        let extents = self.typed_extents::<T>()?;
        let i = match self.cell_order {
            CellOrder::ColMajor => 0,
            _ => self.dim_num() - 1,
        };
        Ok(extents[i].as_i64())
    }

    /// Intersect the query range with the tile at `tile_coords` (tile
    /// domain). Returns the overlap as tile-local lo/hi cell coordinates
    /// and its classification.
    pub fn compute_tile_range_overlap<T: GridCoordinate>(
        &self,
        query: &[T],
        tile_coords: &[T],
    ) -> Result<(Vec<T>, Overlap)> {
        let domain = self.typed_domain::<T>()?;
        let extents = self.typed_extents::<T>()?;
        let dim_num = self.dim_num();
        let mut overlap_range = vec![T::from_i64(0); 2 * dim_num];

        for i in 0..dim_num {
            let ext = extents[i].as_i64();
            let tile_lo = domain[2 * i].as_i64() + tile_coords[i].as_i64() * ext;
            let tile_hi = tile_lo + ext - 1;
            let q_lo = query[2 * i].as_i64();
            let q_hi = query[2 * i + 1].as_i64();
            if q_lo > tile_hi || q_hi < tile_lo {
                return Ok((overlap_range, Overlap::None));
            }
            overlap_range[2 * i] = T::from_i64(q_lo.max(tile_lo) - tile_lo);
            overlap_range[2 * i + 1] = T::from_i64(q_hi.min(tile_hi) - tile_lo);
        }

        let full = (0..dim_num).all(|i| {
            overlap_range[2 * i].as_i64() == 0
                && overlap_range[2 * i + 1].as_i64() == extents[i].as_i64() - 1
        });
        if full {
            return Ok((overlap_range, Overlap::Full));
        }

        let full_in = |i: usize| {
            overlap_range[2 * i].as_i64() == 0
                && overlap_range[2 * i + 1].as_i64() == extents[i].as_i64() - 1
        };
        let contig = match self.cell_order {
            CellOrder::RowMajor => (1..dim_num).all(full_in),
            CellOrder::ColMajor => (0..dim_num - 1).all(full_in),
            CellOrder::Hilbert => false,
        };
        let kind = if contig { Overlap::PartialContig } else { Overlap::PartialNonContig };
        Ok((overlap_range, kind))
    }

    // ------------------------------------------------------------------
    // Sparse geometry
    // ------------------------------------------------------------------

    /// Intersect the query range with a sparse tile's MBR. Returns the
    /// overlap in absolute coordinates and its classification.
    pub fn compute_mbr_range_overlap<T: Coordinate>(
        &self,
        query: &[T],
        mbr: &[T],
    ) -> (Vec<T>, Overlap) {
        let dim_num = self.dim_num();
        let mut overlap_range = Vec::with_capacity(2 * dim_num);

        for i in 0..dim_num {
            if gt(query[2 * i], mbr[2 * i + 1]) || lt(query[2 * i + 1], mbr[2 * i]) {
                overlap_range.clear();
                overlap_range.resize(2 * dim_num, mbr[0]);
                return (overlap_range, Overlap::None);
            }
            overlap_range.push(max_c(query[2 * i], mbr[2 * i]));
            overlap_range.push(min_c(query[2 * i + 1], mbr[2 * i + 1]));
        }

        let full_in = |i: usize| {
            eq(overlap_range[2 * i], mbr[2 * i]) && eq(overlap_range[2 * i + 1], mbr[2 * i + 1])
        };
        if (0..dim_num).all(full_in) {
            return (overlap_range, Overlap::Full);
        }
        let contig = match self.cell_order {
            CellOrder::RowMajor => (1..dim_num).all(full_in),
            CellOrder::ColMajor => (0..dim_num - 1).all(full_in),
            CellOrder::Hilbert => false,
        };
        let kind = if contig { Overlap::PartialContig } else { Overlap::PartialNonContig };
        (overlap_range, kind)
    }

    /// Hilbert curve index of an absolute coordinate tuple.
    pub fn hilbert_id<T: Coordinate>(&self, coords: &[T]) -> Result<u64> {
        let domain = self.typed_domain::<T>()?;
        let dim_num = self.dim_num();
        let mut buckets = Vec::with_capacity(dim_num);
        for i in 0..dim_num {
            let b = coords[i].hilbert_bucket(domain[2 * i]).ok_or_else(|| {
                LatticaError::InvalidSchema(
                    "Hilbert order requires integer coordinates".into(),
                )
            })?;
            buckets.push(b);
        }
        Ok(hilbert::hilbert_index(&buckets))
    }
}

// ============================================================================
// Order comparators and range predicates
// ============================================================================

#[inline]
fn cmp_c<T: Coordinate>(a: T, b: T) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

#[inline]
fn lt<T: Coordinate>(a: T, b: T) -> bool {
    cmp_c(a, b) == Ordering::Less
}

#[inline]
fn gt<T: Coordinate>(a: T, b: T) -> bool {
    cmp_c(a, b) == Ordering::Greater
}

#[inline]
fn eq<T: Coordinate>(a: T, b: T) -> bool {
    cmp_c(a, b) == Ordering::Equal
}

#[inline]
fn min_c<T: Coordinate>(a: T, b: T) -> T {
    if lt(b, a) {
        b
    } else {
        a
    }
}

#[inline]
fn max_c<T: Coordinate>(a: T, b: T) -> T {
    if gt(b, a) {
        b
    } else {
        a
    }
}

/// Row-major (lexicographic) comparison of two coordinate tuples.
pub fn cmp_row_order<T: Coordinate>(a: &[T], b: &[T]) -> Ordering {
    for i in 0..a.len() {
        match cmp_c(a[i], b[i]) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Column-major comparison: the last dimension is the most significant.
pub fn cmp_col_order<T: Coordinate>(a: &[T], b: &[T]) -> Ordering {
    for i in (0..a.len()).rev() {
        match cmp_c(a[i], b[i]) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Hilbert comparison: by curve index, row-order coordinates as tiebreak.
pub fn cmp_hilbert_order<T: Coordinate>(id_a: u64, a: &[T], id_b: u64, b: &[T]) -> Ordering {
    id_a.cmp(&id_b).then_with(|| cmp_row_order(a, b))
}

/// Whether a cell lies inside a flat lo/hi range.
pub fn cell_in_range<T: Coordinate>(cell: &[T], range: &[T]) -> bool {
    for i in 0..cell.len() {
        if lt(cell[i], range[2 * i]) || gt(cell[i], range[2 * i + 1]) {
            return false;
        }
    }
    true
}

/// Whether a flat lo/hi range addresses a single cell.
pub fn is_unary_range<T: Coordinate>(range: &[T]) -> bool {
    let dim_num = range.len() / 2;
    (0..dim_num).all(|i| eq(range[2 * i], range[2 * i + 1]))
}
