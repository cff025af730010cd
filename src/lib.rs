//! Lattica Core Storage Engine
//!
//! An embedded multi-dimensional array storage engine implemented in Rust.
//! This crate covers the read path: materializing rectangular sub-regions
//! of a persisted array fragment into caller-provided output buffers.

pub mod storage;

// Re-export main types
pub use storage::bookkeeping::Bookkeeping;
pub use storage::io::IoBackend;
pub use storage::read_state::{FragmentReader, ReadMode};
pub use storage::schema::{
    ArraySchema, AttributeDef, CellOrder, Compression, CoordDatatype, CoordValues,
};

/// Storage engine error type
#[derive(Debug, thiserror::Error)]
pub enum LatticaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Attribute not found: {0}")]
    AttributeNotFound(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid query range: {0}")]
    InvalidQuery(String),

    #[error("Coordinate type mismatch: expected {expected}, got {actual}")]
    CoordTypeMismatch { expected: &'static str, actual: &'static str },

    #[error("Unsupported read mode")]
    UnsupportedMode,

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Decompressed tile size mismatch: expected {expected}, got {actual}")]
    TileSizeMismatch { expected: usize, actual: usize },

    #[error("Short read: wanted {wanted} bytes at offset {offset}, file holds {available}")]
    ShortRead { wanted: usize, offset: u64, available: u64 },

    #[error("Bookkeeping is inconsistent: {0}")]
    Bookkeeping(String),
}

pub type Result<T> = std::result::Result<T, LatticaError>;
