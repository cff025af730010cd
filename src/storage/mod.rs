//! Storage module - tiled fragment storage
//!
//! This module provides the core fragment storage format for Lattica.
//! A fragment is an immutable directory holding one file per attribute,
//! partitioned into fixed-capacity tiles; the read state materializes
//! query sub-ranges from it on demand.

pub mod bookkeeping;
pub mod codec;
pub mod hilbert;
pub mod io;
pub mod read_state;
pub mod schema;

// Re-export all public types from the fragment read path
pub use bookkeeping::Bookkeeping;
pub use io::IoBackend;
pub use read_state::{FragmentReader, ReadMode};
pub use schema::{
    ArraySchema, AttributeDef, CellOrder, Compression, CoordDatatype, CoordValues,
};
