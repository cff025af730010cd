//! Tile compression codec (gzip).
//!
//! Tiles are compressed as independent gzip streams, one per tile, so a
//! single tile can be fetched and inflated without touching its
//! neighbors. Decompression targets a caller-sized buffer and the output
//! length is verified against the expected tile size by the fetch layer.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;

use crate::{LatticaError, Result};

/// Compress one tile into a fresh gzip stream.
pub fn gzip_compress(src: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
    encoder.write_all(src)?;
    Ok(encoder.finish()?)
}

/// Inflate one gzip stream into `dst`, returning the decompressed length.
/// Fails if the stream holds more bytes than `dst` can take.
pub fn gzip_decompress_into(src: &[u8], dst: &mut [u8]) -> Result<usize> {
    let mut decoder = GzDecoder::new(src);
    let mut out_len = 0usize;
    loop {
        let n = decoder
            .read(&mut dst[out_len..])
            .map_err(|e| LatticaError::Decompression(e.to_string()))?;
        if n == 0 {
            break;
        }
        out_len += n;
        if out_len == dst.len() {
            // Confirm the stream is exhausted.
            let mut probe = [0u8; 1];
            let extra = decoder
                .read(&mut probe)
                .map_err(|e| LatticaError::Decompression(e.to_string()))?;
            if extra != 0 {
                return Err(LatticaError::Decompression(
                    "gzip stream larger than tile buffer".into(),
                ));
            }
            break;
        }
    }
    Ok(out_len)
}
