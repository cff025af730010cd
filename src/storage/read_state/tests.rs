use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::{FragmentReader, Inner, ReadMode};
use crate::storage::bookkeeping::Bookkeeping;
use crate::storage::codec::gzip_compress;
use crate::storage::io::IoBackend;
use crate::storage::schema::{
    ArraySchema, AttributeDef, CellOrder, Compression, CoordValues,
};

// ========================================================================
// Fixtures
// ========================================================================

fn le_i32(vals: &[i32]) -> Vec<u8> {
    vals.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn le_u64(vals: &[u64]) -> Vec<u8> {
    vals.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn fragment_dir(tmp: &TempDir) -> PathBuf {
    let dir = tmp.path().join("frag_0");
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_attr_file(dir: &Path, name: &str, bytes: &[u8]) {
    std::fs::write(dir.join(format!("{name}.lat")), bytes).unwrap();
}

/// 4x4 dense array, 2x2 tiles, row-major, one int32 attribute `a` where
/// cell (r, c) stores `4r + c`. Tiles are laid out in tile order.
fn dense_4x4_schema(compression: Compression) -> ArraySchema {
    ArraySchema::dense(
        vec!["rows".into(), "cols".into()],
        CoordValues::Int32(vec![0, 3, 0, 3]),
        CoordValues::Int32(vec![2, 2]),
        CellOrder::RowMajor,
        vec![AttributeDef::fixed("a", 4, compression)],
    )
    .unwrap()
}

fn dense_4x4_tiles() -> Vec<Vec<i32>> {
    let mut tiles = Vec::new();
    for tr in 0..2 {
        for tc in 0..2 {
            let mut cells = Vec::new();
            for i in 0..2 {
                for j in 0..2 {
                    cells.push((2 * tr + i) * 4 + (2 * tc + j));
                }
            }
            tiles.push(cells);
        }
    }
    tiles
}

fn write_dense_4x4(dir: &Path, compression: Compression) -> Bookkeeping {
    let mut bk = Bookkeeping::new(1, 4, 4);
    let mut file = Vec::new();
    let mut offsets = Vec::new();
    for tile in dense_4x4_tiles() {
        let bytes = le_i32(&tile);
        match compression {
            Compression::None => file.extend_from_slice(&bytes),
            Compression::Gzip => {
                offsets.push(file.len() as u64);
                file.extend_from_slice(&gzip_compress(&bytes).unwrap());
            }
        }
    }
    write_attr_file(dir, "a", &file);
    if compression == Compression::Gzip {
        bk.set_tile_offsets(0, offsets);
    }
    bk
}

/// 2x2 dense array in one 2x2 tile, one variable string attribute `s`
/// holding "a", "bb", "ccc", "dddd" in row-major order.
fn dense_var_schema(compression: Compression) -> ArraySchema {
    ArraySchema::dense(
        vec!["rows".into(), "cols".into()],
        CoordValues::Int32(vec![0, 1, 0, 1]),
        CoordValues::Int32(vec![2, 2]),
        CellOrder::RowMajor,
        vec![AttributeDef::var("s", compression)],
    )
    .unwrap()
}

fn write_dense_var(dir: &Path, compression: Compression) -> Bookkeeping {
    let offsets = le_u64(&[0, 1, 3, 6]);
    let payload = b"abbcccdddd";
    let mut bk = Bookkeeping::new(1, 1, 4);
    match compression {
        Compression::None => {
            write_attr_file(dir, "s", &offsets);
            write_attr_file(dir, "s_var", payload);
        }
        Compression::Gzip => {
            write_attr_file(dir, "s", &gzip_compress(&offsets).unwrap());
            write_attr_file(dir, "s_var", &gzip_compress(payload).unwrap());
            bk.set_tile_offsets(0, vec![0]);
            bk.set_tile_var_offsets(0, vec![0]);
            bk.set_tile_var_sizes(0, vec![payload.len() as u64]);
        }
    }
    bk
}

/// 4x4 dense array with a caller-chosen tiling and one variable string
/// attribute `s`: cell (r, c) stores byte value `4r + c` repeated
/// `(4r + c) % 3 + 1` times.
fn dense_var_grid_schema(tile_rows: i32, tile_cols: i32) -> ArraySchema {
    ArraySchema::dense(
        vec!["rows".into(), "cols".into()],
        CoordValues::Int32(vec![0, 3, 0, 3]),
        CoordValues::Int32(vec![tile_rows, tile_cols]),
        CellOrder::RowMajor,
        vec![AttributeDef::var("s", Compression::None)],
    )
    .unwrap()
}

fn var_cell_payload(v: i32) -> Vec<u8> {
    vec![v as u8; (v % 3 + 1) as usize]
}

fn write_dense_var_grid(dir: &Path, tile_rows: i32, tile_cols: i32) -> Bookkeeping {
    let mut offsets_file = Vec::new();
    let mut payload_file = Vec::new();
    for tr in 0..(4 / tile_rows) {
        for tc in 0..(4 / tile_cols) {
            for i in 0..tile_rows {
                for j in 0..tile_cols {
                    let v = (tr * tile_rows + i) * 4 + (tc * tile_cols + j);
                    offsets_file.extend_from_slice(&(payload_file.len() as u64).to_le_bytes());
                    payload_file.extend_from_slice(&var_cell_payload(v));
                }
            }
        }
    }
    write_attr_file(dir, "s", &offsets_file);
    write_attr_file(dir, "s_var", &payload_file);
    let tile_num = (4 / tile_rows) as i64 * (4 / tile_cols) as i64;
    Bookkeeping::new(1, tile_num, (tile_rows * tile_cols) as i64)
}

/// Offsets and payload bytes that emitting `cells` into one call yields.
fn expected_var_output(cells: &[i32]) -> (Vec<u8>, Vec<u8>) {
    let mut offsets = Vec::new();
    let mut payload = Vec::new();
    for &v in cells {
        offsets.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        payload.extend_from_slice(&var_cell_payload(v));
    }
    (offsets, payload)
}

/// Sparse 3x3 array, capacity 4, row-major: cells (0,0), (0,2), (2,0),
/// (2,2) with int32 attribute `v` = 10, 20, 30, 40.
fn sparse_corners_schema() -> ArraySchema {
    ArraySchema::sparse(
        vec!["x".into(), "y".into()],
        CoordValues::Int32(vec![0, 2, 0, 2]),
        CellOrder::RowMajor,
        4,
        vec![AttributeDef::fixed("v", 4, Compression::None)],
        Compression::None,
    )
    .unwrap()
}

fn write_sparse_corners(dir: &Path) -> Bookkeeping {
    write_attr_file(dir, "v", &le_i32(&[10, 20, 30, 40]));
    write_attr_file(dir, "__coords", &le_i32(&[0, 0, 0, 2, 2, 0, 2, 2]));
    let mut bk = Bookkeeping::new(1, 1, 4);
    bk.push_mbr(CoordValues::Int32(vec![0, 2, 0, 2]));
    bk.push_bounding_coords(CoordValues::Int32(vec![0, 0, 2, 2]));
    bk
}

// ========================================================================
// Read helpers
// ========================================================================

fn read_once(reader: &mut FragmentReader<'_>, caps: &[usize]) -> Vec<Vec<u8>> {
    let mut bufs: Vec<Vec<u8>> = caps.iter().map(|&c| vec![0u8; c]).collect();
    let mut slices: Vec<&mut [u8]> = bufs.iter_mut().map(|b| b.as_mut_slice()).collect();
    let mut sizes = vec![0usize; caps.len()];
    reader.read(&mut slices, &mut sizes).unwrap();
    bufs.iter().zip(sizes).map(|(b, n)| b[..n].to_vec()).collect()
}

/// Repeated reads with fixed-capacity buffers until a call produces no
/// bytes; returns the concatenation per buffer slot.
fn drain(reader: &mut FragmentReader<'_>, caps: &[usize]) -> Vec<Vec<u8>> {
    let mut out: Vec<Vec<u8>> = vec![Vec::new(); caps.len()];
    for _ in 0..100 {
        let chunks = read_once(reader, caps);
        if chunks.iter().all(|c| c.is_empty()) {
            return out;
        }
        for (acc, c) in out.iter_mut().zip(chunks) {
            acc.extend_from_slice(&c);
        }
    }
    panic!("reader did not terminate");
}

fn min_overlapping_pos(reader: &FragmentReader<'_>) -> usize {
    match &reader.inner {
        Inner::I32(rs) => rs
            .attribute_ids
            .iter()
            .map(|&a| rs.cursors[a].overlapping_pos)
            .min()
            .unwrap(),
        _ => unreachable!("tests use int32 coordinates"),
    }
}

// ========================================================================
// Dense scenarios
// ========================================================================

#[test]
fn dense_full_tile_contained() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = dense_4x4_schema(Compression::None);
    let bk = write_dense_4x4(&dir, Compression::None);

    let query = CoordValues::Int32(vec![0, 1, 0, 1]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();

    let out = read_once(&mut reader, &[16]);
    assert_eq!(out[0], le_i32(&[0, 1, 4, 5]));
    assert!(!reader.overflow(0), "exact fit must not overflow");

    // Query exhausted.
    let out = read_once(&mut reader, &[16]);
    assert!(out[0].is_empty());
}

#[test]
fn dense_partial_slabs_and_chunked_resumption() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = dense_4x4_schema(Compression::None);
    let bk = write_dense_4x4(&dir, Compression::None);

    // Column band over all four tiles; per tile the qualifying cells are
    // one column slab, emitted in tile order.
    let query = CoordValues::Int32(vec![0, 3, 1, 2]);
    let expected = le_i32(&[1, 5, 2, 6, 9, 13, 10, 14]);

    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    let out = read_once(&mut reader, &[64]);
    assert_eq!(out[0], expected);

    // Same query with a half-result buffer: two calls, overflow between.
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    let first = read_once(&mut reader, &[16]);
    assert_eq!(first[0], expected[..16].to_vec());
    assert!(reader.overflow(0));
    let second = read_once(&mut reader, &[16]);
    assert_eq!(second[0], expected[16..].to_vec());
    assert!(!reader.overflow(0));
}

#[test]
fn dense_chunked_matches_single_shot_at_any_granularity() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = dense_4x4_schema(Compression::None);
    let bk = write_dense_4x4(&dir, Compression::None);
    let query = CoordValues::Int32(vec![0, 3, 0, 3]);

    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    let whole = read_once(&mut reader, &[64])[0].clone();
    assert_eq!(whole.len(), 64);

    for cap in [4usize, 8, 12, 20, 28, 64] {
        let mut reader =
            FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
        let chunked = drain(&mut reader, &[cap]);
        assert_eq!(chunked[0], whole, "chunk capacity {cap}");
        assert_eq!(min_overlapping_pos(&reader), 0);
    }
}

#[test]
fn dense_gzip_output_matches_plain() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = dense_4x4_schema(Compression::Gzip);
    let bk = write_dense_4x4(&dir, Compression::Gzip);

    let query = CoordValues::Int32(vec![0, 1, 0, 1]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    assert_eq!(read_once(&mut reader, &[16])[0], le_i32(&[0, 1, 4, 5]));

    // Chunked over the whole array as well.
    let query = CoordValues::Int32(vec![0, 3, 0, 3]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    let whole = drain(&mut reader, &[24]);
    let mut expected = Vec::new();
    for tile in dense_4x4_tiles() {
        expected.extend_from_slice(&le_i32(&tile));
    }
    assert_eq!(whole[0], expected);
}

#[test]
fn dense_mmap_backend_parity() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = dense_4x4_schema(Compression::None);
    let bk = write_dense_4x4(&dir, Compression::None);
    let query = CoordValues::Int32(vec![0, 3, 1, 2]);

    for caps in [64usize, 16, 8] {
        let mut plain = FragmentReader::with_backend(
            &schema, &bk, &dir, &query, vec![0], ReadMode::Read, IoBackend::Read,
        )
        .unwrap();
        let mut mapped = FragmentReader::with_backend(
            &schema, &bk, &dir, &query, vec![0], ReadMode::Read, IoBackend::Mmap,
        )
        .unwrap();
        assert_eq!(drain(&mut plain, &[caps]), drain(&mut mapped, &[caps]));
    }
}

#[test]
fn gzip_mmap_backend_parity() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = dense_4x4_schema(Compression::Gzip);
    let bk = write_dense_4x4(&dir, Compression::Gzip);
    let query = CoordValues::Int32(vec![0, 3, 0, 3]);

    let mut mapped = FragmentReader::with_backend(
        &schema, &bk, &dir, &query, vec![0], ReadMode::Read, IoBackend::Mmap,
    )
    .unwrap();
    let mut expected = Vec::new();
    for tile in dense_4x4_tiles() {
        expected.extend_from_slice(&le_i32(&tile));
    }
    assert_eq!(drain(&mut mapped, &[64])[0], expected);
}

// ========================================================================
// Variable attributes
// ========================================================================

#[test]
fn var_attribute_offsets_are_rebased() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = dense_var_schema(Compression::None);
    let bk = write_dense_var(&dir, Compression::None);

    let query = CoordValues::Int32(vec![0, 1, 0, 1]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    let out = read_once(&mut reader, &[64, 64]);
    assert_eq!(out[0], le_u64(&[0, 1, 3, 6]));
    assert_eq!(out[1], b"abbcccdddd".to_vec());
}

#[test]
fn var_attribute_gzip_matches_plain() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = dense_var_schema(Compression::Gzip);
    let bk = write_dense_var(&dir, Compression::Gzip);

    let query = CoordValues::Int32(vec![0, 1, 0, 1]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    let out = read_once(&mut reader, &[64, 64]);
    assert_eq!(out[0], le_u64(&[0, 1, 3, 6]));
    assert_eq!(out[1], b"abbcccdddd".to_vec());
}

#[test]
fn var_overflow_resumes_with_rebased_offsets() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = dense_var_schema(Compression::None);
    let bk = write_dense_var(&dir, Compression::None);

    let query = CoordValues::Int32(vec![0, 1, 0, 1]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();

    // Five payload bytes take "a" and "bb" only.
    let out = read_once(&mut reader, &[64, 5]);
    assert_eq!(out[0], le_u64(&[0, 1]));
    assert_eq!(out[1], b"abb".to_vec());
    assert!(reader.overflow(0));

    // Fresh buffers resume at "ccc"; offsets rebase against the new call.
    let out = read_once(&mut reader, &[64, 7]);
    assert_eq!(out[0], le_u64(&[0, 3]));
    assert_eq!(out[1], b"cccdddd".to_vec());
    assert!(!reader.overflow(0));
}

#[test]
fn var_single_cell_granularity() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = dense_var_schema(Compression::None);
    let bk = write_dense_var(&dir, Compression::None);

    let query = CoordValues::Int32(vec![0, 1, 0, 1]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();

    let mut payload = Vec::new();
    for expected in [&b"a"[..], &b"bb"[..], &b"ccc"[..], &b"dddd"[..]] {
        let out = read_once(&mut reader, &[8, 4]);
        assert_eq!(out[0], le_u64(&[0]), "every chunk rebases to zero");
        assert_eq!(out[1], expected.to_vec());
        payload.extend_from_slice(&out[1]);
    }
    assert_eq!(payload, b"abbcccdddd".to_vec());
    assert!(read_once(&mut reader, &[8, 4]).iter().all(|c| c.is_empty()));
}

#[test]
fn dense_var_partial_contig_window() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = dense_var_grid_schema(2, 2);
    let bk = write_dense_var_grid(&dir, 2, 2);

    // Middle row band, full width: one contiguous window inside each of
    // the four tiles.
    let query = CoordValues::Int32(vec![1, 2, 0, 3]);
    let (offsets, payload) = expected_var_output(&[4, 5, 6, 7, 8, 9, 10, 11]);

    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    let out = read_once(&mut reader, &[64, 64]);
    assert_eq!(out[0], offsets);
    assert_eq!(out[1], payload);

    // Chunked reads emit the same payload stream and as many offsets.
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    let chunked = drain(&mut reader, &[16, 6]);
    assert_eq!(chunked[0].len(), offsets.len());
    assert_eq!(chunked[1], payload);
}

#[test]
fn dense_var_slab_walk_resumes_mid_slab() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    // Row-band tiles: the column band [1,2] becomes two 2-cell slabs per
    // tile, with an in-tile hop between them.
    let schema = dense_var_grid_schema(2, 4);
    let bk = write_dense_var_grid(&dir, 2, 4);

    let query = CoordValues::Int32(vec![0, 3, 1, 2]);
    let cells = [1, 2, 5, 6, 9, 10, 13, 14];
    let (offsets, payload) = expected_var_output(&cells);

    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    let out = read_once(&mut reader, &[64, 64]);
    assert_eq!(out[0], offsets);
    assert_eq!(out[1], payload);

    // One offset cell per call: the walk pauses inside a slab and must
    // resume at the paused cell, not the slab start.
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    let mut got = Vec::new();
    for (k, &v) in cells.iter().enumerate() {
        let out = read_once(&mut reader, &[8, 8]);
        assert_eq!(out[0], le_u64(&[0]), "every chunk rebases to zero");
        assert_eq!(out[1], var_cell_payload(v), "cell {v} out of order");
        assert_eq!(reader.overflow(0), k != cells.len() - 1);
        got.extend_from_slice(&out[1]);
    }
    assert_eq!(got, payload);
    assert!(read_once(&mut reader, &[8, 8]).iter().all(|c| c.is_empty()));
}

// ========================================================================
// Sparse scenarios
// ========================================================================

#[test]
fn sparse_full_tile() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = sparse_corners_schema();
    let bk = write_sparse_corners(&dir);

    let query = CoordValues::Int32(vec![0, 2, 0, 2]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    assert_eq!(read_once(&mut reader, &[16])[0], le_i32(&[10, 20, 30, 40]));
}

#[test]
fn sparse_partial_non_contig_with_coordinates() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = sparse_corners_schema();
    let bk = write_sparse_corners(&dir);

    // First column only: cells (0,0) and (2,0) qualify.
    let query = CoordValues::Int32(vec![0, 2, 0, 1]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0, 1], ReadMode::Read).unwrap();
    let out = read_once(&mut reader, &[16, 32]);
    assert_eq!(out[0], le_i32(&[10, 30]));
    assert_eq!(out[1], le_i32(&[0, 0, 2, 0]));
}

#[test]
fn sparse_unary_query() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = sparse_corners_schema();
    let bk = write_sparse_corners(&dir);

    let query = CoordValues::Int32(vec![2, 2, 2, 2]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    assert_eq!(read_once(&mut reader, &[16])[0], le_i32(&[40]));

    // A point that hits the MBR but no stored cell.
    let query = CoordValues::Int32(vec![1, 1, 1, 1]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    assert!(read_once(&mut reader, &[16])[0].is_empty());
}

#[test]
fn sparse_tile_search_skips_non_overlapping_tiles() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = ArraySchema::sparse(
        vec!["x".into(), "y".into()],
        CoordValues::Int32(vec![0, 9, 0, 9]),
        CellOrder::RowMajor,
        2,
        vec![AttributeDef::fixed("v", 4, Compression::None)],
        Compression::None,
    )
    .unwrap();

    // Two tiles of two cells each.
    write_attr_file(&dir, "v", &le_i32(&[10, 20, 30, 40]));
    write_attr_file(&dir, "__coords", &le_i32(&[0, 0, 0, 3, 5, 0, 5, 3]));
    let mut bk = Bookkeeping::new(1, 2, 2);
    bk.push_mbr(CoordValues::Int32(vec![0, 0, 0, 3]));
    bk.push_mbr(CoordValues::Int32(vec![5, 5, 0, 3]));
    bk.push_bounding_coords(CoordValues::Int32(vec![0, 0, 0, 3]));
    bk.push_bounding_coords(CoordValues::Int32(vec![5, 0, 5, 3]));

    let query = CoordValues::Int32(vec![4, 6, 0, 9]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    assert_eq!(read_once(&mut reader, &[32])[0], le_i32(&[30, 40]));
}

#[test]
fn sparse_hilbert_unary_lookup() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = ArraySchema::sparse(
        vec!["x".into(), "y".into()],
        CoordValues::Int32(vec![0, 1, 0, 1]),
        CellOrder::Hilbert,
        2,
        vec![AttributeDef::fixed("v", 4, Compression::None)],
        Compression::None,
    )
    .unwrap();

    // Hilbert order visits (1,0) before (0,1) in the origin block.
    write_attr_file(&dir, "v", &le_i32(&[7, 9]));
    write_attr_file(&dir, "__coords", &le_i32(&[1, 0, 0, 1]));
    let mut bk = Bookkeeping::new(1, 1, 2);
    bk.push_mbr(CoordValues::Int32(vec![0, 1, 0, 1]));
    bk.push_bounding_coords(CoordValues::Int32(vec![1, 0, 0, 1]));

    let query = CoordValues::Int32(vec![1, 1, 0, 0]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    assert_eq!(read_once(&mut reader, &[8])[0], le_i32(&[7]));
}

#[test]
fn sparse_var_attribute() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = ArraySchema::sparse(
        vec!["x".into(), "y".into()],
        CoordValues::Int32(vec![0, 2, 0, 2]),
        CellOrder::RowMajor,
        4,
        vec![AttributeDef::var("s", Compression::None)],
        Compression::None,
    )
    .unwrap();

    write_attr_file(&dir, "s", &le_u64(&[0, 1, 3, 6]));
    write_attr_file(&dir, "s_var", b"xyyzzzwwww");
    write_attr_file(&dir, "__coords", &le_i32(&[0, 0, 0, 2, 2, 0, 2, 2]));
    let mut bk = Bookkeeping::new(1, 1, 4);
    bk.push_mbr(CoordValues::Int32(vec![0, 2, 0, 2]));
    bk.push_bounding_coords(CoordValues::Int32(vec![0, 0, 2, 2]));

    // First column: cells 0 and 2, payloads "x" and "zzz".
    let query = CoordValues::Int32(vec![0, 2, 0, 1]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    let out = read_once(&mut reader, &[64, 64]);
    assert_eq!(out[0], le_u64(&[0, 1]));
    assert_eq!(out[1], b"xzzz".to_vec());
}

// ========================================================================
// Boundaries and modes
// ========================================================================

#[test]
fn inverted_query_range_yields_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = dense_4x4_schema(Compression::None);
    let bk = write_dense_4x4(&dir, Compression::None);

    let query = CoordValues::Int32(vec![2, 1, 0, 3]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    let out = read_once(&mut reader, &[64]);
    assert!(out[0].is_empty());
    assert!(!reader.overflow(0));
}

#[test]
fn zero_capacity_buffer_sets_overflow() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = dense_4x4_schema(Compression::None);
    let bk = write_dense_4x4(&dir, Compression::None);

    let query = CoordValues::Int32(vec![0, 1, 0, 1]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    let out = read_once(&mut reader, &[0]);
    assert!(out[0].is_empty());
    assert!(reader.overflow(0));
}

#[test]
fn one_byte_short_buffer_fills_and_overflows() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = dense_4x4_schema(Compression::None);
    let bk = write_dense_4x4(&dir, Compression::None);

    let query = CoordValues::Int32(vec![0, 1, 0, 1]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::Read).unwrap();
    let out = read_once(&mut reader, &[15]);
    assert_eq!(out[0].len(), 15);
    assert!(reader.overflow(0));

    let rest = read_once(&mut reader, &[15]);
    assert_eq!(rest[0], le_i32(&[0, 1, 4, 5])[15..].to_vec());
}

#[test]
fn missing_attribute_file_reads_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = ArraySchema::dense(
        vec!["rows".into(), "cols".into()],
        CoordValues::Int32(vec![0, 3, 0, 3]),
        CoordValues::Int32(vec![2, 2]),
        CellOrder::RowMajor,
        vec![
            AttributeDef::fixed("a", 4, Compression::None),
            AttributeDef::fixed("b", 4, Compression::None),
        ],
    )
    .unwrap();
    let bk = write_dense_4x4(&dir, Compression::None); // writes `a` only

    let query = CoordValues::Int32(vec![0, 1, 0, 1]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0, 1], ReadMode::Read).unwrap();
    let out = read_once(&mut reader, &[16, 16]);
    assert_eq!(out[0], le_i32(&[0, 1, 4, 5]));
    assert!(out[1].is_empty());
}

#[test]
fn read_reverse_is_a_stub() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = dense_4x4_schema(Compression::None);
    let bk = write_dense_4x4(&dir, Compression::None);

    let query = CoordValues::Int32(vec![0, 3, 0, 3]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0], ReadMode::ReadReverse).unwrap();
    let out = read_once(&mut reader, &[64]);
    assert!(out[0].is_empty());
}

#[test]
fn independent_attribute_cursors() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fragment_dir(&tmp);
    let schema = ArraySchema::dense(
        vec!["rows".into(), "cols".into()],
        CoordValues::Int32(vec![0, 3, 0, 3]),
        CoordValues::Int32(vec![2, 2]),
        CellOrder::RowMajor,
        vec![
            AttributeDef::fixed("a", 4, Compression::None),
            AttributeDef::fixed("b", 4, Compression::None),
        ],
    )
    .unwrap();
    let bk = write_dense_4x4(&dir, Compression::None);
    // `b` mirrors `a` with values shifted by 100.
    let mut b_file = Vec::new();
    for tile in dense_4x4_tiles() {
        let shifted: Vec<i32> = tile.iter().map(|v| v + 100).collect();
        b_file.extend_from_slice(&le_i32(&shifted));
    }
    write_attr_file(&dir, "b", &b_file);

    let query = CoordValues::Int32(vec![0, 3, 0, 3]);
    let mut reader =
        FragmentReader::new(&schema, &bk, &dir, &query, vec![0, 1], ReadMode::Read).unwrap();

    // `a` gets a tile-sized buffer while `b` swallows everything: the
    // cursors diverge and `a` keeps resuming on later calls.
    let mut a_bytes = Vec::new();
    let mut b_bytes = Vec::new();
    for _ in 0..10 {
        let out = read_once(&mut reader, &[16, 64]);
        if out.iter().all(|c| c.is_empty()) {
            break;
        }
        a_bytes.extend_from_slice(&out[0]);
        b_bytes.extend_from_slice(&out[1]);
    }
    let mut expected_a = Vec::new();
    for tile in dense_4x4_tiles() {
        expected_a.extend_from_slice(&le_i32(&tile));
    }
    let expected_b: Vec<u8> = {
        let mut v = Vec::new();
        for tile in dense_4x4_tiles() {
            let shifted: Vec<i32> = tile.iter().map(|x| x + 100).collect();
            v.extend_from_slice(&le_i32(&shifted));
        }
        v
    };
    assert_eq!(a_bytes, expected_a);
    assert_eq!(b_bytes, expected_b);
}
