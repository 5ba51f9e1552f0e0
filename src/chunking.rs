//! Chunk sizing for new tables.
//!
//! The chunk length is derived from how large the table is expected to grow:
//! bigger tables get bigger I/O buffers, and a buffer holds
//! `chunk_times` chunks.

use crate::config::TablesConfig;

/// Buffer size in bytes for a table expected to hold `expected_kib` KiB.
pub fn calc_buffer_size(expected_kib: usize, buffer_unit: usize) -> usize {
    let factor = match expected_kib {
        0..=100 => 5,
        101..=1_000 => 10,
        1_001..=20_000 => 20,
        20_001..=200_000 => 40,
        200_001..=2_000_000 => 50,
        _ => 60,
    };
    factor * buffer_unit
}

/// Rows per chunk for records of `row_size` bytes.
pub fn chunk_rows(row_size: usize, expected_rows: usize, config: &TablesConfig) -> usize {
    let row_size = row_size.max(1);
    let expected_kib = expected_rows.saturating_mul(row_size) / 1024;
    let buffer = calc_buffer_size(expected_kib, config.buffer_unit);
    (buffer / (row_size * config.chunk_times.max(1))).max(1)
}
