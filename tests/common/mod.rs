//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use pointflow::pipeline::{DimId, PointBuffer};
use std::path::{Path, PathBuf};

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Every value of one dimension, widened to f64.
pub fn column_values(buffer: &PointBuffer, name: &str) -> Vec<f64> {
    let dim: DimId = buffer
        .table()
        .find(name)
        .unwrap_or_else(|| panic!("dimension '{}' not in table", name));
    (0..buffer.size())
        .map(|i| buffer.get_as_f64(i, dim).unwrap())
        .collect()
}

/// Write a delimited text file with a header row.
pub fn write_csv(dir: &Path, name: &str, header: &str, rows: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let mut content = String::from(header);
    content.push('\n');
    for row in rows {
        content.push_str(row);
        content.push('\n');
    }
    std::fs::write(&path, content).unwrap();
    path
}
