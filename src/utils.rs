//! # Utility Functions and Helper Module
//!
//! Small helpers shared across the harness: random identifiers for test
//! names and served files, recursive directory copies for log promotion,
//! and the mean/standard-deviation reduction used by the measurement driver.

use anyhow::{Context, Result};
use rand::Rng;
use std::fs;
use std::path::Path;

/// Generate a random lowercase ASCII string of fixed length.
///
/// Used for the bogus test name sent during compliance probing and for the
/// names of the random-content files a test case serves out of `www/`.
pub fn random_string(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| rng.gen_range(b'a'..=b'z') as char)
        .collect()
}

/// Recursively copy the contents of `src` into `dst`, creating `dst`.
///
/// Mirrors the behavior needed for log promotion: the destination directory
/// tree is created as needed and existing files are overwritten.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)
        .with_context(|| format!("failed to create directory {}", dst.display()))?;
    for entry in
        fs::read_dir(src).with_context(|| format!("failed to read directory {}", src.display()))?
    {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
        }
    }
    Ok(())
}

/// Arithmetic mean of a sample.
///
/// Returns 0.0 for an empty slice so callers do not have to special-case
/// measurements with zero repetitions.
pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Sample standard deviation (n - 1 denominator).
///
/// A single sample has no spread, so slices shorter than two elements
/// yield 0.0.
pub fn stdev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let m = mean(samples);
    let variance =
        samples.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (samples.len() - 1) as f64;
    variance.sqrt()
}
