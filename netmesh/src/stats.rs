//! Statistics and output helpers
//!
//! Small numeric helpers used by the aggregator, plus the JSON writer for report files.
//!
//! ```rust
//! use netmesh::stats::{calculate_average, calculate_median};
//!
//! let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
//! assert_eq!(calculate_average(&data), 3.0);
//! assert_eq!(calculate_median(&data), 3.0);
//! ```

use std::{fs::File, io::Write, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Arithmetic mean, or 0.0 for an empty slice
pub fn calculate_average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Median, averaging the two middle values for even lengths
pub fn calculate_median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let sorted = sorted(values);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Summary of a sample set
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

/// Calculates count, min, max, mean and median
///
/// # Returns
///
/// `None` for an empty slice; an empty sample has no min or max.
pub fn calculate_basic_stats(values: &[f64]) -> Option<BasicStats> {
    if values.is_empty() {
        return None;
    }

    Some(BasicStats {
        count: values.len(),
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        mean: calculate_average(values),
        median: calculate_median(values),
    })
}

/// Formats a rate in bits per second with a fitting unit
pub fn format_rate(bits_per_sec: f64) -> String {
    if bits_per_sec < 1e3 {
        format!("{bits_per_sec:.2} b/s")
    } else if bits_per_sec < 1e6 {
        format!("{:.2} Kb/s", bits_per_sec / 1e3)
    } else if bits_per_sec < 1e9 {
        format!("{:.2} Mb/s", bits_per_sec / 1e6)
    } else {
        format!("{:.2} Gb/s", bits_per_sec / 1e9)
    }
}

/// Saves any serializable value as pretty-printed JSON
///
/// # Errors
///
/// Fails if the value cannot be serialized or the file cannot be written.
pub fn save_json_results<T: Serialize>(data: &T, path: impl AsRef<Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;

    let mut file = File::create(path.as_ref())?;
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;

    log::info!("Results saved to {}", path.as_ref().display());
    Ok(())
}
