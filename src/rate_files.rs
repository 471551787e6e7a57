//! Readers for empirical rate files.
//!
//! Two shapes are accepted:
//! - mutation-rate tracks, bedgraph-like: `chrom start end rate`
//!   (or `start rate`), one row per window;
//! - genetic maps: `chrom pos rate_cM_per_Mb map_cM` (HapMap/PLINK),
//!   `pos rate map_cM`, or `pos map_cM`.
//!
//! Blank lines, `#` comments and `track`/`browser` lines are skipped, as is a
//! non-numeric header on the first data line. Paths ending in `.gz` are read
//! through a gzip decoder.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::{Result, SimError};

/// Coordinates and the values observed at them, in file order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RateTrack {
    pub coordinates: Vec<f64>,
    pub values: Vec<f64>,
}

impl RateTrack {
    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }
}

fn open_text(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    let is_gzipped = path.extension().map(|e| e == "gz").unwrap_or(false);
    Ok(if is_gzipped {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    })
}

fn is_skippable(line: &str) -> bool {
    line.is_empty() || line.starts_with('#') || line.starts_with("track") || line.starts_with("browser")
}

/// Reads rows of whitespace-separated fields and hands each to `pick`, which
/// returns the (coordinate, value) column indices for that row width.
fn read_columns(
    path: &Path,
    pick: impl Fn(usize) -> Option<(usize, usize)>,
) -> Result<RateTrack> {
    let reader = open_text(path)?;
    let mut track = RateTrack::default();
    let mut seen_data = false;

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if is_skippable(line) {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let (ci, vi) = pick(fields.len()).ok_or_else(|| {
            SimError::parse(
                path,
                line_num + 1,
                format!("unexpected number of columns: {}", fields.len()),
            )
        })?;

        let parsed = (fields[ci].parse::<f64>(), fields[vi].parse::<f64>());
        match parsed {
            (Ok(coordinate), Ok(value)) => {
                if !coordinate.is_finite() || !value.is_finite() {
                    return Err(SimError::parse(path, line_num + 1, "value is not finite"));
                }
                track.coordinates.push(coordinate);
                track.values.push(value);
            }
            _ if !seen_data => {
                // header row
            }
            _ => {
                return Err(SimError::parse(
                    path,
                    line_num + 1,
                    format!("cannot parse '{}' / '{}' as numbers", fields[ci], fields[vi]),
                ));
            }
        }
        seen_data = true;
    }

    if track.is_empty() {
        return Err(SimError::parse(path, 0, "no data rows"));
    }
    Ok(track)
}

/// Reads a mutation-rate track: window start coordinates and rates.
pub fn read_rate_track(path: &Path) -> Result<RateTrack> {
    read_columns(path, |width| match width {
        2 => Some((0, 1)),
        n if n >= 4 => Some((1, 3)),
        _ => None,
    })
}

/// Reads a genetic map: physical coordinates and cumulative map positions (cM).
pub fn read_genetic_map(path: &Path) -> Result<RateTrack> {
    read_columns(path, |width| match width {
        2 => Some((0, 1)),
        3 => Some((0, 2)),
        n if n >= 4 => Some((1, 3)),
        _ => None,
    })
}
