use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Result, SimError};

// ── Rate map ──────────────────────────────────────────────────────────────────

/// Piecewise-constant per-base rate over `[0, L)`.
///
/// `positions` are the interval breakpoints (first is 0, last is L) and
/// `rates[i]` applies to `[positions[i], positions[i + 1])`.
#[derive(Clone, Debug, PartialEq)]
pub struct RateMap {
    positions: Vec<f64>,
    rates: Vec<f64>,
    /// `cumulative[i]` = rate mass over `[0, positions[i])`.
    cumulative: Vec<f64>,
}

impl RateMap {
    pub fn new(positions: Vec<f64>, rates: Vec<f64>) -> Result<Self> {
        if rates.is_empty() {
            return Err(SimError::map_construction(
                "a rate map needs at least one interval",
            ));
        }
        if positions.len() != rates.len() + 1 {
            return Err(SimError::map_construction(format!(
                "{} breakpoints cannot bound {} intervals",
                positions.len(),
                rates.len()
            )));
        }
        if positions[0] != 0.0 {
            return Err(SimError::map_construction(format!(
                "first breakpoint must be 0, got {}",
                positions[0]
            )));
        }
        for w in positions.windows(2) {
            if !w[1].is_finite() || w[1] <= w[0] {
                return Err(SimError::map_construction(format!(
                    "breakpoints must be strictly increasing, found {} after {}",
                    w[1], w[0]
                )));
            }
        }
        if let Some(bad) = rates.iter().find(|r| !r.is_finite() || **r < 0.0) {
            return Err(SimError::map_construction(format!(
                "rates must be finite and non-negative, got {bad}"
            )));
        }

        let mut cumulative = Vec::with_capacity(positions.len());
        cumulative.push(0.0);
        for (i, rate) in rates.iter().enumerate() {
            let span = positions[i + 1] - positions[i];
            cumulative.push(cumulative[i] + span * rate);
        }

        Ok(Self {
            positions,
            rates,
            cumulative,
        })
    }

    /// Single interval of rate `rate` over `[0, sequence_length)`.
    pub fn uniform(sequence_length: u64, rate: f64) -> Result<Self> {
        Self::new(vec![0.0, sequence_length as f64], vec![rate])
    }

    /// Recombination map from a genetic map given as cumulative centiMorgans
    /// at physical coordinates.
    ///
    /// Rates are `diff(cm) / diff(coords) / 100` on the raw coordinates.
    /// The first breakpoint is then moved to 0. A map that stops at or before
    /// `sequence_length` has its last rate carried to the end; a longer map
    /// is cut at `sequence_length`.
    pub fn from_genetic_map(
        coordinates: &[f64],
        map_values: &[f64],
        sequence_length: u64,
    ) -> Result<Self> {
        if coordinates.len() != map_values.len() {
            return Err(SimError::map_construction(format!(
                "{} coordinates but {} map values",
                coordinates.len(),
                map_values.len()
            )));
        }
        if coordinates.len() < 2 {
            return Err(SimError::map_construction(
                "a genetic map needs at least two points",
            ));
        }
        check_increasing(coordinates)?;

        let length = sequence_length as f64;
        let mut rates: Vec<f64> = coordinates
            .windows(2)
            .zip(map_values.windows(2))
            .map(|(x, cm)| (cm[1] - cm[0]) / (x[1] - x[0]) / 100.0)
            .collect();

        let mut edges = coordinates.to_vec();
        edges[0] = 0.0;
        let last = edges[edges.len() - 1];

        if last <= length {
            edges.pop();
        } else {
            let keep = edges[..edges.len() - 1]
                .iter()
                .filter(|&&x| x < length)
                .count();
            rates.truncate(keep);
            edges.truncate(keep);
        }
        edges.push(length);

        Self::new(edges, rates)
    }

    /// Map from a rate track where `rates[i]` starts at `coordinates[i]` and
    /// runs to the next coordinate. The first coordinate is moved to 0 and
    /// only intervals starting before `sequence_length` are kept.
    pub fn from_track(coordinates: &[f64], rates: &[f64], sequence_length: u64) -> Result<Self> {
        if coordinates.len() != rates.len() {
            return Err(SimError::map_construction(format!(
                "{} coordinates but {} rates",
                coordinates.len(),
                rates.len()
            )));
        }
        if coordinates.is_empty() {
            return Err(SimError::map_construction("empty rate track"));
        }
        check_increasing(coordinates)?;

        let length = sequence_length as f64;
        let mut edges = coordinates.to_vec();
        edges[0] = 0.0;
        let keep = edges.iter().filter(|&&x| x < length).count();
        edges.truncate(keep);
        edges.push(length);
        let rates = rates[..keep].to_vec();

        Self::new(edges, rates)
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    pub fn num_intervals(&self) -> usize {
        self.rates.len()
    }

    pub fn sequence_length(&self) -> f64 {
        self.positions[self.positions.len() - 1]
    }

    pub fn total_mass(&self) -> f64 {
        self.cumulative[self.cumulative.len() - 1]
    }

    pub fn mean_rate(&self) -> f64 {
        self.total_mass() / self.sequence_length()
    }

    /// Rate mass over `[0, x)`; `x` is clamped to the map.
    pub fn cumulative_mass(&self, x: f64) -> f64 {
        let x = x.clamp(0.0, self.sequence_length());
        let i = self.interval_index(x);
        self.cumulative[i] + (x - self.positions[i]) * self.rates[i]
    }

    /// Rate mass over `[left, right)`.
    pub fn mass(&self, left: f64, right: f64) -> f64 {
        self.cumulative_mass(right) - self.cumulative_mass(left)
    }

    /// Inverse of [`cumulative_mass`](Self::cumulative_mass). Zero-rate
    /// stretches are skipped, so the result lies where the rate is positive.
    pub fn position_at_mass(&self, mass: f64) -> f64 {
        let mass = mass.clamp(0.0, self.total_mass());
        let i = self
            .cumulative
            .partition_point(|&c| c <= mass)
            .saturating_sub(1)
            .min(self.rates.len() - 1);
        let rate = self.rates[i];
        if rate > 0.0 {
            (self.positions[i] + (mass - self.cumulative[i]) / rate).min(self.positions[i + 1])
        } else {
            self.positions[i]
        }
    }

    fn interval_index(&self, x: f64) -> usize {
        self.positions
            .partition_point(|&p| p <= x)
            .saturating_sub(1)
            .min(self.rates.len() - 1)
    }
}

fn check_increasing(coordinates: &[f64]) -> Result<()> {
    for w in coordinates.windows(2) {
        if w[1] <= w[0] {
            return Err(SimError::map_construction(format!(
                "coordinates must be strictly increasing, found {} after {}",
                w[1], w[0]
            )));
        }
    }
    Ok(())
}

/// Windowed-mean rate map for per-base rate tracks.
///
/// Windows start at indices `0, window_size, 2 * window_size, ...`; each
/// window spans up to the next start and the last one runs to the end of the
/// data. Breakpoints are `[0] + positions[window starts] + [L]` and rates are
/// `[0] + window means`: the stretch before the first observed position has
/// rate 0 and is omitted when that position is 0.
pub fn build_rate_map(
    positions: &[f64],
    rates: &[f64],
    window_size: usize,
    sequence_length: u64,
) -> Result<RateMap> {
    if positions.len() != rates.len() {
        return Err(SimError::map_construction(format!(
            "{} positions but {} rates",
            positions.len(),
            rates.len()
        )));
    }
    if positions.is_empty() {
        return Err(SimError::map_construction("no positions to build a map from"));
    }
    if window_size == 0 {
        return Err(SimError::map_construction("window size must be positive"));
    }
    check_increasing(positions)?;
    let length = sequence_length as f64;
    if positions[0] < 0.0 || positions[positions.len() - 1] >= length {
        return Err(SimError::map_construction(format!(
            "positions must lie within [0, {sequence_length})"
        )));
    }

    let starts: Vec<usize> = (0..positions.len()).step_by(window_size).collect();

    let mut pos_list = vec![0.0];
    let mut rate_list = vec![0.0];
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(rates.len());
        let window = &rates[start..end];
        pos_list.push(positions[start]);
        rate_list.push(window.iter().sum::<f64>() / window.len() as f64);
    }
    pos_list.push(length);

    if pos_list[1] == 0.0 {
        pos_list.remove(0);
        rate_list.remove(0);
    }

    if pos_list.len() != rate_list.len() + 1 {
        return Err(SimError::map_construction(format!(
            "{} breakpoints for {} window rates",
            pos_list.len(),
            rate_list.len()
        )));
    }
    RateMap::new(pos_list, rate_list)
}

// ── Rate parameters ──────────────────────────────────────────────────────────

/// A rate given either as one number for the whole sequence or as a file of
/// empirical rates.
#[derive(Clone, Debug, PartialEq)]
pub enum RateParameter {
    Scalar(f64),
    EmpiricalFile(PathBuf),
}

impl RateParameter {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(rate) => Some(*rate),
            Self::EmpiricalFile(_) => None,
        }
    }
}

impl From<f64> for RateParameter {
    fn from(rate: f64) -> Self {
        Self::Scalar(rate)
    }
}

impl From<PathBuf> for RateParameter {
    fn from(path: PathBuf) -> Self {
        Self::EmpiricalFile(path)
    }
}

/// Anything that parses as a number is a scalar rate, everything else a path.
impl FromStr for RateParameter {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().parse::<f64>() {
            Ok(rate) => Self::Scalar(rate),
            Err(_) => Self::EmpiricalFile(PathBuf::from(s)),
        })
    }
}

impl fmt::Display for RateParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(rate) => write!(f, "{rate}"),
            Self::EmpiricalFile(path) => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() <= 1e-12 * a.abs().max(b.abs()).max(1.0), "{a} != {b}");
    }

    #[test]
    fn uniform_map_has_one_interval() {
        let map = RateMap::uniform(1000, 1e-8).unwrap();
        assert_eq!(map.positions(), &[0.0, 1000.0]);
        assert_eq!(map.rates(), &[1e-8]);
        assert_close(map.total_mass(), 1e-5);
        assert_close(map.mean_rate(), 1e-8);
    }

    #[test]
    fn invalid_structures_are_rejected() {
        assert!(matches!(
            RateMap::new(vec![0.0, 10.0], vec![1.0, 2.0]),
            Err(SimError::MapConstruction { .. })
        ));
        assert!(RateMap::new(vec![1.0, 10.0], vec![1.0]).is_err());
        assert!(RateMap::new(vec![0.0, 10.0, 10.0], vec![1.0, 1.0]).is_err());
        assert!(RateMap::new(vec![0.0, 10.0], vec![-1.0]).is_err());
        assert!(RateMap::new(vec![0.0, 10.0], vec![f64::NAN]).is_err());
        assert!(RateMap::new(vec![0.0], vec![]).is_err());
        assert!(RateMap::uniform(0, 1e-8).is_err());
    }

    #[test]
    fn mass_and_inverse_agree() {
        let map = RateMap::new(vec![0.0, 10.0, 20.0, 40.0], vec![1.0, 0.0, 0.5]).unwrap();
        assert_close(map.total_mass(), 20.0);
        assert_close(map.mass(5.0, 25.0), 5.0 + 2.5);
        assert_close(map.cumulative_mass(-3.0), 0.0);
        assert_close(map.cumulative_mass(100.0), 20.0);
        assert_close(map.position_at_mass(5.0), 5.0);
        // Mass 10 sits at the start of the zero-rate stretch; the inverse
        // lands where the rate picks up again.
        assert_close(map.position_at_mass(10.0), 20.0);
        assert_close(map.position_at_mass(15.0), 30.0);
        assert_close(map.position_at_mass(20.0), 40.0);
    }

    #[test]
    fn windowed_means_cover_exact_slices() {
        let positions = [5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0];
        let rates = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let map = build_rate_map(&positions, &rates, 3, 100).unwrap();

        assert_eq!(map.positions(), &[0.0, 5.0, 8.0, 11.0, 100.0]);
        assert_eq!(map.positions().len(), map.rates().len() + 1);
        assert_close(map.rates()[0], 0.0);
        assert_close(map.rates()[1], (1.0 + 2.0 + 3.0) / 3.0);
        assert_close(map.rates()[2], (4.0 + 5.0 + 6.0) / 3.0);
        // Final partial window is [last start, end of data).
        assert_close(map.rates()[3], 7.0);
    }

    #[test]
    fn windowed_map_starting_at_zero_drops_empty_leading_interval() {
        let positions = [0.0, 10.0, 20.0, 30.0];
        let rates = [2.0, 4.0, 6.0, 8.0];
        let map = build_rate_map(&positions, &rates, 2, 50).unwrap();
        assert_eq!(map.positions(), &[0.0, 20.0, 50.0]);
        assert_eq!(map.rates(), &[3.0, 7.0]);
    }

    #[test]
    fn windowed_map_rejects_bad_input() {
        assert!(build_rate_map(&[1.0, 2.0], &[1.0], 1, 10).is_err());
        assert!(build_rate_map(&[], &[], 1, 10).is_err());
        assert!(build_rate_map(&[1.0, 2.0], &[1.0, 1.0], 0, 10).is_err());
        assert!(build_rate_map(&[2.0, 1.0], &[1.0, 1.0], 1, 10).is_err());
        assert!(build_rate_map(&[1.0, 10.0], &[1.0, 1.0], 1, 10).is_err());
    }

    #[test]
    fn genetic_map_shorter_than_sequence_is_extended() {
        let coords = [100.0, 200.0, 400.0];
        let cm = [0.0, 1.0, 2.0];
        let map = RateMap::from_genetic_map(&coords, &cm, 1000).unwrap();

        assert_eq!(map.positions(), &[0.0, 200.0, 1000.0]);
        assert_close(map.rates()[0], 1.0 / 100.0 / 100.0);
        // The last finite difference is carried to L.
        assert_close(map.rates()[1], 1.0 / 200.0 / 100.0);
    }

    #[test]
    fn genetic_map_ending_exactly_at_sequence_length() {
        let coords = [0.0, 500.0, 1000.0];
        let cm = [0.0, 0.5, 1.5];
        let map = RateMap::from_genetic_map(&coords, &cm, 1000).unwrap();
        assert_eq!(map.positions(), &[0.0, 500.0, 1000.0]);
        assert_eq!(map.num_intervals(), 2);
    }

    #[test]
    fn genetic_map_longer_than_sequence_is_truncated() {
        let coords = [10.0, 300.0, 600.0, 900.0, 1200.0];
        let cm = [0.0, 1.0, 2.0, 4.0, 8.0];
        let map = RateMap::from_genetic_map(&coords, &cm, 700).unwrap();

        assert_eq!(map.positions(), &[0.0, 300.0, 600.0, 700.0]);
        assert_eq!(map.rates().len(), map.positions().len() - 1);
        assert!(map.positions()[..3].iter().all(|&x| x < 700.0));
        assert_close(map.rates()[0], 1.0 / 290.0 / 100.0);
        assert_close(map.rates()[1], 1.0 / 300.0 / 100.0);
        assert_close(map.rates()[2], 2.0 / 300.0 / 100.0);
    }

    #[test]
    fn genetic_map_needs_two_ordered_points() {
        assert!(RateMap::from_genetic_map(&[10.0], &[0.0], 100).is_err());
        assert!(RateMap::from_genetic_map(&[10.0, 10.0], &[0.0, 1.0], 100).is_err());
        assert!(RateMap::from_genetic_map(&[10.0, 20.0], &[0.0], 100).is_err());
        // A decreasing genetic map gives negative rates.
        assert!(RateMap::from_genetic_map(&[10.0, 20.0], &[1.0, 0.0], 100).is_err());
    }

    #[test]
    fn track_is_extended_or_cut() {
        let coords = [50.0, 100.0, 150.0];
        let rates = [1e-8, 2e-8, 3e-8];

        let extended = RateMap::from_track(&coords, &rates, 1000).unwrap();
        assert_eq!(extended.positions(), &[0.0, 100.0, 150.0, 1000.0]);
        assert_eq!(extended.rates(), &rates);

        let cut = RateMap::from_track(&coords, &rates, 120).unwrap();
        assert_eq!(cut.positions(), &[0.0, 100.0, 120.0]);
        assert_eq!(cut.rates(), &[1e-8, 2e-8]);
    }

    #[test]
    fn rate_parameter_parses_number_then_path() {
        assert_eq!(
            "1.5e-8".parse::<RateParameter>().unwrap(),
            RateParameter::Scalar(1.5e-8)
        );
        assert_eq!(
            "maps/chr1.txt".parse::<RateParameter>().unwrap(),
            RateParameter::EmpiricalFile(PathBuf::from("maps/chr1.txt"))
        );
        assert_eq!(RateParameter::from(2e-8).as_scalar(), Some(2e-8));
    }
}
