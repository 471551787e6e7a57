//! Coalescence-rate trajectories computed from a demographic model.
//!
//! The `n` sampled lineages are tracked as a distribution over their placement
//! across demes. Migration moves probability between placements, coalescence
//! removes it; pulses and deme origins redistribute lineages at fixed times.
//! The rate reported at `t` is the hazard of the first coalescence given none
//! has happened yet.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::demography::{DemographicModel, Epoch};
use crate::error::{Result, SimError};

const MIN_STEPS: usize = 16;
const MAX_STEPS: usize = 200_000;

#[derive(Clone, Debug, PartialEq)]
pub struct CoalescenceTrajectory {
    pub times: Vec<f64>,
    pub rates: Vec<f64>,
    /// Probability that no coalescence has happened by each time.
    pub survival: Vec<f64>,
}

/// Ways of placing `n` lineages in `parts` demes.
fn compositions(n: usize, parts: usize) -> Vec<Vec<usize>> {
    if parts == 1 {
        return vec![vec![n]];
    }
    let mut out = Vec::new();
    for first in 0..=n {
        for rest in compositions(n - first, parts - 1) {
            let mut c = Vec::with_capacity(parts);
            c.push(first);
            c.extend(rest);
            out.push(c);
        }
    }
    out
}

fn multinomial(counts: &[usize], probs: &[f64]) -> f64 {
    let mut total = 0;
    let mut coef = 1.0;
    let mut p = 1.0;
    for (&c, &q) in counts.iter().zip(probs) {
        for i in 1..=c {
            total += 1;
            coef *= total as f64 / i as f64;
        }
        p *= q.powi(c as i32);
    }
    coef * p
}

struct LineageStates {
    states: Vec<Vec<usize>>,
    index: HashMap<Vec<usize>, usize>,
}

impl LineageStates {
    fn new(n: usize, num_demes: usize) -> Self {
        let states = compositions(n, num_demes);
        let index = states
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();
        Self { states, index }
    }

    fn len(&self) -> usize {
        self.states.len()
    }

    fn all_in(&self, deme: usize, n: usize) -> usize {
        let mut s = vec![0; self.states[0].len()];
        s[deme] = n;
        self.index[&s]
    }

    /// `q[(i, j)]`: rate of moving from placement `i` to `j`.
    fn generator(&self, migration: &[Vec<f64>]) -> DMatrix<f64> {
        let len = self.len();
        let mut q = DMatrix::zeros(len, len);
        for (i, s) in self.states.iter().enumerate() {
            for (from, &c) in s.iter().enumerate() {
                if c == 0 {
                    continue;
                }
                for (to, &rate) in migration[from].iter().enumerate() {
                    if rate <= 0.0 || to == from {
                        continue;
                    }
                    let mut next = s.clone();
                    next[from] -= 1;
                    next[to] += 1;
                    let j = self.index[&next];
                    q[(i, j)] += c as f64 * rate;
                    q[(i, i)] -= c as f64 * rate;
                }
            }
        }
        q
    }

    fn coalescence_rates(&self, epochs: &[Option<&Epoch>], time: f64) -> DVector<f64> {
        DVector::from_iterator(
            self.len(),
            self.states.iter().map(|s| {
                s.iter()
                    .zip(epochs)
                    .map(|(&c, epoch)| match epoch {
                        Some(e) if c >= 2 => {
                            (c * (c - 1) / 2) as f64 / (2.0 * e.size_at(time))
                        }
                        _ => 0.0,
                    })
                    .sum()
            }),
        )
    }

    /// `r[(i, j)]`: probability that placement `i` becomes `j` when every
    /// lineage in `from` independently moves to one of `targets`.
    fn redistribution(&self, from: usize, targets: &[(usize, f64)]) -> DMatrix<f64> {
        let len = self.len();
        let probs: Vec<f64> = targets.iter().map(|(_, p)| *p).collect();
        let mut r = DMatrix::zeros(len, len);
        for (i, s) in self.states.iter().enumerate() {
            let k = s[from];
            if k == 0 {
                r[(i, i)] = 1.0;
                continue;
            }
            for split in compositions(k, targets.len()) {
                let mut next = s.clone();
                next[from] = 0;
                for (&(to, _), &x) in targets.iter().zip(&split) {
                    next[to] += x;
                }
                r[(i, self.index[&next])] += multinomial(&split, &probs);
            }
        }
        r
    }
}

// ── Integration ───────────────────────────────────────────────────────────────

struct Trajectory<'a> {
    model: &'a DemographicModel,
    states: LineageStates,
    /// Placement distribution conditional on no coalescence yet.
    p: DVector<f64>,
    log_survival: f64,
    time: f64,
}

impl Trajectory<'_> {
    fn epochs_at(&self, time: f64) -> Vec<Option<&Epoch>> {
        (0..self.model.num_demes())
            .map(|d| self.model.epoch_at(d, time))
            .collect()
    }

    fn rate(&self) -> f64 {
        let epochs = self.epochs_at(self.time);
        self.states
            .coalescence_rates(&epochs, self.time)
            .dot(&self.p)
    }

    /// RK4 from the current time to `to`, with no demographic event in between.
    fn integrate_to(&mut self, to: f64) {
        let span = to - self.time;
        if span <= 0.0 {
            return;
        }
        let model = self.model;
        let epochs: Vec<Option<&Epoch>> = (0..model.num_demes())
            .map(|d| model.epoch_at(d, self.time))
            .collect();
        let qt = self
            .states
            .generator(&model.backward_migration_matrix(self.time))
            .transpose();

        let max_migration = qt.diagonal().iter().fold(0.0_f64, |a, &x| a.max(-x));
        let max_coalescence = self
            .states
            .coalescence_rates(&epochs, self.time)
            .max()
            .max(self.states.coalescence_rates(&epochs, to).max());
        let steps = ((span * (max_migration + max_coalescence) * 8.0).ceil() as usize)
            .clamp(MIN_STEPS, MAX_STEPS);
        let h = span / steps as f64;

        let states = &self.states;
        let derivative = |t: f64, p: &DVector<f64>| -> (DVector<f64>, f64) {
            let k = states.coalescence_rates(&epochs, t);
            let r = k.dot(p);
            let dp = &qt * p - k.component_mul(p) + p * r;
            (dp, -r)
        };

        let mut p = self.p.clone();
        let mut log_s = self.log_survival;
        for step in 0..steps {
            let t = self.time + step as f64 * h;
            let (k1, l1) = derivative(t, &p);
            let (k2, l2) = derivative(t + h / 2.0, &(&p + &k1 * (h / 2.0)));
            let (k3, l3) = derivative(t + h / 2.0, &(&p + &k2 * (h / 2.0)));
            let (k4, l4) = derivative(t + h, &(&p + &k3 * h));
            p += (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (h / 6.0);
            log_s += (l1 + 2.0 * l2 + 2.0 * l3 + l4) * (h / 6.0);

            p.apply(|x| *x = x.max(0.0));
            let total = p.sum();
            if total > 0.0 {
                p /= total;
            }
        }
        self.p = p;
        self.log_survival = log_s;
        self.time = to;
    }

    /// Pulses, then deme origins, at the current time.
    fn apply_events(&mut self) {
        let model = self.model;
        for pulse in model.pulses_at(self.time) {
            let mut targets: Vec<(usize, f64)> = pulse
                .sources
                .iter()
                .copied()
                .zip(pulse.proportions.iter().copied())
                .collect();
            let stay = (1.0 - pulse.proportions.iter().sum::<f64>()).max(0.0);
            targets.push((pulse.dest, stay));
            let r = self.states.redistribution(pulse.dest, &targets);
            self.p = r.transpose() * &self.p;
        }
        for deme in model.origins_at(self.time) {
            let ancestors = &model.demes()[deme].ancestors;
            if ancestors.is_empty() {
                continue;
            }
            let r = self.states.redistribution(deme, ancestors);
            self.p = r.transpose() * &self.p;
        }
    }
}

/// Rate and survival of the first coalescence among `n` lineages sampled
/// from `deme`, at each of `times` (generations before present).
///
/// Lineages are sampled when the deme ends; earlier times report rate 0 and
/// survival 1.
pub fn coalescence_rate_trajectory(
    model: &DemographicModel,
    deme: &str,
    times: &[f64],
    n: usize,
) -> Result<CoalescenceTrajectory> {
    if n < 2 {
        return Err(SimError::configuration(format!(
            "at least 2 lineages are needed, got {n}"
        )));
    }
    let d = model
        .deme_index(deme)
        .ok_or_else(|| SimError::configuration(format!("deme '{deme}' is not in the model")))?;
    if let Some(t) = times.iter().find(|t| !t.is_finite() || **t < 0.0) {
        return Err(SimError::configuration(format!(
            "time points must be finite and non-negative, got {t}"
        )));
    }
    if times.windows(2).any(|w| w[1] < w[0]) {
        return Err(SimError::configuration("time points must be non-decreasing"));
    }

    let start = model.demes()[d].end_time;
    let states = LineageStates::new(n, model.num_demes());
    debug!(deme, n, num_states = states.len(), "coalescence trajectory");
    let mut p = DVector::zeros(states.len());
    p[states.all_in(d, n)] = 1.0;

    let mut traj = Trajectory {
        model,
        states,
        p,
        log_survival: 0.0,
        time: start,
    };
    let events: Vec<f64> = model
        .event_times()
        .into_iter()
        .filter(|&t| t > start)
        .collect();
    let mut next_event = 0;
    traj.apply_events();

    let mut rates = Vec::with_capacity(times.len());
    let mut survival = Vec::with_capacity(times.len());
    for &t in times {
        if t < start {
            rates.push(0.0);
            survival.push(1.0);
            continue;
        }
        while next_event < events.len() && events[next_event] <= t {
            traj.integrate_to(events[next_event]);
            traj.apply_events();
            next_event += 1;
        }
        traj.integrate_to(t);
        rates.push(traj.rate());
        survival.push(traj.log_survival.exp());
    }

    Ok(CoalescenceTrajectory {
        times: times.to_vec(),
        rates,
        survival,
    })
}

/// Coalescence rates only, aligned with `times`.
pub fn get_coalescent_rate(
    model: &DemographicModel,
    deme: &str,
    times: &[f64],
    n: usize,
) -> Result<Vec<f64>> {
    Ok(coalescence_rate_trajectory(model, deme, times, n)?.rates)
}
