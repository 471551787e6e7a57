//! Hudson coalescent with recombination on a discrete genome, structured by
//! a demographic model.
//!
//! Lineages carry segments of ancestral material. Going back in time they
//! coalesce within demes, recombine, migrate, and move to ancestral demes at
//! pulses and deme origins. Regions whose most recent common ancestor has
//! been found are no longer tracked.

use std::collections::BTreeMap;

use indicatif::ProgressBar;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::Exp1;
use tracing::debug;

use crate::SimulationBackend;
use crate::demography::{DemographicModel, Epoch, PLOIDY, SampleConfiguration};
use crate::error::{Result, SimError};
use crate::genealogy::Genealogy;
use crate::mutations;
use crate::rate_map::RateMap;

// ── Backend ───────────────────────────────────────────────────────────────────

pub struct HudsonCoalescent {
    rng: SmallRng,
    show_progress: bool,
}

impl HudsonCoalescent {
    pub fn new(random_seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(random_seed),
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }
}

impl SimulationBackend for HudsonCoalescent {
    fn simulate_ancestry(
        &mut self,
        model: &DemographicModel,
        samples: &SampleConfiguration,
        sequence_length: u64,
        recombination: &RateMap,
    ) -> Result<Genealogy> {
        if sequence_length == 0 {
            return Err(SimError::configuration("sequence length must be positive"));
        }
        if recombination.sequence_length() != sequence_length as f64 {
            return Err(SimError::configuration(format!(
                "recombination map spans {} but the sequence length is {}",
                recombination.sequence_length(),
                sequence_length
            )));
        }
        let bar = if self.show_progress {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        let sim = AncestrySim::new(model, samples, sequence_length, recombination, &mut self.rng);
        let genealogy = sim.run(&bar)?;
        bar.finish_and_clear();
        Ok(genealogy)
    }

    fn simulate_mutations(&mut self, genealogy: Genealogy, rate: &RateMap) -> Result<Genealogy> {
        mutations::sim_mutations(genealogy, rate, &mut self.rng)
    }
}

// ── Lineages ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
struct Segment {
    left: u64,
    right: u64,
    node: usize,
}

#[derive(Clone, Debug)]
struct Lineage {
    population: usize,
    /// Sorted, non-overlapping.
    segments: Vec<Segment>,
}

impl Lineage {
    fn left(&self) -> u64 {
        self.segments[0].left
    }

    fn right(&self) -> u64 {
        self.segments[self.segments.len() - 1].right
    }

    fn segment_at(&self, x: u64) -> Option<Segment> {
        let i = self.segments.partition_point(|s| s.right <= x);
        self.segments.get(i).copied().filter(|s| s.left <= x)
    }
}

fn push_segment(segments: &mut Vec<Segment>, left: u64, right: u64, node: usize) {
    match segments.last_mut() {
        Some(last) if last.right == left && last.node == node => last.right = right,
        _ => segments.push(Segment { left, right, node }),
    }
}

/// Number of extant lineages carrying each stretch of the sequence.
/// Key = start of a stretch, value = count until the next key.
struct OverlapCounts(BTreeMap<u64, usize>);

impl OverlapCounts {
    fn new(num_samples: usize, sequence_length: u64) -> Self {
        let mut map = BTreeMap::new();
        map.insert(0, num_samples);
        map.insert(sequence_length, 0);
        Self(map)
    }

    fn split(&mut self, x: u64) {
        if !self.0.contains_key(&x) {
            let count = self.0.range(..x).next_back().map(|(_, c)| *c).unwrap_or(0);
            self.0.insert(x, count);
        }
    }

    /// Decrements `[left, right)` by one and returns the stretches with their
    /// new counts.
    fn decrement(&mut self, left: u64, right: u64) -> Vec<(u64, u64, usize)> {
        self.split(left);
        self.split(right);
        let keys: Vec<u64> = self.0.range(left..right).map(|(k, _)| *k).collect();
        let mut out = Vec::with_capacity(keys.len());
        for (i, &k) in keys.iter().enumerate() {
            let end = keys.get(i + 1).copied().unwrap_or(right);
            if let Some(c) = self.0.get_mut(&k) {
                *c = c.saturating_sub(1);
                out.push((k, end, *c));
            }
        }
        out
    }
}

/// Waiting time to the next coalescence among `pairs` pairs in a deme whose
/// size follows `epoch`, starting at `time`, for a unit exponential `draw`.
fn coalescence_waiting_time(epoch: &Epoch, time: f64, pairs: f64, draw: f64) -> f64 {
    let rate_now = pairs / (2.0 * epoch.size_at(time));
    let g = epoch.growth_rate();
    if g == 0.0 {
        return draw / rate_now;
    }
    // rate(time + w) = rate_now * exp(g * w)
    let x = 1.0 + draw * g / rate_now;
    if x <= 0.0 { f64::INFINITY } else { x.ln() / g }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Event {
    Coalescence(usize),
    Recombination,
    Migration,
}

fn weighted_index(weights: &[f64]) -> Result<WeightedIndex<f64>> {
    WeightedIndex::new(weights).map_err(|e| SimError::simulation(e.to_string()))
}

// ── Simulation state ──────────────────────────────────────────────────────────

struct AncestrySim<'a> {
    model: &'a DemographicModel,
    recombination: &'a RateMap,
    rng: &'a mut SmallRng,
    genealogy: Genealogy,
    lineages: Vec<Lineage>,
    /// Ancient samples, latest-arriving first so the next one is at the end.
    pending: Vec<(f64, Lineage)>,
    overlaps: OverlapCounts,
    event_times: Vec<f64>,
    time: f64,
}

impl<'a> AncestrySim<'a> {
    fn new(
        model: &'a DemographicModel,
        samples: &SampleConfiguration,
        sequence_length: u64,
        recombination: &'a RateMap,
        rng: &'a mut SmallRng,
    ) -> Self {
        let population_names = model.demes().iter().map(|d| d.name.clone()).collect();
        let mut genealogy =
            Genealogy::new(sequence_length, population_names, samples.individual_names());

        let mut lineages = Vec::new();
        let mut pending = Vec::new();
        for set in samples.sets() {
            for _ in 0..set.individuals * PLOIDY {
                let node = genealogy.add_node(set.time, set.deme, true);
                let lineage = Lineage {
                    population: set.deme,
                    segments: vec![Segment {
                        left: 0,
                        right: sequence_length,
                        node,
                    }],
                };
                if set.time > 0.0 {
                    pending.push((set.time, lineage));
                } else {
                    lineages.push(lineage);
                }
            }
        }
        pending.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut event_times = model.event_times();
        event_times.extend(pending.iter().map(|(t, _)| *t));
        event_times.sort_by(f64::total_cmp);
        event_times.dedup();

        Self {
            model,
            recombination,
            rng,
            genealogy,
            lineages,
            pending,
            overlaps: OverlapCounts::new(samples.num_sample_nodes(), sequence_length),
            event_times,
            time: 0.0,
        }
    }

    fn run(mut self, bar: &ProgressBar) -> Result<Genealogy> {
        let mut next_fixed = 0;
        let mut num_events: u64 = 0;

        loop {
            if self.pending.is_empty() && self.lineages.len() <= 1 {
                break;
            }
            let fixed_time = self
                .event_times
                .get(next_fixed)
                .copied()
                .unwrap_or(f64::INFINITY);
            let (wait, event) = self.next_random_event()?;

            if self.time + wait >= fixed_time {
                if !fixed_time.is_finite() {
                    return Err(SimError::simulation(format!(
                        "{} lineages at time {} can never coalesce",
                        self.lineages.len(),
                        self.time
                    )));
                }
                self.time = fixed_time;
                next_fixed += 1;
                self.apply_fixed_events()?;
                continue;
            }

            self.time += wait;
            match event {
                Some(Event::Coalescence(pop)) => self.coalesce(pop),
                Some(Event::Recombination) => self.recombine()?,
                Some(Event::Migration) => self.migrate()?,
                None => return Err(SimError::simulation("finite wait without an event")),
            }

            num_events += 1;
            if num_events % 1000 == 0 {
                bar.set_message(format!(
                    "t = {:.1}, {} lineages",
                    self.time,
                    self.lineages.len()
                ));
                bar.tick();
            }
        }

        debug!(
            num_events,
            num_nodes = self.genealogy.nodes().len(),
            "ancestry complete"
        );
        self.genealogy.squash_edges();
        Ok(self.genealogy)
    }

    fn next_random_event(&mut self) -> Result<(f64, Option<Event>)> {
        let num_demes = self.model.num_demes();
        let mut counts = vec![0usize; num_demes];
        for l in &self.lineages {
            counts[l.population] += 1;
        }

        let mut best = (f64::INFINITY, None);

        for (deme, &n) in counts.iter().enumerate() {
            if n < 2 {
                continue;
            }
            let epoch = self.model.epoch_at(deme, self.time).ok_or_else(|| {
                SimError::simulation(format!(
                    "lineages in deme '{}' at time {}, outside its existence",
                    self.model.demes()[deme].name,
                    self.time
                ))
            })?;
            let pairs = (n * (n - 1) / 2) as f64;
            let draw: f64 = self.rng.sample(Exp1);
            let wait = coalescence_waiting_time(epoch, self.time, pairs, draw);
            if wait < best.0 {
                best = (wait, Some(Event::Coalescence(deme)));
            }
        }

        let recombination_mass: f64 = self
            .lineages
            .iter()
            .map(|l| self.recombination.mass(l.left() as f64, l.right() as f64))
            .sum();
        if recombination_mass > 0.0 {
            let draw: f64 = self.rng.sample(Exp1);
            let wait = draw / recombination_mass;
            if wait < best.0 {
                best = (wait, Some(Event::Recombination));
            }
        }

        let m = self.model.backward_migration_matrix(self.time);
        let migration_rate: f64 = counts
            .iter()
            .enumerate()
            .map(|(deme, &n)| n as f64 * m[deme].iter().sum::<f64>())
            .sum();
        if migration_rate > 0.0 {
            let draw: f64 = self.rng.sample(Exp1);
            let wait = draw / migration_rate;
            if wait < best.0 {
                best = (wait, Some(Event::Migration));
            }
        }

        Ok(best)
    }

    // ── Events ────────────────────────────────────────────────────────────────

    fn coalesce(&mut self, population: usize) {
        let members: Vec<usize> = (0..self.lineages.len())
            .filter(|&i| self.lineages[i].population == population)
            .collect();
        let i = self.rng.random_range(0..members.len());
        let mut j = self.rng.random_range(0..members.len() - 1);
        if j >= i {
            j += 1;
        }
        let (hi, lo) = if members[i] > members[j] {
            (members[i], members[j])
        } else {
            (members[j], members[i])
        };
        let a = self.lineages.swap_remove(hi);
        let b = self.lineages.swap_remove(lo);

        if let Some(merged) = self.merge(a, b, population) {
            self.lineages.push(merged);
        }
    }

    /// Joins two lineages. Overlapping material coalesces into one new node;
    /// stretches whose MRCA this completes are dropped.
    fn merge(&mut self, a: Lineage, b: Lineage, population: usize) -> Option<Lineage> {
        let mut bounds: Vec<u64> = a
            .segments
            .iter()
            .chain(b.segments.iter())
            .flat_map(|s| [s.left, s.right])
            .collect();
        bounds.sort_unstable();
        bounds.dedup();

        let mut segments = Vec::new();
        let mut parent: Option<usize> = None;
        for w in bounds.windows(2) {
            let (x, y) = (w[0], w[1]);
            match (a.segment_at(x), b.segment_at(x)) {
                (Some(s), None) | (None, Some(s)) => push_segment(&mut segments, x, y, s.node),
                (Some(sa), Some(sb)) => {
                    let u = *parent.get_or_insert_with(|| {
                        self.genealogy.add_node(self.time, population, false)
                    });
                    self.genealogy.add_edge(x, y, u, sa.node);
                    self.genealogy.add_edge(x, y, u, sb.node);
                    for (l, r, count) in self.overlaps.decrement(x, y) {
                        if count > 1 {
                            push_segment(&mut segments, l, r, u);
                        }
                    }
                }
                (None, None) => {}
            }
        }

        if segments.is_empty() {
            None
        } else {
            Some(Lineage {
                population,
                segments,
            })
        }
    }

    fn recombine(&mut self) -> Result<()> {
        let masses: Vec<f64> = self
            .lineages
            .iter()
            .map(|l| self.recombination.mass(l.left() as f64, l.right() as f64))
            .collect();
        let i = weighted_index(&masses)?.sample(&mut *self.rng);
        let (left, right) = (self.lineages[i].left(), self.lineages[i].right());

        let start = self.recombination.cumulative_mass(left as f64);
        let u: f64 = self.rng.random();
        let x = self.recombination.position_at_mass(start + u * masses[i]);
        let breakpoint = x.floor() as u64;
        if breakpoint <= left || breakpoint >= right {
            return Ok(());
        }

        let lineage = &mut self.lineages[i];
        let mut kept = Vec::new();
        let mut moved = Vec::new();
        for s in lineage.segments.drain(..) {
            if s.right <= breakpoint {
                kept.push(s);
            } else if s.left >= breakpoint {
                moved.push(s);
            } else {
                kept.push(Segment {
                    right: breakpoint,
                    ..s
                });
                moved.push(Segment {
                    left: breakpoint,
                    ..s
                });
            }
        }
        lineage.segments = kept;
        let population = lineage.population;
        self.lineages.push(Lineage {
            population,
            segments: moved,
        });
        Ok(())
    }

    fn migrate(&mut self) -> Result<()> {
        let m = self.model.backward_migration_matrix(self.time);
        let out_rates: Vec<f64> = m.iter().map(|row| row.iter().sum()).collect();
        let weights: Vec<f64> = self
            .lineages
            .iter()
            .map(|l| out_rates[l.population])
            .collect();
        let i = weighted_index(&weights)?.sample(&mut *self.rng);
        let from = self.lineages[i].population;
        let dest = weighted_index(&m[from])?.sample(&mut *self.rng);
        self.lineages[i].population = dest;
        Ok(())
    }

    /// Sample arrivals, pulses and deme origins at the current time.
    fn apply_fixed_events(&mut self) -> Result<()> {
        while self.pending.last().is_some_and(|(t, _)| *t <= self.time) {
            if let Some((_, lineage)) = self.pending.pop() {
                self.lineages.push(lineage);
            }
        }

        let model = self.model;
        for pulse in model.pulses_at(self.time) {
            let mut weights = pulse.proportions.clone();
            weights.push((1.0 - pulse.proportions.iter().sum::<f64>()).max(0.0));
            let dist = weighted_index(&weights)?;
            for l in self.lineages.iter_mut().filter(|l| l.population == pulse.dest) {
                let k = dist.sample(&mut *self.rng);
                if k < pulse.sources.len() {
                    l.population = pulse.sources[k];
                }
            }
        }

        for deme in model.origins_at(self.time) {
            let ancestors = &model.demes()[deme].ancestors;
            if ancestors.is_empty() {
                continue;
            }
            let weights: Vec<f64> = ancestors.iter().map(|(_, p)| *p).collect();
            let dist = weighted_index(&weights)?;
            for l in self.lineages.iter_mut().filter(|l| l.population == deme) {
                l.population = ancestors[dist.sample(&mut *self.rng)].0;
            }
        }
        Ok(())
    }
}
