//! Demographic models loaded from demes graphs.
//!
//! The graph is parsed and validated by the `demes` crate and converted to
//! generations; this module flattens it into index-based demes, epochs,
//! migrations and pulses that the engine and the coalescence-rate analyzer
//! can query by time. Time runs backwards from the present (0).

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{Result, SimError};

/// Ploidy of every sampled individual.
pub const PLOIDY: usize = 2;

// ── Model ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct Epoch {
    /// Older bound (may be infinite for the first epoch of a root deme).
    pub start_time: f64,
    pub end_time: f64,
    pub start_size: f64,
    pub end_size: f64,
}

impl Epoch {
    /// Backward-time growth rate `g` such that `N(t) = end_size * exp(-g (t - end_time))`.
    pub fn growth_rate(&self) -> f64 {
        if self.start_size == self.end_size || !self.start_time.is_finite() {
            0.0
        } else {
            (self.end_size / self.start_size).ln() / (self.start_time - self.end_time)
        }
    }

    pub fn size_at(&self, time: f64) -> f64 {
        let g = self.growth_rate();
        if g == 0.0 {
            self.end_size
        } else {
            self.end_size * (-g * (time - self.end_time)).exp()
        }
    }

    pub fn contains(&self, time: f64) -> bool {
        self.end_time <= time && time < self.start_time
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Deme {
    pub name: String,
    pub start_time: f64,
    pub end_time: f64,
    pub epochs: Vec<Epoch>,
    /// `(ancestor index, proportion)`; lineages still in this deme at
    /// `start_time` move to an ancestor with these probabilities.
    pub ancestors: Vec<(usize, f64)>,
}

impl Deme {
    pub fn is_alive(&self, time: f64) -> bool {
        self.end_time <= time && time < self.start_time
    }
}

/// Continuous migration, with `source` and `dest` in forward time.
#[derive(Clone, Debug, PartialEq)]
pub struct Migration {
    pub source: usize,
    pub dest: usize,
    pub rate: f64,
    pub start_time: f64,
    pub end_time: f64,
}

/// Instantaneous admixture into `dest`, forward in time.
#[derive(Clone, Debug, PartialEq)]
pub struct Pulse {
    pub sources: Vec<usize>,
    pub dest: usize,
    pub time: f64,
    pub proportions: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DemographicModel {
    demes: Vec<Deme>,
    migrations: Vec<Migration>,
    pulses: Vec<Pulse>,
}

impl DemographicModel {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let graph = demes::load(file)?;
        Self::from_graph(graph)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_graph(demes::loads(yaml)?)
    }

    pub fn from_graph(graph: demes::Graph) -> Result<Self> {
        let graph = graph.into_generations()?;

        let names: Vec<String> = graph.demes().iter().map(|d| d.name().to_string()).collect();
        let index = |name: &str| -> Result<usize> {
            names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| SimError::configuration(format!("unknown deme '{name}'")))
        };

        let mut demes = Vec::with_capacity(names.len());
        for deme in graph.demes() {
            let mut epochs = Vec::with_capacity(deme.epochs().len());
            for epoch in deme.epochs() {
                match epoch.size_function() {
                    demes::SizeFunction::Constant | demes::SizeFunction::Exponential => {}
                    #[allow(unreachable_patterns)]
                    other => {
                        return Err(SimError::configuration(format!(
                            "deme '{}': unsupported size function {other:?}",
                            deme.name()
                        )));
                    }
                }
                epochs.push(Epoch {
                    start_time: f64::from(epoch.start_time()),
                    end_time: f64::from(epoch.end_time()),
                    start_size: f64::from(epoch.start_size()),
                    end_size: f64::from(epoch.end_size()),
                });
            }

            let ancestors = deme
                .ancestor_names()
                .iter()
                .zip(deme.proportions())
                .map(|(name, p)| Ok((index(name)?, f64::from(*p))))
                .collect::<Result<Vec<_>>>()?;

            demes.push(Deme {
                name: deme.name().to_string(),
                start_time: f64::from(deme.start_time()),
                end_time: f64::from(deme.end_time()),
                epochs,
                ancestors,
            });
        }

        let migrations = graph
            .migrations()
            .iter()
            .map(|m| {
                Ok(Migration {
                    source: index(m.source())?,
                    dest: index(m.dest())?,
                    rate: f64::from(m.rate()),
                    start_time: f64::from(m.start_time()),
                    end_time: f64::from(m.end_time()),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let pulses = graph
            .pulses()
            .iter()
            .map(|p| {
                Ok(Pulse {
                    sources: p
                        .sources()
                        .iter()
                        .map(|s| index(s))
                        .collect::<Result<Vec<_>>>()?,
                    dest: index(p.dest())?,
                    time: f64::from(p.time()),
                    proportions: p.proportions().iter().map(|x| f64::from(*x)).collect(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(demes, migrations, pulses)
    }

    /// Builds a model from already-flattened parts.
    pub fn new(demes: Vec<Deme>, migrations: Vec<Migration>, pulses: Vec<Pulse>) -> Result<Self> {
        if demes.is_empty() {
            return Err(SimError::configuration("demographic model has no demes"));
        }
        for deme in &demes {
            if deme.epochs.is_empty() {
                return Err(SimError::configuration(format!(
                    "deme '{}' has no epochs",
                    deme.name
                )));
            }
            if let Some(e) = deme.epochs.iter().find(|e| e.start_size <= 0.0 || e.end_size <= 0.0) {
                return Err(SimError::configuration(format!(
                    "deme '{}' has a non-positive size in epoch ending at {}",
                    deme.name, e.end_time
                )));
            }
        }
        Ok(Self {
            demes,
            migrations,
            pulses,
        })
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn demes(&self) -> &[Deme] {
        &self.demes
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn pulses(&self) -> &[Pulse] {
        &self.pulses
    }

    pub fn num_demes(&self) -> usize {
        self.demes.len()
    }

    pub fn deme_index(&self, name: &str) -> Option<usize> {
        self.demes.iter().position(|d| d.name == name)
    }

    pub fn epoch_at(&self, deme: usize, time: f64) -> Option<&Epoch> {
        self.demes[deme].epochs.iter().find(|e| e.contains(time))
    }

    /// Diploid size of `deme` at `time`, or `None` when the deme does not
    /// exist then.
    pub fn size_at(&self, deme: usize, time: f64) -> Option<f64> {
        self.epoch_at(deme, time).map(|e| e.size_at(time))
    }

    /// `m[i][j]`: rate at which a lineage in deme `i` moves to deme `j`
    /// going back in time.
    pub fn backward_migration_matrix(&self, time: f64) -> Vec<Vec<f64>> {
        let n = self.demes.len();
        let mut m = vec![vec![0.0; n]; n];
        for mig in &self.migrations {
            if mig.end_time <= time && time < mig.start_time {
                m[mig.dest][mig.source] += mig.rate;
            }
        }
        m
    }

    /// Every finite, positive time at which rates change or lineages move.
    pub fn event_times(&self) -> Vec<f64> {
        let mut times: Vec<f64> = Vec::new();
        for deme in &self.demes {
            times.push(deme.start_time);
            for epoch in &deme.epochs {
                times.push(epoch.end_time);
            }
        }
        for mig in &self.migrations {
            times.push(mig.start_time);
            times.push(mig.end_time);
        }
        times.extend(self.pulses.iter().map(|p| p.time));
        times.retain(|t| t.is_finite() && *t > 0.0);
        times.sort_by(f64::total_cmp);
        times.dedup();
        times
    }

    /// Pulses at `time`, in the order they apply going back in time.
    pub fn pulses_at(&self, time: f64) -> Vec<&Pulse> {
        self.pulses.iter().rev().filter(|p| p.time == time).collect()
    }

    /// Demes that begin at `time` and hand their lineages to ancestors.
    pub fn origins_at(&self, time: f64) -> Vec<usize> {
        (0..self.demes.len())
            .filter(|&d| self.demes[d].start_time == time)
            .collect()
    }
}

/// Names of the demes that exist at the present, in model order.
pub fn default_sampled_demes(model: &DemographicModel) -> Vec<String> {
    model
        .demes()
        .iter()
        .filter(|d| d.end_time == 0.0)
        .map(|d| d.name.clone())
        .collect()
}

// ── Model sources ─────────────────────────────────────────────────────────────

/// A demographic model given by path, as a parsed demes graph, or already
/// flattened.
#[derive(Clone, Debug)]
pub enum GraphSource {
    Path(PathBuf),
    Graph(demes::Graph),
    Model(DemographicModel),
}

impl GraphSource {
    pub fn into_model(self) -> Result<DemographicModel> {
        match self {
            Self::Path(path) => DemographicModel::load(&path),
            Self::Graph(graph) => DemographicModel::from_graph(graph),
            Self::Model(model) => Ok(model),
        }
    }
}

impl From<PathBuf> for GraphSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for GraphSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<&str> for GraphSource {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<demes::Graph> for GraphSource {
    fn from(graph: demes::Graph) -> Self {
        Self::Graph(graph)
    }
}

impl From<DemographicModel> for GraphSource {
    fn from(model: DemographicModel) -> Self {
        Self::Model(model)
    }
}

// ── Samples ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct SampleSet {
    pub deme: usize,
    pub name: String,
    pub individuals: usize,
    /// Sampling time: the deme's end time.
    pub time: f64,
}

/// Diploid individuals to sample, per deme.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleConfiguration {
    sets: Vec<SampleSet>,
}

impl SampleConfiguration {
    /// One individual from each named deme, or from every extant deme when
    /// `sampled_demes` is `None`.
    pub fn new(model: &DemographicModel, sampled_demes: Option<&[String]>) -> Result<Self> {
        let names = match sampled_demes {
            Some(names) => names.to_vec(),
            None => default_sampled_demes(model),
        };
        Self::with_counts(model, names.into_iter().map(|n| (n, 1)))
    }

    pub fn with_counts(
        model: &DemographicModel,
        counts: impl IntoIterator<Item = (String, usize)>,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut sets = Vec::new();
        for (name, individuals) in counts {
            if !seen.insert(name.clone()) {
                return Err(SimError::configuration(format!(
                    "deme '{name}' is sampled more than once"
                )));
            }
            let deme = model.deme_index(&name).ok_or_else(|| {
                SimError::configuration(format!("sampled deme '{name}' is not in the model"))
            })?;
            if individuals == 0 {
                continue;
            }
            sets.push(SampleSet {
                deme,
                name,
                individuals,
                time: model.demes()[deme].end_time,
            });
        }
        if sets.is_empty() {
            return Err(SimError::configuration("no demes to sample"));
        }
        Ok(Self { sets })
    }

    pub fn sets(&self) -> &[SampleSet] {
        &self.sets
    }

    pub fn ploidy(&self) -> usize {
        PLOIDY
    }

    pub fn num_individuals(&self) -> usize {
        self.sets.iter().map(|s| s.individuals).sum()
    }

    pub fn num_sample_nodes(&self) -> usize {
        self.num_individuals() * PLOIDY
    }

    /// One label per individual: the deme name, suffixed with an index when
    /// a deme contributes several individuals.
    pub fn individual_names(&self) -> Vec<String> {
        self.sets
            .iter()
            .flat_map(|s| {
                (0..s.individuals).map(move |i| {
                    if s.individuals == 1 {
                        s.name.clone()
                    } else {
                        format!("{}_{}", s.name, i)
                    }
                })
            })
            .collect()
    }
}
