//! Driver: turns parameters and a demographic graph into rate maps and
//! samples, runs ancestry then mutations, and writes the result.

use std::path::{Path, PathBuf};

use rand::Rng;
use serde_json::json;
use tracing::info;

use crate::SimulationBackend;
use crate::coalescent::HudsonCoalescent;
use crate::demography::{GraphSource, SampleConfiguration};
use crate::error::{Result, SimError};
use crate::genealogy::Genealogy;
use crate::rate_files::{read_genetic_map, read_rate_track};
use crate::rate_map::{RateMap, RateParameter, build_rate_map};
use crate::vcf::write_vcf;

// ── Parameters ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct Parameters {
    /// Drawn at random when `None`.
    pub random_seed: Option<u64>,
    pub sequence_length: u64,
    pub recombination: RateParameter,
    pub mutation: RateParameter,
    /// Defaults to every deme alive at the present.
    pub sampled_demes: Option<Vec<String>>,
    pub contig_id: String,
    /// Window (in rows) for averaging a mutation-rate track.
    pub window_size: Option<usize>,
    pub show_progress: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            random_seed: None,
            sequence_length: 10_000_000,
            recombination: RateParameter::Scalar(1e-8),
            mutation: RateParameter::Scalar(1e-8),
            sampled_demes: None,
            contig_id: "0".to_string(),
            window_size: None,
            show_progress: false,
        }
    }
}

impl Parameters {
    pub fn seed(&self) -> u64 {
        self.random_seed
            .unwrap_or_else(|| rand::rng().random_range(1..u64::MAX))
    }
}

// ── Results ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct SimulationSummary {
    pub sequence_length: u64,
    pub num_sites: usize,
    pub contig_id: String,
    pub path: PathBuf,
    /// Seed the run used; `None` when a caller-supplied backend was given
    /// no seed.
    pub random_seed: Option<u64>,
}

#[derive(Clone, Debug)]
pub enum SimulationOutcome {
    /// No output path was given.
    Genealogy(Genealogy),
    Written(SimulationSummary),
}

impl SimulationOutcome {
    pub fn genealogy(&self) -> Option<&Genealogy> {
        match self {
            Self::Genealogy(g) => Some(g),
            Self::Written(_) => None,
        }
    }

    pub fn summary(&self) -> Option<&SimulationSummary> {
        match self {
            Self::Genealogy(_) => None,
            Self::Written(s) => Some(s),
        }
    }
}

// ── Rate maps ─────────────────────────────────────────────────────────────────

pub fn recombination_map(param: &RateParameter, sequence_length: u64) -> Result<RateMap> {
    match param {
        RateParameter::Scalar(rate) => RateMap::uniform(sequence_length, *rate),
        RateParameter::EmpiricalFile(path) => {
            let map = read_genetic_map(path)?;
            info!(path = %path.display(), points = map.len(), "read genetic map");
            RateMap::from_genetic_map(&map.coordinates, &map.values, sequence_length)
        }
    }
}

pub fn mutation_map(
    param: &RateParameter,
    sequence_length: u64,
    window_size: Option<usize>,
) -> Result<RateMap> {
    match param {
        RateParameter::Scalar(rate) => RateMap::uniform(sequence_length, *rate),
        RateParameter::EmpiricalFile(path) => {
            let track = read_rate_track(path)?;
            info!(path = %path.display(), rows = track.len(), "read mutation-rate track");
            match window_size {
                Some(window_size) => {
                    let mut coordinates = track.coordinates;
                    coordinates[0] = 0.0;
                    let keep = coordinates
                        .iter()
                        .filter(|&&x| x < sequence_length as f64)
                        .count();
                    build_rate_map(
                        &coordinates[..keep],
                        &track.values[..keep],
                        window_size,
                        sequence_length,
                    )
                }
                None => RateMap::from_track(&track.coordinates, &track.values, sequence_length),
            }
        }
    }
}

fn provenance(params: &Parameters, seed: u64) -> Result<String> {
    let record = json!({
        "software": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "parameters": {
            "command": "simulate",
            "random_seed": seed,
            "sequence_length": params.sequence_length,
            "recombination_rate": params.recombination.to_string(),
            "mutation_rate": params.mutation.to_string(),
            "sampled_demes": params.sampled_demes,
        },
    });
    Ok(serde_json::to_string(&record)?)
}

fn run<B: SimulationBackend>(
    backend: &mut B,
    graph: GraphSource,
    params: &Parameters,
    recombination: &RateMap,
    mutation: &RateMap,
) -> Result<Genealogy> {
    let model = graph.into_model()?;
    let samples = SampleConfiguration::new(&model, params.sampled_demes.as_deref())?;

    info!(
        sequence_length = params.sequence_length,
        individuals = samples.num_individuals(),
        "simulating ancestry"
    );
    let genealogy = backend.simulate_ancestry(
        &model,
        &samples,
        params.sequence_length,
        recombination,
    )?;

    info!(trees = genealogy.num_trees(), "simulating mutations");
    backend.simulate_mutations(genealogy, mutation)
}

fn write_output(
    genealogy: &Genealogy,
    contig_id: &str,
    path: &Path,
    random_seed: Option<u64>,
) -> Result<SimulationSummary> {
    write_vcf(genealogy, contig_id, path)?;
    let summary = SimulationSummary {
        sequence_length: genealogy.sequence_length(),
        num_sites: genealogy.num_sites(),
        contig_id: contig_id.to_string(),
        path: path.to_path_buf(),
        random_seed,
    };
    info!(
        "{} bp simulated on contig {} ({} sites) and saved at {}",
        summary.sequence_length,
        summary.contig_id,
        summary.num_sites,
        path.display()
    );
    Ok(summary)
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Simulates under constant rates. Without `out_fname` the genealogy is
/// returned; with it, a VCF is written and a summary returned.
pub fn simulate(
    graph: impl Into<GraphSource>,
    params: &Parameters,
    out_fname: Option<&Path>,
) -> Result<SimulationOutcome> {
    let seed = params.seed();
    let mut backend = HudsonCoalescent::new(seed).with_progress(params.show_progress);
    simulate_seeded(&mut backend, seed, graph.into(), params, out_fname)
}

pub fn simulate_with_backend<B: SimulationBackend>(
    backend: &mut B,
    graph: impl Into<GraphSource>,
    params: &Parameters,
    out_fname: Option<&Path>,
) -> Result<SimulationOutcome> {
    let seed = params.seed();
    simulate_seeded(backend, seed, graph.into(), params, out_fname)
}

fn simulate_seeded<B: SimulationBackend>(
    backend: &mut B,
    seed: u64,
    graph: GraphSource,
    params: &Parameters,
    out_fname: Option<&Path>,
) -> Result<SimulationOutcome> {
    let (Some(r), Some(u)) = (params.recombination.as_scalar(), params.mutation.as_scalar())
    else {
        return Err(SimError::configuration(
            "simulate takes scalar rates; use simulate_chromosome for rate files",
        ));
    };
    let recombination = RateMap::uniform(params.sequence_length, r)?;
    let mutation = RateMap::uniform(params.sequence_length, u)?;
    info!(seed, "random seed");

    let mut genealogy = run(backend, graph, params, &recombination, &mutation)?;
    genealogy.set_provenance(Some(provenance(params, seed)?));

    match out_fname {
        None => Ok(SimulationOutcome::Genealogy(genealogy)),
        Some(path) => Ok(SimulationOutcome::Written(write_output(
            &genealogy,
            &params.contig_id,
            path,
            Some(seed),
        )?)),
    }
}

/// Simulates a chromosome whose rates may come from files, and writes a VCF.
pub fn simulate_chromosome(
    graph: impl Into<GraphSource>,
    params: &Parameters,
    out_fname: &Path,
) -> Result<SimulationSummary> {
    let seed = params.seed();
    info!(seed, "random seed");
    let mut backend = HudsonCoalescent::new(seed).with_progress(params.show_progress);
    simulate_chromosome_seeded(&mut backend, Some(seed), graph.into(), params, out_fname)
}

pub fn simulate_chromosome_with_backend<B: SimulationBackend>(
    backend: &mut B,
    graph: impl Into<GraphSource>,
    params: &Parameters,
    out_fname: &Path,
) -> Result<SimulationSummary> {
    simulate_chromosome_seeded(backend, params.random_seed, graph.into(), params, out_fname)
}

fn simulate_chromosome_seeded<B: SimulationBackend>(
    backend: &mut B,
    seed: Option<u64>,
    graph: GraphSource,
    params: &Parameters,
    out_fname: &Path,
) -> Result<SimulationSummary> {
    let recombination = recombination_map(&params.recombination, params.sequence_length)?;
    let mutation = mutation_map(&params.mutation, params.sequence_length, params.window_size)?;
    let genealogy = run(backend, graph, params, &recombination, &mutation)?;
    write_output(&genealogy, &params.contig_id, out_fname, seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demography::DemographicModel;
    use crate::demography::tests::SPLIT_MODEL;
    use tempfile::tempdir;

    /// Records what it was asked to do; returns a fixed two-sample genealogy.
    #[derive(Default)]
    struct RecordingBackend {
        ancestry_maps: Vec<RateMap>,
        mutation_maps: Vec<RateMap>,
        individuals: usize,
    }

    impl SimulationBackend for RecordingBackend {
        fn simulate_ancestry(
            &mut self,
            model: &DemographicModel,
            samples: &SampleConfiguration,
            sequence_length: u64,
            recombination: &RateMap,
        ) -> Result<Genealogy> {
            self.ancestry_maps.push(recombination.clone());
            self.individuals = samples.num_individuals();
            let names = model.demes().iter().map(|d| d.name.clone()).collect();
            let mut g = Genealogy::new(sequence_length, names, samples.individual_names());
            for set in samples.sets() {
                for _ in 0..samples.ploidy() * set.individuals {
                    g.add_node(0.0, set.deme, true);
                }
            }
            Ok(g)
        }

        fn simulate_mutations(&mut self, genealogy: Genealogy, rate: &RateMap) -> Result<Genealogy> {
            self.mutation_maps.push(rate.clone());
            Ok(genealogy)
        }
    }

    fn params() -> Parameters {
        Parameters {
            random_seed: Some(1),
            sequence_length: 1000,
            ..Default::default()
        }
    }

    #[test]
    fn defaults() {
        let p = Parameters::default();
        assert_eq!(p.sequence_length, 10_000_000);
        assert_eq!(p.recombination, RateParameter::Scalar(1e-8));
        assert_eq!(p.mutation, RateParameter::Scalar(1e-8));
        assert_eq!(p.contig_id, "0");
        assert_eq!(params().seed(), 1);
    }

    #[test]
    fn in_memory_result_with_provenance() {
        let model = DemographicModel::from_yaml(SPLIT_MODEL).unwrap();
        let mut backend = RecordingBackend::default();
        let outcome = simulate_with_backend(&mut backend, model, &params(), None).unwrap();

        let g = outcome.genealogy().unwrap();
        assert_eq!(g.samples().len(), 4);
        assert_eq!(backend.individuals, 2);
        let record: serde_json::Value = serde_json::from_str(g.provenance().unwrap()).unwrap();
        assert_eq!(record["parameters"]["random_seed"], 1);
        assert_eq!(backend.ancestry_maps[0], RateMap::uniform(1000, 1e-8).unwrap());
    }

    #[test]
    fn simulate_rejects_rate_files() {
        let model = DemographicModel::from_yaml(SPLIT_MODEL).unwrap();
        let p = Parameters {
            mutation: RateParameter::EmpiricalFile("u.bedgraph".into()),
            ..params()
        };
        let mut backend = RecordingBackend::default();
        assert!(matches!(
            simulate_with_backend(&mut backend, model, &p, None),
            Err(SimError::Configuration { .. })
        ));
        assert!(backend.ancestry_maps.is_empty());
    }

    #[test]
    fn unknown_sampled_deme() {
        let model = DemographicModel::from_yaml(SPLIT_MODEL).unwrap();
        let p = Parameters {
            sampled_demes: Some(vec!["Q".to_string()]),
            ..params()
        };
        let mut backend = RecordingBackend::default();
        assert!(simulate_with_backend(&mut backend, model, &p, None).is_err());
    }

    #[test]
    fn chromosome_from_rate_files() {
        let dir = tempdir().unwrap();
        let u_path = dir.path().join("u.bedgraph");
        std::fs::write(&u_path, "chr1\t10\t500\t1e-8\nchr1\t500\t1500\t2e-8\n").unwrap();
        let r_path = dir.path().join("map.txt");
        std::fs::write(&r_path, "pos\tcM\n100\t0.0\n600\t0.5\n").unwrap();

        let p = Parameters {
            recombination: RateParameter::EmpiricalFile(r_path),
            mutation: RateParameter::EmpiricalFile(u_path),
            contig_id: "chr1".to_string(),
            ..params()
        };
        let out = dir.path().join("chr1.vcf");
        let model = DemographicModel::from_yaml(SPLIT_MODEL).unwrap();
        let mut backend = RecordingBackend::default();
        let summary = simulate_chromosome_with_backend(&mut backend, model, &p, &out).unwrap();

        assert_eq!(summary.contig_id, "chr1");
        assert_eq!(summary.num_sites, 0);
        assert_eq!(summary.random_seed, Some(1));
        assert!(out.exists());

        let u = &backend.mutation_maps[0];
        assert_eq!(u.positions(), &[0.0, 500.0, 1000.0]);
        assert_eq!(u.rates(), &[1e-8, 2e-8]);
        let r = &backend.ancestry_maps[0];
        assert_eq!(r.positions(), &[0.0, 1000.0]);
        assert!((r.rates()[0] - 1e-5).abs() < 1e-15);
    }

    #[test]
    fn windowed_mutation_track() {
        let dir = tempdir().unwrap();
        let u_path = dir.path().join("u.txt");
        std::fs::write(&u_path, "0 1.0\n100 3.0\n200 5.0\n300 7.0\n").unwrap();
        let map = mutation_map(&RateParameter::EmpiricalFile(u_path), 1000, Some(2)).unwrap();
        assert_eq!(map.positions(), &[0.0, 200.0, 1000.0]);
        assert_eq!(map.rates(), &[2.0, 6.0]);
    }
}
