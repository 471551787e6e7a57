//! Coalescent simulation of genomic variation under demes-style demographic
//! models, with empirical rate maps, VCF output and analytic coalescence-rate
//! trajectories.

pub mod coalescence;
pub mod coalescent;
pub mod demography;
pub mod error;
pub mod genealogy;
pub mod mutations;
pub mod rate_files;
pub mod rate_map;
pub mod simulation;
pub mod vcf;

pub use coalescence::{CoalescenceTrajectory, coalescence_rate_trajectory, get_coalescent_rate};
pub use coalescent::HudsonCoalescent;
pub use demography::{DemographicModel, GraphSource, SampleConfiguration};
pub use error::{Result, SimError};
pub use genealogy::Genealogy;
pub use rate_map::{RateMap, RateParameter, build_rate_map};
pub use simulation::{
    Parameters, SimulationOutcome, SimulationSummary, simulate, simulate_chromosome,
    simulate_chromosome_with_backend, simulate_with_backend,
};
pub use vcf::{VcfWriter, one_based, write_vcf};

/// An engine that generates genealogies and overlays mutations on them.
pub trait SimulationBackend {
    /// Genealogy of `samples` over `[0, sequence_length)` under `model`.
    fn simulate_ancestry(
        &mut self,
        model: &DemographicModel,
        samples: &SampleConfiguration,
        sequence_length: u64,
        recombination: &RateMap,
    ) -> Result<Genealogy>;

    /// Adds sites and mutations to a genealogy that has none.
    fn simulate_mutations(&mut self, genealogy: Genealogy, rate: &RateMap) -> Result<Genealogy>;
}
