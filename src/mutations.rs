//! Neutral mutations dropped on a genealogy under a per-base rate map.
//!
//! Each edge receives a Poisson number of mutations with mean
//! `mass(left, right) * branch_length`. Mutations sharing a position form one
//! site; states follow a Jukes-Cantor model over `ACGT`.

use std::collections::{BTreeMap, HashMap};

use rand::Rng;
use rand::distr::Distribution;
use rand_distr::Poisson;
use tracing::debug;

use crate::error::{Result, SimError};
use crate::genealogy::{Genealogy, Mutation, NUCLEOTIDES, Site};
use crate::rate_map::RateMap;

/// A different nucleotide from `state`, uniformly.
fn mutate_state<R: Rng>(state: u8, rng: &mut R) -> u8 {
    let choices: Vec<u8> = NUCLEOTIDES.iter().copied().filter(|&b| b != state).collect();
    choices[rng.random_range(0..choices.len())]
}

pub fn sim_mutations<R: Rng>(
    mut genealogy: Genealogy,
    rate: &RateMap,
    rng: &mut R,
) -> Result<Genealogy> {
    if rate.sequence_length() != genealogy.sequence_length() as f64 {
        return Err(SimError::configuration(format!(
            "mutation map spans {} but the sequence length is {}",
            rate.sequence_length(),
            genealogy.sequence_length()
        )));
    }
    if genealogy.num_mutations() > 0 {
        return Err(SimError::simulation("genealogy already carries mutations"));
    }

    // position -> (node, time)
    let mut drawn: BTreeMap<u64, Vec<(usize, f64)>> = BTreeMap::new();
    let nodes = genealogy.nodes();
    for e in genealogy.edges() {
        let child_time = nodes[e.child].time;
        let branch_length = nodes[e.parent].time - child_time;
        let mass = rate.mass(e.left as f64, e.right as f64);
        let mean = mass * branch_length;
        if mean <= 0.0 {
            continue;
        }
        let dist = Poisson::new(mean).map_err(|err| SimError::simulation(err.to_string()))?;
        let count = dist.sample(rng) as usize;
        let start = rate.cumulative_mass(e.left as f64);
        for _ in 0..count {
            let x = rate.position_at_mass(start + rng.random::<f64>() * mass);
            let position = (x.floor() as u64).clamp(e.left, e.right - 1);
            let time = child_time + rng.random::<f64>() * branch_length;
            drawn.entry(position).or_default().push((e.child, time));
        }
    }

    let mut sites = Vec::with_capacity(drawn.len());
    let mut mutations: Vec<Mutation> = Vec::new();
    {
        let mut sweep = genealogy.tree_sweep();
        for (position, mut site_muts) in drawn {
            site_muts.sort_by(|a, b| b.1.total_cmp(&a.1));
            sweep.advance_to(position);

            let site = sites.len();
            let ancestral_state = NUCLEOTIDES[rng.random_range(0..NUCLEOTIDES.len())];
            sites.push(Site {
                position,
                ancestral_state,
            });

            // node -> youngest mutation placed on it so far
            let mut latest_on: HashMap<usize, usize> = HashMap::new();
            for (node, time) in site_muts {
                let parent = sweep
                    .path_to_root(node)
                    .find_map(|u| latest_on.get(&u).copied());
                let parent_state = parent
                    .map(|p| mutations[p].derived_state)
                    .unwrap_or(ancestral_state);
                let derived_state = mutate_state(parent_state, rng);
                latest_on.insert(node, mutations.len());
                mutations.push(Mutation {
                    site,
                    node,
                    time,
                    parent,
                    derived_state,
                });
            }
        }
    }

    debug!(
        num_sites = sites.len(),
        num_mutations = mutations.len(),
        "mutations placed"
    );
    genealogy.set_mutations(sites, mutations)?;
    Ok(genealogy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genealogy::tests::two_tree_genealogy;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn zero_rate_places_nothing() {
        let g = two_tree_genealogy();
        let rate = RateMap::uniform(g.sequence_length(), 0.0).unwrap();
        let mut rng = SmallRng::seed_from_u64(1);
        let g = sim_mutations(g, &rate, &mut rng).unwrap();
        assert_eq!(g.num_sites(), 0);
        assert_eq!(g.num_mutations(), 0);
    }

    #[test]
    fn sites_respect_rate_map() {
        let g = two_tree_genealogy();
        let len = g.sequence_length() as f64;
        // Only the second half mutates.
        let rate = RateMap::new(vec![0.0, 60.0, len], vec![0.0, 0.05]).unwrap();
        let mut rng = SmallRng::seed_from_u64(9);
        let g = sim_mutations(g, &rate, &mut rng).unwrap();

        assert!(g.num_sites() > 0);
        for w in g.sites().windows(2) {
            assert!(w[0].position < w[1].position);
        }
        for s in g.sites() {
            assert!(s.position >= 60 && s.position < g.sequence_length());
            assert!(NUCLEOTIDES.contains(&s.ancestral_state));
        }
    }

    #[test]
    fn mutation_states_and_times_are_consistent() {
        let g = two_tree_genealogy();
        let rate = RateMap::uniform(g.sequence_length(), 0.2).unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        let g = sim_mutations(g, &rate, &mut rng).unwrap();

        assert!(g.num_mutations() > g.num_sites());
        for m in g.mutations() {
            let state = match m.parent {
                Some(p) => {
                    let parent = &g.mutations()[p];
                    assert_eq!(parent.site, m.site);
                    assert!(parent.time >= m.time);
                    parent.derived_state
                }
                None => g.sites()[m.site].ancestral_state,
            };
            assert_ne!(m.derived_state, state);
            assert!(g.nodes()[m.node].time <= m.time);
        }
    }

    #[test]
    fn mutated_genealogy_is_rejected() {
        let g = two_tree_genealogy();
        let rate = RateMap::uniform(g.sequence_length(), 0.1).unwrap();
        let mut rng = SmallRng::seed_from_u64(5);
        let g = sim_mutations(g, &rate, &mut rng).unwrap();
        assert!(sim_mutations(g, &rate, &mut rng).is_err());
    }

    #[test]
    fn mismatched_map_is_rejected() {
        let g = two_tree_genealogy();
        let rate = RateMap::uniform(g.sequence_length() + 1, 1e-8).unwrap();
        let mut rng = SmallRng::seed_from_u64(5);
        assert!(matches!(
            sim_mutations(g, &rate, &mut rng),
            Err(SimError::Configuration { .. })
        ));
    }
}
