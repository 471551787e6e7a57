//! Simulated genealogies: nodes and edges of the ancestral recombination
//! graph on integer coordinates, plus the sites and mutations laid on it.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::error::{Result, SimError};

pub const NUCLEOTIDES: [u8; 4] = *b"ACGT";

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub time: f64,
    pub population: usize,
    pub is_sample: bool,
}

/// `child` inherits `[left, right)` from `parent`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    pub left: u64,
    pub right: u64,
    pub parent: usize,
    pub child: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Site {
    pub position: u64,
    pub ancestral_state: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Mutation {
    pub site: usize,
    pub node: usize,
    pub time: f64,
    pub parent: Option<usize>,
    pub derived_state: u8,
}

#[derive(
    serde::Serialize, serde::Deserialize, tskit::metadata::tskit_derive::PopulationMetadata,
)]
#[serializer("serde_json")]
pub struct PopulationMetadata {
    pub name: String,
}

// ── Genealogy ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct Genealogy {
    sequence_length: u64,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    population_names: Vec<String>,
    /// Sample nodes, `PLOIDY` consecutive entries per individual.
    samples: Vec<usize>,
    individual_names: Vec<String>,
    sites: Vec<Site>,
    /// Grouped by site, oldest first within a site.
    mutations: Vec<Mutation>,
    provenance: Option<String>,
}

impl Genealogy {
    pub fn new(
        sequence_length: u64,
        population_names: Vec<String>,
        individual_names: Vec<String>,
    ) -> Self {
        Self {
            sequence_length,
            nodes: Vec::new(),
            edges: Vec::new(),
            population_names,
            samples: Vec::new(),
            individual_names,
            sites: Vec::new(),
            mutations: Vec::new(),
            provenance: None,
        }
    }

    pub fn add_node(&mut self, time: f64, population: usize, is_sample: bool) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            time,
            population,
            is_sample,
        });
        if is_sample {
            self.samples.push(id);
        }
        id
    }

    pub fn add_edge(&mut self, left: u64, right: u64, parent: usize, child: usize) {
        self.edges.push(Edge {
            left,
            right,
            parent,
            child,
        });
    }

    /// Sorts edges and joins abutting intervals of the same parent/child pair.
    pub fn squash_edges(&mut self) {
        self.edges.sort_by_key(|e| (e.parent, e.child, e.left));
        let mut squashed: Vec<Edge> = Vec::with_capacity(self.edges.len());
        for e in self.edges.drain(..) {
            match squashed.last_mut() {
                Some(last)
                    if last.parent == e.parent && last.child == e.child && last.right == e.left =>
                {
                    last.right = e.right;
                }
                _ => squashed.push(e),
            }
        }
        let nodes = &self.nodes;
        squashed.sort_by(|a, b| {
            nodes[a.parent]
                .time
                .total_cmp(&nodes[b.parent].time)
                .then(a.parent.cmp(&b.parent))
                .then(a.child.cmp(&b.child))
                .then(a.left.cmp(&b.left))
        });
        self.edges = squashed;
    }

    /// Replaces the sites and mutations. Sites must be sorted by position and
    /// mutations grouped by site, oldest first.
    pub fn set_mutations(&mut self, sites: Vec<Site>, mutations: Vec<Mutation>) -> Result<()> {
        for w in sites.windows(2) {
            if w[1].position <= w[0].position {
                return Err(SimError::simulation("sites are not sorted by position"));
            }
        }
        if let Some(last) = sites.last() {
            if last.position >= self.sequence_length {
                return Err(SimError::simulation(format!(
                    "site at {} is beyond the sequence length {}",
                    last.position, self.sequence_length
                )));
            }
        }
        for (i, m) in mutations.iter().enumerate() {
            if m.site >= sites.len() || m.node >= self.nodes.len() {
                return Err(SimError::simulation(format!(
                    "mutation {i} refers to a missing site or node"
                )));
            }
            if m.parent.is_some_and(|p| p >= i) {
                return Err(SimError::simulation(format!(
                    "mutation {i} has a parent listed after it"
                )));
            }
            if i > 0 {
                let prev = &mutations[i - 1];
                if prev.site > m.site || (prev.site == m.site && prev.time < m.time) {
                    return Err(SimError::simulation("mutations are not sorted"));
                }
            }
        }
        self.sites = sites;
        self.mutations = mutations;
        Ok(())
    }

    pub fn set_provenance(&mut self, record: Option<String>) {
        self.provenance = record;
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn sequence_length(&self) -> u64 {
        self.sequence_length
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn samples(&self) -> &[usize] {
        &self.samples
    }

    pub fn population_names(&self) -> &[String] {
        &self.population_names
    }

    pub fn individual_names(&self) -> &[String] {
        &self.individual_names
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn provenance(&self) -> Option<&str> {
        self.provenance.as_deref()
    }

    pub fn num_sites(&self) -> usize {
        self.sites.len()
    }

    pub fn num_mutations(&self) -> usize {
        self.mutations.len()
    }

    /// Number of distinct marginal trees along the sequence.
    pub fn num_trees(&self) -> usize {
        let breakpoints: BTreeSet<u64> = self
            .edges
            .iter()
            .flat_map(|e| [e.left, e.right])
            .filter(|&x| x > 0 && x < self.sequence_length)
            .collect();
        breakpoints.len() + 1
    }

    pub fn tree_sweep(&self) -> TreeSweep<'_> {
        TreeSweep::new(self)
    }

    pub fn variants(&self) -> Variants<'_> {
        Variants {
            genealogy: self,
            sweep: self.tree_sweep(),
            site: 0,
            cursor: 0,
        }
    }

    // ── tskit export ──────────────────────────────────────────────────────────

    pub fn to_tree_sequence(&self) -> Result<tskit::TreeSequence> {
        let mut tables = tskit::TableCollection::new(self.sequence_length as f64)?;

        let mut populations = tskit::PopulationTable::default();
        for name in &self.population_names {
            let meta = PopulationMetadata { name: name.clone() };
            let _ = populations.add_row_with_metadata(&meta)?;
        }
        tables.set_populations(&populations)?;

        for node in &self.nodes {
            let flags = if node.is_sample {
                tskit::NodeFlags::new_sample()
            } else {
                tskit::NodeFlags::from(0)
            };
            tables.add_node(
                flags,
                node.time,
                tskit::PopulationId::from(node.population as i32),
                -1,
            )?;
        }
        for e in &self.edges {
            tables.add_edge(
                e.left as f64,
                e.right as f64,
                tskit::NodeId::from(e.parent as i32),
                tskit::NodeId::from(e.child as i32),
            )?;
        }
        for site in &self.sites {
            tables.add_site(site.position as f64, Some([site.ancestral_state].as_slice()))?;
        }
        for m in &self.mutations {
            let parent = m
                .parent
                .map(|p| tskit::MutationId::from(p as i32))
                .unwrap_or(tskit::MutationId::NULL);
            tables.add_mutation(
                tskit::SiteId::from(m.site as i32),
                tskit::NodeId::from(m.node as i32),
                parent,
                m.time,
                Some([m.derived_state].as_slice()),
            )?;
        }
        if let Some(record) = &self.provenance {
            tables.add_provenance(record)?;
        }

        tables.full_sort(tskit::TableSortOptions::default())?;
        tables.build_index()?;
        let tree_sequence = tables.tree_sequence(tskit::TreeSequenceFlags::default())?;
        Ok(tree_sequence)
    }

    /// Writes the genealogy as a tskit `.trees` file.
    pub fn dump(&self, path: &Path) -> Result<()> {
        let ts = self.to_tree_sequence()?;
        ts.dump(
            path.to_string_lossy().as_ref(),
            tskit::TableOutputOptions::default(),
        )?;
        Ok(())
    }
}

// ── Tree sweep ────────────────────────────────────────────────────────────────

/// Left-to-right walk over the marginal trees, keeping a parent array.
pub struct TreeSweep<'a> {
    edges: &'a [Edge],
    parent: Vec<Option<usize>>,
    insertion: Vec<usize>,
    removal: Vec<usize>,
    next_in: usize,
    next_out: usize,
    position: u64,
}

impl<'a> TreeSweep<'a> {
    fn new(genealogy: &'a Genealogy) -> Self {
        let edges = genealogy.edges.as_slice();
        let mut insertion: Vec<usize> = (0..edges.len()).collect();
        insertion.sort_by_key(|&i| edges[i].left);
        let mut removal: Vec<usize> = (0..edges.len()).collect();
        removal.sort_by_key(|&i| edges[i].right);
        Self {
            edges,
            parent: vec![None; genealogy.nodes.len()],
            insertion,
            removal,
            next_in: 0,
            next_out: 0,
            position: 0,
        }
    }

    /// Moves to the tree covering `position`. Positions must not decrease.
    pub fn advance_to(&mut self, position: u64) {
        debug_assert!(position >= self.position);
        self.position = position;
        while self.next_out < self.removal.len()
            && self.edges[self.removal[self.next_out]].right <= position
        {
            let e = self.edges[self.removal[self.next_out]];
            if self.parent[e.child] == Some(e.parent) {
                self.parent[e.child] = None;
            }
            self.next_out += 1;
        }
        while self.next_in < self.insertion.len()
            && self.edges[self.insertion[self.next_in]].left <= position
        {
            let e = self.edges[self.insertion[self.next_in]];
            if e.right > position {
                self.parent[e.child] = Some(e.parent);
            }
            self.next_in += 1;
        }
    }

    pub fn parent(&self, node: usize) -> Option<usize> {
        self.parent[node]
    }

    /// `node` followed by its ancestors up to the root of the current tree.
    pub fn path_to_root(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(Some(node), move |&u| self.parent[u])
    }

    pub fn root_of(&self, node: usize) -> usize {
        self.path_to_root(node).last().unwrap_or(node)
    }
}

// ── Variants ──────────────────────────────────────────────────────────────────

/// Alleles and per-sample-node genotypes at one site. `alleles[0]` is the
/// ancestral state.
#[derive(Clone, Debug, PartialEq)]
pub struct Variant {
    pub site: usize,
    pub position: u64,
    pub alleles: Vec<u8>,
    pub genotypes: Vec<usize>,
}

pub struct Variants<'a> {
    genealogy: &'a Genealogy,
    sweep: TreeSweep<'a>,
    site: usize,
    cursor: usize,
}

impl Iterator for Variants<'_> {
    type Item = Variant;

    fn next(&mut self) -> Option<Variant> {
        let g = self.genealogy;
        let site = g.sites.get(self.site)?;
        self.sweep.advance_to(site.position);

        let start = self.cursor;
        while self.cursor < g.mutations.len() && g.mutations[self.cursor].site == self.site {
            self.cursor += 1;
        }
        let site_muts = &g.mutations[start..self.cursor];

        // Oldest first, so the youngest mutation on a node wins.
        let mut state_on: HashMap<usize, u8> = HashMap::with_capacity(site_muts.len());
        let mut alleles = vec![site.ancestral_state];
        for m in site_muts {
            state_on.insert(m.node, m.derived_state);
            if !alleles.contains(&m.derived_state) {
                alleles.push(m.derived_state);
            }
        }

        let genotypes = g
            .samples
            .iter()
            .map(|&s| {
                let state = self
                    .sweep
                    .path_to_root(s)
                    .find_map(|u| state_on.get(&u).copied())
                    .unwrap_or(site.ancestral_state);
                alleles.iter().position(|&a| a == state).unwrap_or(0)
            })
            .collect();

        let variant = Variant {
            site: self.site,
            position: site.position,
            alleles,
            genotypes,
        };
        self.site += 1;
        Some(variant)
    }
}
