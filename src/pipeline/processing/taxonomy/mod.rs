pub mod cache;
pub mod datasets;
pub mod parser;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MapperError, Result};
use crate::observability::metrics;

pub use cache::TaxonomyCache;
pub use datasets::{DatasetMatch, ReferenceDatasets};

pub type TaxonId = u64;

/// One taxon. Parent links are ids into the same index, never references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonNode {
    pub taxon_id: TaxonId,
    /// Equal to `taxon_id` (or 0) for the root
    pub parent_id: TaxonId,
    pub rank: String,
    pub scientific_name: String,
    #[serde(default)]
    pub synonyms: BTreeSet<String>,
}

impl TaxonNode {
    pub fn is_root(&self) -> bool {
        self.parent_id == self.taxon_id || self.parent_id == 0
    }
}

/// Closest reference-dataset ancestor of a taxon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NearestMatch {
    pub taxon_id: TaxonId,
    /// Parent hops from the query taxon; 0 when the taxon itself matches
    pub hops: usize,
}

/// The taxonomy as an arena of nodes with an id → slot index.
///
/// Built once at startup and shared read-only afterwards. Construction
/// guarantees a single root, no dangling parents and no cycles, so every
/// upward walk terminates at the root.
#[derive(Debug, Clone)]
pub struct TaxonomyIndex {
    nodes: Vec<TaxonNode>,
    slots: HashMap<TaxonId, usize>,
    /// parent slot per node; `None` for the root
    parents: Vec<Option<usize>>,
    depths: Vec<usize>,
    root: usize,
}

impl TaxonomyIndex {
    /// Parse the dump files directly
    pub fn load(nodes_path: &Path, names_path: &Path) -> Result<Self> {
        let nodes = parser::read_taxdump(nodes_path, names_path)?;
        let index = Self::build(nodes, nodes_path)?;
        info!("Loaded taxonomy with {} nodes from {}", index.len(), nodes_path.display());
        metrics::taxonomy::loaded(index.len(), false);
        Ok(index)
    }

    /// Load through the on-disk cache in `cache_dir`
    pub fn load_cached(nodes_path: &Path, names_path: &Path, cache_dir: &Path) -> Result<Self> {
        let fingerprint = TaxonomyCache::fingerprint(&[nodes_path, names_path])?;
        let cache = TaxonomyCache::open_in(cache_dir)?;

        if let Some(nodes) = cache.get(&fingerprint)? {
            info!("Taxonomy cache hit ({}), {} nodes", &fingerprint[..12], nodes.len());
            match Self::build(nodes.into_iter().map(|n| (0, n)).collect(), nodes_path) {
                Ok(index) => {
                    metrics::taxonomy::loaded(index.len(), true);
                    return Ok(index);
                }
                Err(e) => warn!("Cached taxonomy is unusable, re-parsing: {}", e),
            }
        }

        info!("Taxonomy cache miss ({}), parsing dump files", &fingerprint[..12]);
        let index = Self::load(nodes_path, names_path)?;
        cache.put(&fingerprint, &index.nodes)?;
        Ok(index)
    }

    /// Validate and index nodes. Each node carries the line it came from
    /// (0 when unknown) for error messages against `origin`.
    pub fn build(entries: Vec<(usize, TaxonNode)>, origin: &Path) -> Result<Self> {
        let mut slots = HashMap::with_capacity(entries.len());
        let mut lines = Vec::with_capacity(entries.len());
        let mut nodes = Vec::with_capacity(entries.len());
        let mut root: Option<usize> = None;

        for (line, node) in entries {
            let slot = nodes.len();
            if slots.insert(node.taxon_id, slot).is_some() {
                return Err(MapperError::taxdump(origin, line, format!("duplicate taxon id {}", node.taxon_id)));
            }
            if node.is_root() {
                if let Some(existing) = root {
                    let existing: &TaxonNode = &nodes[existing];
                    return Err(MapperError::taxdump(
                        origin,
                        line,
                        format!("duplicate root: {} and {}", existing.taxon_id, node.taxon_id),
                    ));
                }
                root = Some(slot);
            }
            lines.push(line);
            nodes.push(node);
        }

        let root = root.ok_or_else(|| MapperError::taxdump(origin, 0, "no root node"))?;

        let mut parents = Vec::with_capacity(nodes.len());
        for (slot, node) in nodes.iter().enumerate() {
            if slot == root {
                parents.push(None);
                continue;
            }
            match slots.get(&node.parent_id) {
                Some(parent) => parents.push(Some(*parent)),
                None => {
                    return Err(MapperError::taxdump(
                        origin,
                        lines[slot],
                        format!("taxon {} has dangling parent {}", node.taxon_id, node.parent_id),
                    ))
                }
            }
        }

        let depths = compute_depths(&nodes, &parents, root, &lines, origin)?;

        Ok(Self {
            nodes,
            slots,
            parents,
            depths,
            root,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, taxon_id: TaxonId) -> bool {
        self.slots.contains_key(&taxon_id)
    }

    pub fn get(&self, taxon_id: TaxonId) -> Option<&TaxonNode> {
        self.slots.get(&taxon_id).map(|slot| &self.nodes[*slot])
    }

    pub fn root(&self) -> &TaxonNode {
        &self.nodes[self.root]
    }

    /// Distance from the root, 0 for the root itself
    pub fn depth(&self, taxon_id: TaxonId) -> Option<usize> {
        self.slots.get(&taxon_id).map(|slot| self.depths[*slot])
    }

    pub fn nodes(&self) -> &[TaxonNode] {
        &self.nodes
    }

    fn slot(&self, taxon_id: TaxonId) -> Result<usize> {
        self.slots
            .get(&taxon_id)
            .copied()
            .ok_or(MapperError::TaxonNotFound(taxon_id))
    }

    fn walk_up(&self, slot: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(Some(slot), move |current| self.parents[*current])
    }

    /// Nodes from `taxon_id` up to the root, leaf first
    pub fn lineage(&self, taxon_id: TaxonId) -> Result<Vec<&TaxonNode>> {
        let slot = self.slot(taxon_id)?;
        Ok(self.walk_up(slot).map(|s| &self.nodes[s]).collect())
    }

    /// Scientific name of the closest ancestor (or self) at `rank`
    pub fn rank_value(&self, taxon_id: TaxonId, rank: &str) -> Result<Option<&str>> {
        let slot = self.slot(taxon_id)?;
        Ok(self
            .walk_up(slot)
            .map(|s| &self.nodes[s])
            .find(|node| node.rank == rank)
            .map(|node| node.scientific_name.as_str()))
    }

    /// Closest member of `candidates` on the path from `taxon_id` to the
    /// root. The walk stops at the first hit, which is also the deepest one.
    pub fn nearest_dataset(&self, taxon_id: TaxonId, candidates: &HashSet<TaxonId>) -> Result<Option<NearestMatch>> {
        let slot = self.slot(taxon_id)?;
        Ok(self
            .walk_up(slot)
            .enumerate()
            .find(|(_, s)| candidates.contains(&self.nodes[*s].taxon_id))
            .map(|(hops, s)| NearestMatch {
                taxon_id: self.nodes[s].taxon_id,
                hops,
            }))
    }
}

fn compute_depths(
    nodes: &[TaxonNode],
    parents: &[Option<usize>],
    root: usize,
    lines: &[usize],
    origin: &Path,
) -> Result<Vec<usize>> {
    let mut depths: Vec<Option<usize>> = vec![None; nodes.len()];
    depths[root] = Some(0);

    for start in 0..nodes.len() {
        if depths[start].is_some() {
            continue;
        }

        let mut path = Vec::new();
        let mut on_path = HashSet::new();
        let mut current = start;
        let base = loop {
            if let Some(depth) = depths[current] {
                break depth;
            }
            if !on_path.insert(current) {
                return Err(MapperError::taxdump(
                    origin,
                    lines[current],
                    format!("cycle through taxon {}", nodes[current].taxon_id),
                ));
            }
            path.push(current);
            // only the root lacks a parent and its depth is already set
            current = match parents[current] {
                Some(parent) => parent,
                None => break 0,
            };
        };

        let mut depth = base;
        for slot in path.into_iter().rev() {
            depth += 1;
            depths[slot] = Some(depth);
        }
    }

    Ok(depths.into_iter().map(|d| d.unwrap_or(0)).collect())
}
