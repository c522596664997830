use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::constants::{
    GROUPING_KEY_FIELD, NCBI_NAME_SOURCE, ORGANISM_SECTION, REFERENCE_DATASET_FIELD, REFERENCE_DATASET_HOPS_FIELD,
    SCIENTIFIC_NAME_FIELD, SCIENTIFIC_NAME_SOURCE_FIELD, TAXON_ID_FIELD, TAXON_RANK_FIELD,
};
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::processing::taxonomy::{ReferenceDatasets, TaxonId, TaxonomyIndex};
use crate::pipeline::record::{MappedRecord, RecordId};

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
/// Anything outside the characters allowed in a normalized name
static OUTSIDE_NAME_ALPHABET: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{Ll}\p{Nd} .\-]").unwrap());

/// Identity of an organism cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupingKey {
    /// Taxon id confirmed by the taxonomy
    Taxon(TaxonId),
    /// Normalized scientific name
    Name(String),
}

impl fmt::Display for GroupingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupingKey::Taxon(id) => write!(f, "taxon_{}", id),
            GroupingKey::Name(name) => write!(f, "name_{}", name.replace(' ', "_")),
        }
    }
}

impl Serialize for GroupingKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parse a mapped taxon id. Blank values and `0` mean "no taxon";
/// integral floats such as `"3825.0"` are accepted.
pub fn parse_taxon_id(value: &Value) -> Option<TaxonId> {
    let parsed = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f > 0.0).map(|f| f as TaxonId)),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.parse::<TaxonId>().ok().or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0 && *f > 0.0)
                    .map(|f| f as TaxonId)
            })
        }
        _ => None,
    };
    parsed.filter(|id| *id != 0)
}

/// Case-fold, keep only name characters and collapse whitespace.
/// `None` when nothing usable remains.
pub fn normalize_name(name: &str) -> Option<String> {
    let lowered = name.to_lowercase();
    let spaced = WHITESPACE_RUN.replace_all(&lowered, " ");
    let kept = OUTSIDE_NAME_ALPHABET.replace_all(&spaced, "");
    let collapsed = WHITESPACE_RUN.replace_all(kept.trim(), " ").into_owned();
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// How a record's key was derived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDerivation {
    pub key: Option<GroupingKey>,
    pub taxon_id_used: Option<TaxonId>,
    pub name_used: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupingLogEntry {
    pub record_id: RecordId,
    pub grouping_key: Option<String>,
    pub taxon_id_used: Option<TaxonId>,
    pub name_used: Option<String>,
}

/// Grouping log plus key → members, in input order
#[derive(Debug, Clone, Default)]
pub struct GroupingAccumulator {
    pub log: Vec<GroupingLogEntry>,
    pub groups: BTreeMap<GroupingKey, Vec<RecordId>>,
    pub ungrouped: Vec<RecordId>,
}

impl GroupingAccumulator {
    pub fn merge(&mut self, other: GroupingAccumulator) {
        self.log.extend(other.log);
        for (key, members) in other.groups {
            let existing = self.groups.entry(key).or_default();
            for member in members {
                if !existing.contains(&member) {
                    existing.push(member);
                }
            }
        }
        self.ungrouped.extend(other.ungrouped);
    }

    /// The grouped-output artifact, keyed by the rendered key
    pub fn grouped_output(&self) -> BTreeMap<String, Vec<RecordId>> {
        self.groups
            .iter()
            .map(|(key, members)| (key.to_string(), members.clone()))
            .collect()
    }
}

/// Derives organism grouping keys and enriches organism sections from the
/// taxonomy.
#[derive(Debug, Clone, Default)]
pub struct OrganismGrouper {
    taxonomy: Option<Arc<TaxonomyIndex>>,
    datasets: Option<Arc<ReferenceDatasets>>,
    lineage_ranks: Vec<String>,
}

impl OrganismGrouper {
    pub fn new(taxonomy: Option<Arc<TaxonomyIndex>>) -> Self {
        Self {
            taxonomy,
            datasets: None,
            lineage_ranks: Vec::new(),
        }
    }

    pub fn with_reference_datasets(mut self, datasets: Arc<ReferenceDatasets>) -> Self {
        self.datasets = Some(datasets);
        self
    }

    pub fn with_lineage_ranks(mut self, ranks: Vec<String>) -> Self {
        self.lineage_ranks = ranks;
        self
    }

    /// Key for an organism section: a confirmed taxon id, else the
    /// normalized scientific name.
    pub fn grouping_key(&self, organism: Option<&Map<String, Value>>) -> KeyDerivation {
        let taxon_id = organism
            .and_then(|o| o.get(TAXON_ID_FIELD))
            .and_then(parse_taxon_id)
            .filter(|id| self.taxonomy.as_ref().map_or(false, |index| index.contains(*id)));

        if let Some(id) = taxon_id {
            return KeyDerivation {
                key: Some(GroupingKey::Taxon(id)),
                taxon_id_used: Some(id),
                name_used: None,
            };
        }

        let name = organism
            .and_then(|o| o.get(SCIENTIFIC_NAME_FIELD))
            .and_then(Value::as_str)
            .and_then(normalize_name);

        KeyDerivation {
            key: name.clone().map(GroupingKey::Name),
            taxon_id_used: None,
            name_used: name,
        }
    }

    /// Key the record, enrich its organism section and log the outcome.
    pub fn group(&self, record: &mut MappedRecord, acc: &mut GroupingAccumulator) -> Result<Option<GroupingKey>> {
        let derivation = self.grouping_key(record.section(ORGANISM_SECTION));

        if let Some(taxon_id) = derivation.taxon_id_used {
            self.enrich(record, taxon_id)?;
        }

        match &derivation.key {
            Some(key) => {
                record
                    .section_mut(ORGANISM_SECTION)
                    .insert(GROUPING_KEY_FIELD.to_string(), Value::String(key.to_string()));
                let members = acc.groups.entry(key.clone()).or_default();
                if !members.iter().any(|m| m == &record.id) {
                    members.push(record.id.clone());
                }
                metrics::grouping::record_grouped(derivation.taxon_id_used.is_some());
            }
            None => {
                debug!("Record {} has no usable taxon id or scientific name", record.id);
                acc.ungrouped.push(record.id.clone());
                metrics::grouping::record_ungrouped();
            }
        }

        acc.log.push(GroupingLogEntry {
            record_id: record.id.clone(),
            grouping_key: derivation.key.as_ref().map(ToString::to_string),
            taxon_id_used: derivation.taxon_id_used,
            name_used: derivation.name_used.clone(),
        });

        Ok(derivation.key)
    }

    fn enrich(&self, record: &mut MappedRecord, taxon_id: TaxonId) -> Result<()> {
        let Some(index) = &self.taxonomy else {
            return Ok(());
        };
        let Some(node) = index.get(taxon_id) else {
            return Ok(());
        };

        let mut additions = Map::new();
        additions.insert(TAXON_ID_FIELD.to_string(), json!(taxon_id.to_string()));
        additions.insert(SCIENTIFIC_NAME_FIELD.to_string(), json!(node.scientific_name));
        additions.insert(SCIENTIFIC_NAME_SOURCE_FIELD.to_string(), json!(NCBI_NAME_SOURCE));
        additions.insert(TAXON_RANK_FIELD.to_string(), json!(node.rank));

        for rank in &self.lineage_ranks {
            let value = index.rank_value(taxon_id, rank)?.map(|name| json!(name)).unwrap_or(Value::Null);
            additions.insert(rank.clone(), value);
        }

        if let Some(datasets) = &self.datasets {
            match datasets.nearest(index, taxon_id)? {
                Some(found) => {
                    let ids = if found.datasets.len() == 1 {
                        json!(found.datasets[0])
                    } else {
                        json!(found.datasets)
                    };
                    additions.insert(REFERENCE_DATASET_FIELD.to_string(), ids);
                    additions.insert(REFERENCE_DATASET_HOPS_FIELD.to_string(), json!(found.hops));
                }
                None => {
                    additions.insert(REFERENCE_DATASET_FIELD.to_string(), Value::Null);
                    additions.insert(REFERENCE_DATASET_HOPS_FIELD.to_string(), Value::Null);
                }
            }
        }

        record.section_mut(ORGANISM_SECTION).extend(additions);
        Ok(())
    }
}
