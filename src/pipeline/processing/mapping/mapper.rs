use std::collections::{BTreeMap, BTreeSet};

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::constants::{DEFAULT_VALUE_SOURCE, RESOURCE_PATH_PREFIX};
use crate::error::{MapperError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::mapping::counters::UsageCounters;
use crate::pipeline::processing::mapping::lookup::{Lookup, ScopeChain};
use crate::pipeline::processing::mapping::sanitize::{SanitizationChange, SanitizationConfig};
use crate::pipeline::processing::mapping::tables::{normalize_for_match, MappingTable, Vocabulary, VocabularyTable};
use crate::pipeline::record::{resource_id, MappedRecord, RawRecord, RecordId};

/// Separator used when a multi-valued raw value is written to the logs
const RAW_VALUE_SEPARATOR: &str = "|";

/// The value a canonical field ends up with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalValue {
    Unmapped,
    Single(String),
    /// Several distinct values, sorted
    Multiple(Vec<String>),
}

impl CanonicalValue {
    fn from_values<I: IntoIterator<Item = String>>(values: I) -> Self {
        let mut distinct: Vec<String> = values.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        match distinct.len() {
            0 => CanonicalValue::Unmapped,
            1 => CanonicalValue::Single(distinct.remove(0)),
            _ => CanonicalValue::Multiple(distinct),
        }
    }

    pub fn is_mapped(&self) -> bool {
        !matches!(self, CanonicalValue::Unmapped)
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            CanonicalValue::Unmapped => Vec::new(),
            CanonicalValue::Single(v) => vec![v.as_str()],
            CanonicalValue::Multiple(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            CanonicalValue::Unmapped => Value::Null,
            CanonicalValue::Single(v) => Value::String(v.clone()),
            CanonicalValue::Multiple(vs) => Value::Array(vs.iter().cloned().map(Value::String).collect()),
        }
    }

    /// Flat text form for tabular logs; empty when unmapped
    pub fn as_text(&self) -> String {
        self.values().join(RAW_VALUE_SEPARATOR)
    }
}

impl Serialize for CanonicalValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// One (record, canonical field) outcome. Appended once, never edited.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub record_id: RecordId,
    /// Set for resource-level fields
    pub resource_id: Option<String>,
    pub section: String,
    pub field: String,
    pub raw_field: Option<String>,
    pub raw_value: Option<String>,
    pub canonical_value: CanonicalValue,
    pub accepted: bool,
}

/// Pure result of resolving one canonical field against a scope chain
#[derive(Debug, Clone, PartialEq)]
pub struct FieldResolution {
    pub raw_field: Option<String>,
    pub raw_value: Option<String>,
    pub canonical: CanonicalValue,
    pub accepted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingLevel {
    Package,
    Resource,
}

/// Everything mapping one record appends. The run merges these in input order.
#[derive(Debug, Clone, Default)]
pub struct MappingAccumulator {
    pub decisions: Vec<Decision>,
    pub counters: UsageCounters,
    pub sanitization_changes: Vec<SanitizationChange>,
}

impl MappingAccumulator {
    pub fn merge(&mut self, other: MappingAccumulator) {
        self.decisions.extend(other.decisions);
        self.counters.merge(other.counters);
        self.sanitization_changes.extend(other.sanitization_changes);
    }
}

/// Candidate value found while walking the candidate list
struct Found {
    raw_field: String,
    raw_value: String,
    informative: bool,
}

/// Decides, per canonical field, which raw field and value to accept.
#[derive(Debug, Clone)]
pub struct FieldValueMapper {
    package_table: MappingTable,
    resource_table: Option<MappingTable>,
    vocabularies: VocabularyTable,
    sanitization: SanitizationConfig,
}

impl FieldValueMapper {
    pub fn new(package_table: MappingTable, vocabularies: VocabularyTable) -> Self {
        Self {
            package_table,
            resource_table: None,
            vocabularies,
            sanitization: SanitizationConfig::default(),
        }
    }

    /// Add a resource-level table. Its sections must not overlap the
    /// package-level ones since both end up as top-level sections.
    pub fn with_resource_table(mut self, table: MappingTable) -> Result<Self> {
        if let Some(section) = table.section_names().find(|s| self.package_table.has_section(s)) {
            return Err(MapperError::table(
                table.source(),
                section,
                format!(
                    "section is also defined in package-level table '{}'",
                    self.package_table.source().display()
                ),
            ));
        }
        self.resource_table = Some(table);
        Ok(self)
    }

    pub fn with_sanitization(mut self, sanitization: SanitizationConfig) -> Self {
        self.sanitization = sanitization;
        self
    }

    pub fn table(&self, level: MappingLevel) -> Option<&MappingTable> {
        match level {
            MappingLevel::Package => Some(&self.package_table),
            MappingLevel::Resource => self.resource_table.as_ref(),
        }
    }

    pub fn sanitization(&self) -> &SanitizationConfig {
        &self.sanitization
    }

    /// (section, field) pairs of `level` that carry a controlled vocabulary
    pub fn controlled_fields(&self, level: MappingLevel) -> Vec<(&str, &str)> {
        self.table(level)
            .map(|table| {
                table
                    .entries()
                    .filter(|(section, field, _)| self.vocabularies.get(section, field).is_some())
                    .map(|(section, field, _)| (section, field))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolve one canonical field without side effects. `None` when the
    /// field is not in the table for `level`.
    pub fn resolve(&self, chain: &ScopeChain<'_>, level: MappingLevel, section: &str, field: &str) -> Option<FieldResolution> {
        let candidates = self.table(level)?.candidates(section, field)?;
        let vocabulary = self.vocabularies.get(section, field);
        Some(self.resolve_candidates(chain, level, candidates, vocabulary))
    }

    fn resolve_candidates(
        &self,
        chain: &ScopeChain<'_>,
        level: MappingLevel,
        candidates: &[String],
        vocabulary: Option<&Vocabulary>,
    ) -> FieldResolution {
        let mut first_found: Option<Found> = None;
        let mut empty_match: Option<FieldResolution> = None;

        for candidate in candidates {
            let path = match level {
                MappingLevel::Resource => candidate.strip_prefix(RESOURCE_PATH_PREFIX).unwrap_or(candidate),
                MappingLevel::Package => candidate.as_str(),
            };

            let lookup = chain.resolve_with(path, |v| !v.trim().is_empty() && !self.sanitization.is_null_token(v));
            let values: Vec<&String> = match &lookup {
                Lookup::Absent => continue,
                Lookup::Found(values) => values.iter().filter(|v| !self.sanitization.is_null_token(v)).collect(),
            };
            if values.is_empty() {
                continue;
            }

            let informative: Vec<&String> = values.iter().copied().filter(|v| !v.trim().is_empty()).collect();
            let raw_value = join_values(&values);

            match vocabulary {
                Some(vocabulary) => {
                    let recognized = CanonicalValue::from_values(
                        informative
                            .iter()
                            .filter_map(|v| vocabulary.lookup(&normalize_for_match(v)))
                            .map(str::to_string),
                    );
                    if recognized.is_mapped() {
                        return accepted(candidate, raw_value, recognized);
                    }
                    // an empty value may still be a listed synonym, but only
                    // wins if nothing later is recognized
                    if empty_match.is_none() && informative.len() < values.len() {
                        if let Some(canonical) = vocabulary.lookup("") {
                            empty_match = Some(accepted(candidate, raw_value.clone(), CanonicalValue::Single(canonical.to_string())));
                        }
                    }
                }
                None => {
                    if !informative.is_empty() {
                        let canonical = CanonicalValue::from_values(informative.iter().map(|v| v.to_string()));
                        return accepted(candidate, join_values(&informative), canonical);
                    }
                }
            }

            let is_informative = !informative.is_empty();
            let replace = match &first_found {
                None => true,
                Some(found) => !found.informative && is_informative,
            };
            if replace {
                first_found = Some(Found {
                    raw_field: candidate.clone(),
                    raw_value,
                    informative: is_informative,
                });
            }
        }

        if let Some(resolution) = empty_match {
            return resolution;
        }

        let (raw_field, raw_value) = match first_found {
            Some(found) => (Some(found.raw_field), Some(found.raw_value)),
            None => (None, None),
        };

        match vocabulary.and_then(Vocabulary::default_value) {
            Some(default) => FieldResolution {
                raw_field: raw_field.or_else(|| Some(DEFAULT_VALUE_SOURCE.to_string())),
                raw_value,
                canonical: CanonicalValue::Single(default.to_string()),
                accepted: true,
            },
            None => FieldResolution {
                raw_field,
                raw_value,
                canonical: CanonicalValue::Unmapped,
                accepted: false,
            },
        }
    }

    /// Map a single package-level field of `record`, returning the value and
    /// the decision that would be logged for it.
    pub fn map_field(&self, record: &RawRecord, section: &str, field: &str) -> Option<(CanonicalValue, Decision)> {
        let chain = ScopeChain::root(record.fields());
        let resolution = self.resolve(&chain, MappingLevel::Package, section, field)?;

        let mut scratch = MappingAccumulator::default();
        let canonical = self.settle(record.id(), None, section, field, resolution, &mut scratch);
        let decision = scratch.decisions.pop()?;
        Some((canonical, decision))
    }

    /// Map every field of both tables. Package sections become objects;
    /// resource sections become arrays with one object per resource.
    pub fn map_record(&self, record: &RawRecord, acc: &mut MappingAccumulator) -> MappedRecord {
        let mut mapped = MappedRecord::new(record.id());

        let mut referenced = self.package_table.referenced_raw_fields();
        if let Some(table) = &self.resource_table {
            referenced.extend(table.referenced_raw_fields());
        }
        acc.counters.record_raw(record, &referenced);

        let chain = ScopeChain::root(record.fields());
        for (section, field, candidates) in self.package_table.entries() {
            let vocabulary = self.vocabularies.get(section, field);
            let resolution = self.resolve_candidates(&chain, MappingLevel::Package, candidates, vocabulary);
            let canonical = self.settle(record.id(), None, section, field, resolution, acc);
            if canonical.is_mapped() {
                mapped.section_mut(section).insert(field.to_string(), canonical.to_json());
            }
        }

        if let Some(table) = &self.resource_table {
            let mut lists: BTreeMap<&str, Vec<Value>> =
                table.section_names().map(|section| (section, Vec::new())).collect();

            for (position, resource) in record.resources().into_iter().enumerate() {
                let resource_chain = chain.nested(resource);
                let rid = resource_id(resource, position);
                let mut objects: BTreeMap<&str, Map<String, Value>> = BTreeMap::new();

                for (section, field, candidates) in table.entries() {
                    let vocabulary = self.vocabularies.get(section, field);
                    let resolution = self.resolve_candidates(&resource_chain, MappingLevel::Resource, candidates, vocabulary);
                    let canonical = self.settle(record.id(), Some(&rid), section, field, resolution, acc);
                    let object = objects.entry(section).or_default();
                    if canonical.is_mapped() {
                        object.insert(field.to_string(), canonical.to_json());
                    }
                }

                for (section, object) in objects {
                    if let Some(list) = lists.get_mut(section) {
                        list.push(Value::Object(object));
                    }
                }
            }

            for (section, list) in lists {
                mapped.sections.insert(section.to_string(), Value::Array(list));
            }
        }

        mapped
    }

    /// Sanitize accepted free-text values, count, and append the decision.
    fn settle(
        &self,
        record_id: &str,
        resource: Option<&str>,
        section: &str,
        field: &str,
        resolution: FieldResolution,
        acc: &mut MappingAccumulator,
    ) -> CanonicalValue {
        let FieldResolution {
            raw_field,
            raw_value,
            mut canonical,
            mut accepted,
        } = resolution;

        let controlled = self.vocabularies.get(section, field).is_some();
        if accepted && !controlled && !self.sanitization.rules_for(section, field).is_empty() {
            let mut sanitized_values = Vec::new();
            for value in canonical.values() {
                let (sanitized, rules) = self.sanitization.apply(section, field, value);
                if !rules.is_empty() {
                    acc.sanitization_changes.push(SanitizationChange {
                        record_id: record_id.to_string(),
                        section: section.to_string(),
                        field: field.to_string(),
                        original: value.to_string(),
                        sanitized: sanitized.clone(),
                        rules,
                    });
                }
                sanitized_values.extend(sanitized);
            }
            canonical = CanonicalValue::from_values(sanitized_values);
            accepted = canonical.is_mapped();
        }

        if accepted {
            let source = raw_field.as_deref().unwrap_or(DEFAULT_VALUE_SOURCE);
            acc.counters.record_mapping(section, field, source, &canonical.as_text());
        }
        metrics::mapping::decision_recorded(accepted);

        acc.decisions.push(Decision {
            record_id: record_id.to_string(),
            resource_id: resource.map(str::to_string),
            section: section.to_string(),
            field: field.to_string(),
            raw_field,
            raw_value,
            canonical_value: canonical.clone(),
            accepted,
        });

        canonical
    }
}

fn accepted(candidate: &str, raw_value: String, canonical: CanonicalValue) -> FieldResolution {
    FieldResolution {
        raw_field: Some(candidate.to_string()),
        raw_value: Some(raw_value),
        canonical,
        accepted: true,
    }
}

fn join_values(values: &[&String]) -> String {
    values.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(RAW_VALUE_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn mapper() -> FieldValueMapper {
        let package = MappingTable::from_json_str(
            r#"{
                "organism": {
                    "scientific_name": ["scientific_name", "species"],
                    "taxon_id": ["taxon_id"]
                },
                "sample": {
                    "sample_name": ["sample_name"],
                    "sex": ["sex", "sex_of_organism"],
                    "lifestage": ["lifestage", "life_stage"],
                    "collection_location": ["location_text"]
                }
            }"#,
            Path::new("package.json"),
        )
        .unwrap();
        let resource = MappingTable::from_json_str(
            r#"{"runs": {"platform": ["resources.platform", "platform"], "library_source": ["library_source"]}}"#,
            Path::new("resource.json"),
        )
        .unwrap();
        let vocab = VocabularyTable::from_json_str(
            r#"{
                "sample": {
                    "sex": {"female": ["F", "Female"], "male": ["M", "Male"]},
                    "lifestage": {"adult": ["mature"], "not collected": [null, ""]}
                },
                "runs": {"platform": {"ILLUMINA": ["illumina", "Illumina NovaSeq"], "PACBIO_SMRT": ["pacbio"]}}
            }"#,
            Path::new("vocab.json"),
            &[&package, &resource],
        )
        .unwrap();
        let sanitization = SanitizationConfig::from_json_str(
            r#"{"null_values": ["NA"], "sample": {"collection_location": ["text_sanitization"]}}"#,
            Path::new("sanitization.json"),
        )
        .unwrap();

        FieldValueMapper::new(package, vocab)
            .with_resource_table(resource)
            .unwrap()
            .with_sanitization(sanitization)
    }

    fn raw(value: Value) -> RawRecord {
        RawRecord::from_value(value, 0).unwrap()
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let mapper = mapper();
        let record = raw(json!({
            "id": "p1", "sample_name": "S1", "sex": "F", "species": "Acacia dealbata",
            "resources": [{"id": "r1", "platform": "Illumina NovaSeq"}]
        }));

        let mut first = MappingAccumulator::default();
        let mut second = MappingAccumulator::default();
        let a = mapper.map_record(&record, &mut first);
        let b = mapper.map_record(&record, &mut second);

        assert_eq!(a, b);
        assert_eq!(first.decisions, second.decisions);
    }

    #[test]
    fn test_first_candidate_with_recognized_value_wins() {
        let mapper = mapper();
        let record = raw(json!({"id": "p1", "sex": "female", "sex_of_organism": "male"}));

        let (value, decision) = mapper.map_field(&record, "sample", "sex").unwrap();
        assert_eq!(value, CanonicalValue::Single("female".to_string()));
        assert_eq!(decision.raw_field.as_deref(), Some("sex"));
        assert!(decision.accepted);
    }

    #[test]
    fn test_unrecognized_first_candidate_yields_to_later_one() {
        let mapper = mapper();
        let record = raw(json!({"id": "p1", "sex": "hermaphrodite", "sex_of_organism": "M"}));

        let (value, decision) = mapper.map_field(&record, "sample", "sex").unwrap();
        assert_eq!(value, CanonicalValue::Single("male".to_string()));
        assert_eq!(decision.raw_field.as_deref(), Some("sex_of_organism"));
    }

    #[test]
    fn test_unrecognized_value_without_default_is_unmapped() {
        let mapper = mapper();
        let record = raw(json!({"id": "p1", "sex": "hermaphrodite"}));

        let (value, decision) = mapper.map_field(&record, "sample", "sex").unwrap();
        assert_eq!(value, CanonicalValue::Unmapped);
        assert!(!decision.accepted);
        assert_eq!(decision.raw_field.as_deref(), Some("sex"));
        assert_eq!(decision.raw_value.as_deref(), Some("hermaphrodite"));
    }

    #[test]
    fn test_default_substitution_keeps_raw_value() {
        let mapper = mapper();
        let record = raw(json!({"id": "p1", "lifestage": "larval-ish"}));

        let (value, decision) = mapper.map_field(&record, "sample", "lifestage").unwrap();
        assert_eq!(value, CanonicalValue::Single("not collected".to_string()));
        assert!(decision.accepted);
        assert_eq!(decision.raw_field.as_deref(), Some("lifestage"));
        assert_eq!(decision.raw_value.as_deref(), Some("larval-ish"));

        let missing = raw(json!({"id": "p2"}));
        let (value, decision) = mapper.map_field(&missing, "sample", "lifestage").unwrap();
        assert_eq!(value, CanonicalValue::Single("not collected".to_string()));
        assert_eq!(decision.raw_field.as_deref(), Some(DEFAULT_VALUE_SOURCE));
        assert_eq!(decision.raw_value, None);
    }

    #[test]
    fn test_empty_synonym_only_wins_when_nothing_later_is_recognized() {
        let mapper = mapper();

        let record = raw(json!({"id": "p1", "lifestage": "", "life_stage": "mature"}));
        let (value, decision) = mapper.map_field(&record, "sample", "lifestage").unwrap();
        assert_eq!(value, CanonicalValue::Single("adult".to_string()));
        assert_eq!(decision.raw_field.as_deref(), Some("life_stage"));
        assert!(decision.accepted);

        let record = raw(json!({"id": "p2", "lifestage": ""}));
        let (value, decision) = mapper.map_field(&record, "sample", "lifestage").unwrap();
        assert_eq!(value, CanonicalValue::Single("not collected".to_string()));
        assert_eq!(decision.raw_field.as_deref(), Some("lifestage"));
        assert!(decision.accepted);
    }

    #[test]
    fn test_free_text_skips_empty_and_null_tokens() {
        let mapper = mapper();
        let record = raw(json!({"id": "p1", "scientific_name": "  ", "species": "Acacia dealbata"}));
        let (value, decision) = mapper.map_field(&record, "organism", "scientific_name").unwrap();
        assert_eq!(value, CanonicalValue::Single("Acacia dealbata".to_string()));
        assert_eq!(decision.raw_field.as_deref(), Some("species"));

        let record = raw(json!({"id": "p1", "scientific_name": "NA"}));
        let (value, decision) = mapper.map_field(&record, "organism", "scientific_name").unwrap();
        assert_eq!(value, CanonicalValue::Unmapped);
        assert_eq!(decision.raw_field, None);
    }

    #[test]
    fn test_resource_field_falls_back_to_parent() {
        let mapper = mapper();
        let record = raw(json!({
            "id": "p1",
            "platform": "pacbio",
            "resources": [{"id": "r1", "platform": "illumina"}, {"id": "r2"}]
        }));

        let mut acc = MappingAccumulator::default();
        let mapped = mapper.map_record(&record, &mut acc);
        let runs = mapped.section_list("runs").unwrap();

        assert_eq!(runs[0]["platform"], json!("ILLUMINA"));
        assert_eq!(runs[1]["platform"], json!("PACBIO_SMRT"));

        let r2 = acc
            .decisions
            .iter()
            .find(|d| d.resource_id.as_deref() == Some("r2") && d.field == "platform")
            .unwrap();
        assert_eq!(r2.raw_field.as_deref(), Some("resources.platform"));
        assert_eq!(r2.raw_value.as_deref(), Some("pacbio"));
    }

    #[test]
    fn test_package_path_into_resources_is_multi_valued() {
        let package = MappingTable::from_json_str(
            r#"{"experiment": {"platforms": ["resources.platform"]}}"#,
            Path::new("package.json"),
        )
        .unwrap();
        let mapper = FieldValueMapper::new(package, VocabularyTable::default());
        let record = raw(json!({
            "id": "p1",
            "resources": [{"platform": "pacbio"}, {"platform": "illumina"}, {"platform": "pacbio"}]
        }));

        let (value, decision) = mapper.map_field(&record, "experiment", "platforms").unwrap();
        assert_eq!(
            value,
            CanonicalValue::Multiple(vec!["illumina".to_string(), "pacbio".to_string()])
        );
        assert_eq!(decision.raw_value.as_deref(), Some("illumina|pacbio"));
    }

    #[test]
    fn test_sanitization_rewrites_free_text_and_logs_change() {
        let mapper = mapper();
        let record = raw(json!({"id": "p1", "location_text": " Mount   Lofty "}));

        let mut acc = MappingAccumulator::default();
        let mapped = mapper.map_record(&record, &mut acc);

        assert_eq!(mapped.field("sample", "collection_location"), Some(&json!("Mount Lofty")));
        assert_eq!(acc.sanitization_changes.len(), 1);
        assert_eq!(acc.sanitization_changes[0].original, " Mount   Lofty ");
    }

    #[test]
    fn test_unaccepted_fields_are_left_out_and_counted() {
        let mapper = mapper();
        let record = raw(json!({"id": "p1", "sample_name": "S1", "sex": "unknown", "extra": 1}));

        let mut acc = MappingAccumulator::default();
        let mapped = mapper.map_record(&record, &mut acc);

        assert_eq!(mapped.field("sample", "sample_name"), Some(&json!("S1")));
        assert_eq!(mapped.field("sample", "sex"), None);
        assert_eq!(acc.counters.mapped_fields["sample.sample_name"]["sample_name"], 1);
        assert_eq!(acc.counters.unused_fields.get("extra"), Some(&1));
        // one decision per table entry, including the empty resource section
        assert_eq!(acc.decisions.len(), 6);
    }

    #[test]
    fn test_overlapping_resource_section_is_rejected() {
        let package = MappingTable::from_json_str(r#"{"runs": {"a": ["a"]}}"#, Path::new("p.json")).unwrap();
        let resource = MappingTable::from_json_str(r#"{"runs": {"b": ["b"]}}"#, Path::new("r.json")).unwrap();
        let err = FieldValueMapper::new(package, VocabularyTable::default())
            .with_resource_table(resource)
            .unwrap_err();
        assert!(matches!(err, MapperError::Table { ref key, .. } if key == "runs"));
    }
}
