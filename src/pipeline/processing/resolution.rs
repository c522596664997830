use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::constants::{GROUPING_KEY_FIELD, ORGANISM_SECTION, SAMPLE_SECTION, SPECIMEN_ID_FIELD, TAXON_ID_FIELD};
use crate::observability::metrics;
use crate::pipeline::record::{MappedRecord, RecordId};

/// What makes records the same entity, and which of their fields merge
pub trait EntityKind {
    fn name(&self) -> &'static str;

    /// Fields the identity key is built from; never reported as conflicts
    fn key_fields(&self) -> Vec<&str>;

    fn identity_key(&self, record: &MappedRecord) -> Option<String>;

    /// The fields this record contributes to its entity
    fn entity_fields(&self, record: &MappedRecord) -> Map<String, Value>;

    /// Pick a value for a field the members disagree on instead of raising a
    /// conflict. `values` holds at least two distinct values.
    fn settle_disagreement(&self, _field: &str, _values: &[Value]) -> Option<Value> {
        None
    }
}

/// Samples keyed by sample name. The access-date field settles on the most
/// recent date.
#[derive(Debug, Clone)]
pub struct SampleKind {
    pub key_field: String,
    pub access_date_field: String,
}

impl EntityKind for SampleKind {
    fn name(&self) -> &'static str {
        "sample"
    }

    fn key_fields(&self) -> Vec<&str> {
        vec![self.key_field.as_str()]
    }

    fn identity_key(&self, record: &MappedRecord) -> Option<String> {
        record.field(SAMPLE_SECTION, &self.key_field).and_then(key_text)
    }

    fn entity_fields(&self, record: &MappedRecord) -> Map<String, Value> {
        let mut fields = record.section(SAMPLE_SECTION).cloned().unwrap_or_default();
        if let Some(key) = record.field(ORGANISM_SECTION, GROUPING_KEY_FIELD) {
            fields.insert(GROUPING_KEY_FIELD.to_string(), key.clone());
        }
        fields
    }

    fn settle_disagreement(&self, field: &str, values: &[Value]) -> Option<Value> {
        if field == self.access_date_field {
            most_recent_date(values)
        } else {
            None
        }
    }
}

/// Organisms keyed by grouping key
#[derive(Debug, Clone, Default)]
pub struct OrganismKind;

impl EntityKind for OrganismKind {
    fn name(&self) -> &'static str {
        "organism"
    }

    fn key_fields(&self) -> Vec<&str> {
        vec![GROUPING_KEY_FIELD]
    }

    fn identity_key(&self, record: &MappedRecord) -> Option<String> {
        record.field(ORGANISM_SECTION, GROUPING_KEY_FIELD).and_then(key_text)
    }

    fn entity_fields(&self, record: &MappedRecord) -> Map<String, Value> {
        record.section(ORGANISM_SECTION).cloned().unwrap_or_default()
    }
}

/// Specimens keyed by (taxon id, specimen id); sample fields minus the
/// sample key, plus the taxon id.
#[derive(Debug, Clone)]
pub struct SpecimenKind {
    pub sample_key_field: String,
}

impl EntityKind for SpecimenKind {
    fn name(&self) -> &'static str {
        "specimen"
    }

    fn key_fields(&self) -> Vec<&str> {
        vec![TAXON_ID_FIELD, SPECIMEN_ID_FIELD]
    }

    fn identity_key(&self, record: &MappedRecord) -> Option<String> {
        let taxon = record.field(ORGANISM_SECTION, TAXON_ID_FIELD).and_then(key_text)?;
        let specimen = record.field(SAMPLE_SECTION, SPECIMEN_ID_FIELD).and_then(key_text)?;
        Some(format!("{}:{}", taxon, specimen))
    }

    fn entity_fields(&self, record: &MappedRecord) -> Map<String, Value> {
        let mut fields = record.section(SAMPLE_SECTION).cloned().unwrap_or_default();
        fields.remove(&self.sample_key_field);
        if let Some(taxon) = record.field(ORGANISM_SECTION, TAXON_ID_FIELD) {
            fields.insert(TAXON_ID_FIELD.to_string(), taxon.clone());
        }
        fields
    }
}

fn key_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Full timestamp of an ISO date or datetime; a bare date reads as midnight.
/// Offsets are normalized to UTC.
fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(stamp) = DateTime::parse_from_rfc3339(text) {
        return Some(stamp.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(stamp) = NaiveDateTime::parse_from_str(text, format) {
            return Some(stamp);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?.and_hms_opt(0, 0, 0)
}

/// The latest of a set of ISO dates or datetimes. `None` if any value is
/// not a date.
pub fn most_recent_date(values: &[Value]) -> Option<Value> {
    let mut latest: Option<(NaiveDateTime, &Value)> = None;
    for value in values {
        let stamp = parse_timestamp(value.as_str()?)?;
        if latest.map_or(true, |(best, _)| stamp > best) {
            latest = Some((stamp, value));
        }
    }
    latest.map(|(_, value)| value.clone())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Add,
    Merge,
    ResolveDate,
}

/// Audit entry for one step of building an entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformationChange {
    pub entity_key: String,
    pub action: ChangeAction,
    pub record_id: Option<RecordId>,
    pub field: Option<String>,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniqueEntity {
    pub key: String,
    pub fields: Map<String, Value>,
    pub record_ids: Vec<RecordId>,
    /// Blocking disagreements: field → distinct values in first-seen order
    pub conflicts: BTreeMap<String, Vec<Value>>,
    /// Disagreements on ignored fields; logged, merged value set to null
    pub ignored_conflicts: BTreeMap<String, Vec<Value>>,
    pub included: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictRow {
    pub entity_key: String,
    pub field: String,
    pub values: Vec<Value>,
    pub ignored: bool,
}

/// Result of resolving one entity kind over the whole run
#[derive(Debug, Clone, Default)]
pub struct ResolutionReport {
    pub kind: &'static str,
    /// Every partition, in order of first appearance
    pub entities: Vec<UniqueEntity>,
    /// Records with no identity key for this kind
    pub skipped: Vec<RecordId>,
    pub changes: Vec<TransformationChange>,
}

impl ResolutionReport {
    pub fn unique_entities(&self) -> impl Iterator<Item = &UniqueEntity> {
        self.entities.iter().filter(|e| e.included)
    }

    /// Included entities only: key → merged fields
    pub fn unique_entity_table(&self) -> BTreeMap<String, Map<String, Value>> {
        self.unique_entities()
            .map(|e| (e.key.clone(), e.fields.clone()))
            .collect()
    }

    /// One row per conflicting field, blocking rows before ignored ones
    /// within an entity.
    pub fn conflicts(&self) -> Vec<ConflictRow> {
        let mut rows = Vec::new();
        for entity in &self.entities {
            for (ignored, table) in [(false, &entity.conflicts), (true, &entity.ignored_conflicts)] {
                for (field, values) in table {
                    rows.push(ConflictRow {
                        entity_key: entity.key.clone(),
                        field: field.clone(),
                        values: values.clone(),
                        ignored,
                    });
                }
            }
        }
        rows
    }

    /// Identity key → contributing records, included or not
    pub fn package_map(&self) -> BTreeMap<String, Vec<RecordId>> {
        self.entities
            .iter()
            .map(|e| (e.key.clone(), e.record_ids.clone()))
            .collect()
    }

    pub fn included_count(&self) -> usize {
        self.unique_entities().count()
    }

    pub fn excluded_count(&self) -> usize {
        self.entities.len() - self.included_count()
    }
}

/// Clusters mapped records by identity key and merges each cluster.
pub struct EntityResolver<K: EntityKind> {
    kind: K,
    ignored_fields: BTreeSet<String>,
}

impl<K: EntityKind> EntityResolver<K> {
    pub fn new(kind: K) -> Self {
        Self {
            kind,
            ignored_fields: BTreeSet::new(),
        }
    }

    pub fn with_ignored_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn resolve(&self, records: &[MappedRecord]) -> ResolutionReport {
        let mut order: Vec<String> = Vec::new();
        let mut partitions: HashMap<String, Vec<&MappedRecord>> = HashMap::new();
        let mut skipped = Vec::new();

        for record in records {
            match self.kind.identity_key(record) {
                Some(key) => {
                    let members = partitions.entry(key.clone()).or_insert_with(|| {
                        order.push(key);
                        Vec::new()
                    });
                    members.push(record);
                }
                None => {
                    debug!("Record {} has no {} identity key", record.id, self.kind.name());
                    skipped.push(record.id.clone());
                }
            }
        }

        let mut changes = Vec::new();
        let mut entities = Vec::with_capacity(order.len());
        for key in order {
            let members = partitions.remove(&key).unwrap_or_default();
            let entity = self.merge_partition(key, &members, &mut changes);
            metrics::resolution::entity_resolved(self.kind.name(), entity.included);
            entities.push(entity);
        }

        let report = ResolutionReport {
            kind: self.kind.name(),
            entities,
            skipped,
            changes,
        };
        info!(
            "Resolved {} {} entities: {} included, {} excluded, {} records without key",
            report.entities.len(),
            report.kind,
            report.included_count(),
            report.excluded_count(),
            report.skipped.len()
        );
        report
    }

    fn merge_partition(
        &self,
        key: String,
        members: &[&MappedRecord],
        changes: &mut Vec<TransformationChange>,
    ) -> UniqueEntity {
        let mut seen: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        let mut record_ids = Vec::with_capacity(members.len());

        for (position, member) in members.iter().enumerate() {
            for (field, value) in self.kind.entity_fields(member) {
                if value.is_null() {
                    continue;
                }
                let values = seen.entry(field).or_default();
                if !values.contains(&value) {
                    values.push(value);
                }
            }
            if !record_ids.contains(&member.id) {
                record_ids.push(member.id.clone());
            }
            changes.push(TransformationChange {
                entity_key: key.clone(),
                action: if position == 0 { ChangeAction::Add } else { ChangeAction::Merge },
                record_id: Some(member.id.clone()),
                field: None,
                value: None,
            });
        }

        let key_fields = self.kind.key_fields();
        let mut fields = Map::new();
        let mut conflicts = BTreeMap::new();
        let mut ignored_conflicts = BTreeMap::new();

        for (field, mut values) in seen {
            if values.len() == 1 || key_fields.contains(&field.as_str()) {
                fields.insert(field, values.swap_remove(0));
                continue;
            }

            if let Some(settled) = self.kind.settle_disagreement(&field, &values) {
                changes.push(TransformationChange {
                    entity_key: key.clone(),
                    action: ChangeAction::ResolveDate,
                    record_id: None,
                    field: Some(field.clone()),
                    value: Some(settled.clone()),
                });
                fields.insert(field, settled);
                continue;
            }

            let ignored = self.ignored_fields.contains(&field);
            metrics::resolution::conflict_detected(self.kind.name(), ignored);
            if ignored {
                fields.insert(field.clone(), Value::Null);
                ignored_conflicts.insert(field, values);
            } else {
                conflicts.insert(field, values);
            }
        }

        let included = conflicts.is_empty();
        UniqueEntity {
            key,
            fields,
            record_ids,
            conflicts,
            ignored_conflicts,
            included,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DEFAULT_ACCESS_DATE_FIELD, DEFAULT_SAMPLE_KEY_FIELD};
    use serde_json::json;

    fn mapped(id: &str, sample: Value, organism: Value) -> MappedRecord {
        let mut record = MappedRecord::new(id);
        record.sections.insert(SAMPLE_SECTION.to_string(), sample);
        record.sections.insert(ORGANISM_SECTION.to_string(), organism);
        record
    }

    fn samples() -> EntityResolver<SampleKind> {
        EntityResolver::new(SampleKind {
            key_field: DEFAULT_SAMPLE_KEY_FIELD.to_string(),
            access_date_field: DEFAULT_ACCESS_DATE_FIELD.to_string(),
        })
    }

    #[test]
    fn test_conflicting_sample_is_excluded_but_mapped() {
        let records = vec![
            mapped("1", json!({"sample_name": "S1", "sex": "female"}), json!({})),
            mapped("2", json!({"sample_name": "S1", "sex": "male"}), json!({})),
        ];

        let report = samples().resolve(&records);

        assert_eq!(report.unique_entity_table().get("S1"), None);
        assert_eq!(
            report.conflicts(),
            vec![ConflictRow {
                entity_key: "S1".to_string(),
                field: "sex".to_string(),
                values: vec![json!("female"), json!("male")],
                ignored: false,
            }]
        );
        assert_eq!(report.package_map()["S1"], vec!["1".to_string(), "2".to_string()]);
        assert_eq!(report.excluded_count(), 1);
    }

    #[test]
    fn test_agreeing_members_merge_and_missing_fields_do_not_conflict() {
        let records = vec![
            mapped("1", json!({"sample_name": "S1", "sex": "female"}), json!({})),
            mapped("2", json!({"sample_name": "S1", "sex": "female", "tissue": "leaf"}), json!({})),
            mapped("3", json!({"sample_name": "S2", "sex": null}), json!({})),
        ];

        let report = samples().resolve(&records);
        let table = report.unique_entity_table();

        assert_eq!(table["S1"]["sex"], json!("female"));
        assert_eq!(table["S1"]["tissue"], json!("leaf"));
        assert!(table["S2"].get("sex").is_none());
        assert!(report.conflicts().is_empty());

        let actions: Vec<ChangeAction> = report.changes.iter().map(|c| c.action).collect();
        assert_eq!(actions, vec![ChangeAction::Add, ChangeAction::Merge, ChangeAction::Add]);
    }

    #[test]
    fn test_ignored_conflict_is_logged_and_nulled() {
        let records = vec![
            mapped("1", json!({"sample_name": "S1", "description": "first"}), json!({})),
            mapped("2", json!({"sample_name": "S1", "description": "second"}), json!({})),
        ];

        let report = samples().with_ignored_fields(["description"]).resolve(&records);
        let table = report.unique_entity_table();

        assert_eq!(table["S1"]["description"], Value::Null);
        let rows = report.conflicts();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].ignored);
    }

    #[test]
    fn test_access_date_takes_most_recent() {
        let records = vec![
            mapped("1", json!({"sample_name": "S1", "sample_access_date": "2021-03-04"}), json!({})),
            mapped("2", json!({"sample_name": "S1", "sample_access_date": "2023-01-02T10:00:00"}), json!({})),
            mapped("3", json!({"sample_name": "S1", "sample_access_date": "2022-12-31"}), json!({})),
        ];

        let report = samples().resolve(&records);
        assert_eq!(
            report.unique_entity_table()["S1"]["sample_access_date"],
            json!("2023-01-02T10:00:00")
        );
        assert!(report
            .changes
            .iter()
            .any(|c| c.action == ChangeAction::ResolveDate && c.field.as_deref() == Some("sample_access_date")));
    }

    #[test]
    fn test_unparseable_access_date_is_a_conflict() {
        let records = vec![
            mapped("1", json!({"sample_name": "S1", "sample_access_date": "2021-03-04"}), json!({})),
            mapped("2", json!({"sample_name": "S1", "sample_access_date": "last spring"}), json!({})),
        ];

        let report = samples().resolve(&records);
        assert_eq!(report.included_count(), 0);
        assert_eq!(report.conflicts()[0].field, "sample_access_date");
    }

    #[test]
    fn test_sample_seen_under_two_organisms_conflicts() {
        let records = vec![
            mapped("1", json!({"sample_name": "S1"}), json!({"organism_grouping_key": "taxon_1"})),
            mapped("2", json!({"sample_name": "S1"}), json!({"organism_grouping_key": "taxon_2"})),
        ];

        let report = samples().resolve(&records);
        assert_eq!(report.conflicts()[0].field, GROUPING_KEY_FIELD);
    }

    #[test]
    fn test_records_without_key_are_skipped() {
        let records = vec![
            mapped("1", json!({"sex": "female"}), json!({})),
            mapped("2", json!({"sample_name": "  "}), json!({})),
        ];
        let report = samples().resolve(&records);
        assert!(report.entities.is_empty());
        assert_eq!(report.skipped, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_organisms_partition_by_grouping_key() {
        let records = vec![
            mapped("1", json!({}), json!({"organism_grouping_key": "taxon_3825", "taxon_id": "3825"})),
            mapped("2", json!({}), json!({"organism_grouping_key": "taxon_3825", "taxon_id": "3825"})),
            mapped("3", json!({}), json!({"organism_grouping_key": "name_acacia_sp."})),
        ];
        let report = EntityResolver::new(OrganismKind).resolve(&records);

        let keys: Vec<&str> = report.entities.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["taxon_3825", "name_acacia_sp."]);
        assert_eq!(report.package_map()["taxon_3825"].len(), 2);
        assert_eq!(report.included_count(), 2);
    }

    #[test]
    fn test_specimens_key_on_taxon_and_specimen() {
        let kind = SpecimenKind {
            sample_key_field: DEFAULT_SAMPLE_KEY_FIELD.to_string(),
        };
        let records = vec![
            mapped("1", json!({"sample_name": "S1", "specimen_id": "SP1", "sex": "female"}), json!({"taxon_id": "3825"})),
            mapped("2", json!({"sample_name": "S2", "specimen_id": "SP1", "sex": "female"}), json!({"taxon_id": "3825"})),
            mapped("3", json!({"sample_name": "S3", "specimen_id": "SP1"}), json!({})),
        ];
        let report = EntityResolver::new(kind).resolve(&records);

        let table = report.unique_entity_table();
        assert_eq!(table.len(), 1);
        let specimen = &table["3825:SP1"];
        assert_eq!(specimen["taxon_id"], json!("3825"));
        assert!(specimen.get("sample_name").is_none());
        assert_eq!(report.skipped, vec!["3".to_string()]);
    }

    #[test]
    fn test_most_recent_date_requires_every_value_to_parse() {
        assert_eq!(
            most_recent_date(&[json!("2020-01-01"), json!("2020-06-01")]),
            Some(json!("2020-06-01"))
        );
        assert_eq!(most_recent_date(&[json!("2020-01-01"), json!(5)]), None);
    }

    #[test]
    fn test_most_recent_date_compares_time_of_day() {
        assert_eq!(
            most_recent_date(&[json!("2023-01-02T08:00:00"), json!("2023-01-02T10:00:00")]),
            Some(json!("2023-01-02T10:00:00"))
        );
        assert_eq!(
            most_recent_date(&[json!("2023-01-02T10:00:00+00:00"), json!("2023-01-02T09:30:00Z")]),
            Some(json!("2023-01-02T10:00:00+00:00"))
        );
        // a bare date is midnight of that day
        assert_eq!(
            most_recent_date(&[json!("2023-01-02T00:30:00"), json!("2023-01-02")]),
            Some(json!("2023-01-02T00:30:00"))
        );
        assert_eq!(most_recent_date(&[json!("2023-01-02T25:00:00")]), None);
    }
}
