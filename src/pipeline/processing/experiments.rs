use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::warn;

use crate::constants::{EXPERIMENT_SECTION, PACKAGE_ID_FIELD, RUNS_SECTION, SAMPLE_SECTION};
use crate::pipeline::record::{scalar_text, MappedRecord};

/// Experiment package id → experiment section with its runs and sample key.
/// Records without an experiment package id are left out; the first record
/// wins when two share an id.
pub fn extract_experiments(records: &[MappedRecord], sample_key_field: &str) -> BTreeMap<String, Map<String, Value>> {
    let mut experiments = BTreeMap::new();

    for record in records {
        let Some(experiment) = record.section(EXPERIMENT_SECTION) else {
            continue;
        };
        let Some(package_id) = experiment.get(PACKAGE_ID_FIELD).and_then(scalar_text) else {
            continue;
        };
        if experiments.contains_key(&package_id) {
            warn!("Experiment package {} appears in more than one record; keeping the first", package_id);
            continue;
        }

        let mut entry = experiment.clone();
        entry.insert(
            RUNS_SECTION.to_string(),
            record
                .sections
                .get(RUNS_SECTION)
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new())),
        );
        entry.insert(
            sample_key_field.to_string(),
            record.field(SAMPLE_SECTION, sample_key_field).cloned().unwrap_or(Value::Null),
        );
        experiments.insert(package_id, entry);
    }

    experiments
}
