use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::constants::RESOURCE_PATH_PREFIX;
use crate::pipeline::record::{scalar_text, RawRecord};

/// Frequency tables gathered while mapping. Each record produces its own
/// instance; the run merges them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageCounters {
    /// raw field → records carrying it
    pub raw_fields: BTreeMap<String, u64>,
    /// raw field → scalar value → occurrences
    pub raw_values: BTreeMap<String, BTreeMap<String, u64>>,
    /// `section.field` → chosen raw field → accepted decisions
    pub mapped_fields: BTreeMap<String, BTreeMap<String, u64>>,
    /// `section.field` → canonical value → accepted decisions
    pub mapped_values: BTreeMap<String, BTreeMap<String, u64>>,
    /// raw fields no mapping table refers to → records carrying them
    pub unused_fields: BTreeMap<String, u64>,
}

impl UsageCounters {
    /// Count the raw fields and values of a record. Resource fields are
    /// counted under `resources.<name>`.
    pub fn record_raw(&mut self, record: &RawRecord, referenced: &BTreeSet<&str>) {
        self.count_object(record.fields(), "", referenced);
        for resource in record.resources() {
            self.count_object(resource, RESOURCE_PATH_PREFIX, referenced);
        }
    }

    fn count_object(&mut self, object: &Map<String, Value>, prefix: &str, referenced: &BTreeSet<&str>) {
        for (name, value) in object {
            // nested resource lists are counted element by element
            if prefix.is_empty() && is_object_list(value) {
                continue;
            }
            let key = format!("{}{}", prefix, name);
            *self.raw_fields.entry(key.clone()).or_default() += 1;

            if let Some(text) = scalar_text(value) {
                *self
                    .raw_values
                    .entry(key.clone())
                    .or_default()
                    .entry(text)
                    .or_default() += 1;
            }

            if !referenced.contains(name.as_str()) && !referenced.contains(key.as_str()) {
                *self.unused_fields.entry(key).or_default() += 1;
            }
        }
    }

    pub fn record_mapping(&mut self, section: &str, field: &str, raw_field: &str, canonical: &str) {
        let key = format!("{}.{}", section, field);
        *self
            .mapped_fields
            .entry(key.clone())
            .or_default()
            .entry(raw_field.to_string())
            .or_default() += 1;
        *self
            .mapped_values
            .entry(key)
            .or_default()
            .entry(canonical.to_string())
            .or_default() += 1;
    }

    pub fn merge(&mut self, other: UsageCounters) {
        merge_counts(&mut self.raw_fields, other.raw_fields);
        merge_nested(&mut self.raw_values, other.raw_values);
        merge_nested(&mut self.mapped_fields, other.mapped_fields);
        merge_nested(&mut self.mapped_values, other.mapped_values);
        merge_counts(&mut self.unused_fields, other.unused_fields);
    }
}

fn is_object_list(value: &Value) -> bool {
    value
        .as_array()
        .map_or(false, |items| items.iter().any(Value::is_object))
}

fn merge_counts(into: &mut BTreeMap<String, u64>, from: BTreeMap<String, u64>) {
    for (key, count) in from {
        *into.entry(key).or_default() += count;
    }
}

fn merge_nested(into: &mut BTreeMap<String, BTreeMap<String, u64>>, from: BTreeMap<String, BTreeMap<String, u64>>) {
    for (key, counts) in from {
        merge_counts(into.entry(key).or_default(), counts);
    }
}
