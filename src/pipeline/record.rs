use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{RECORD_ID_FIELD, RESOURCES_FIELD};

/// Identifier of a source package, carried unchanged through every stage
pub type RecordId = String;

/// One source package as read from the archive dump.
///
/// The field map is never mutated once constructed; the filter stage builds a
/// new record when it drops resources.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    id: RecordId,
    fields: Map<String, Value>,
}

impl RawRecord {
    /// Wrap a JSON object. Records without an `id` get a positional one so
    /// every log row can still be traced back to its input line.
    pub fn from_value(value: Value, ordinal: usize) -> Option<Self> {
        match value {
            Value::Object(fields) => {
                let id = fields
                    .get(RECORD_ID_FIELD)
                    .and_then(scalar_text)
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| format!("record_{}", ordinal));
                Some(Self { id, fields })
            }
            _ => None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    /// Nested resource objects, in input order. Non-object entries are skipped.
    pub fn resources(&self) -> Vec<&Map<String, Value>> {
        match self.fields.get(RESOURCES_FIELD) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
            _ => Vec::new(),
        }
    }

    /// A copy of this record keeping only the resources at the given
    /// positions of `resources()`.
    pub fn retain_resources(&self, keep: &[usize]) -> RawRecord {
        let kept: Vec<Value> = self
            .resources()
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| keep.contains(idx))
            .map(|(_, resource)| Value::Object(resource.clone()))
            .collect();

        let mut fields = self.fields.clone();
        fields.insert(RESOURCES_FIELD.to_string(), Value::Array(kept));
        RawRecord {
            id: self.id.clone(),
            fields,
        }
    }
}

/// Identifier for a resource: its own `id` field, else its position
pub fn resource_id(resource: &Map<String, Value>, position: usize) -> String {
    resource
        .get(RECORD_ID_FIELD)
        .and_then(scalar_text)
        .unwrap_or_else(|| format!("resource_{}", position))
}

/// A record after field/value mapping: one object per package-level section,
/// one array of objects per resource-level section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedRecord {
    pub id: RecordId,
    #[serde(flatten)]
    pub sections: BTreeMap<String, Value>,
}

impl MappedRecord {
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            sections: BTreeMap::new(),
        }
    }

    pub fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.sections.get(name).and_then(Value::as_object)
    }

    /// Object section, created empty if missing or not an object.
    pub fn section_mut(&mut self, name: &str) -> &mut Map<String, Value> {
        let entry = self
            .sections
            .entry(name.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry {
            Value::Object(map) => map,
            _ => unreachable!("section was just replaced with an object"),
        }
    }

    pub fn section_list(&self, name: &str) -> Option<&Vec<Value>> {
        self.sections.get(name).and_then(Value::as_array)
    }

    /// A field of an object section, skipping nulls
    pub fn field(&self, section: &str, field: &str) -> Option<&Value> {
        self.section(section)
            .and_then(|s| s.get(field))
            .filter(|v| !v.is_null())
    }
}

/// Text form of a scalar JSON value. Null, arrays and objects have none.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_id_falls_back_to_ordinal() {
        let with_id = RawRecord::from_value(json!({"id": 42, "x": "y"}), 3).unwrap();
        assert_eq!(with_id.id(), "42");

        let without_id = RawRecord::from_value(json!({"x": "y"}), 3).unwrap();
        assert_eq!(without_id.id(), "record_3");

        assert!(RawRecord::from_value(json!(["not", "an", "object"]), 0).is_none());
    }

    #[test]
    fn test_retain_resources_keeps_selected_positions() {
        let record = RawRecord::from_value(
            json!({"id": "p1", "resources": [{"id": "r1"}, {"id": "r2"}, {"id": "r3"}]}),
            0,
        )
        .unwrap();

        let filtered = record.retain_resources(&[0, 2]);
        let ids: Vec<String> = filtered
            .resources()
            .iter()
            .enumerate()
            .map(|(i, r)| resource_id(r, i))
            .collect();
        assert_eq!(ids, vec!["r1", "r3"]);
        // the source record is untouched
        assert_eq!(record.resources().len(), 3);
    }

    #[test]
    fn test_mapped_record_round_trips_flattened_sections() {
        let mut mapped = MappedRecord::new("p1");
        mapped
            .section_mut("sample")
            .insert("sample_name".to_string(), json!("S1"));
        mapped
            .sections
            .insert("runs".to_string(), json!([{"platform": "illumina"}]));

        let text = serde_json::to_string(&mapped).unwrap();
        let parsed: MappedRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, mapped);
        assert_eq!(parsed.field("sample", "sample_name"), Some(&json!("S1")));
        assert_eq!(parsed.section_list("runs").map(Vec::len), Some(1));
    }
}
