use serde::Serialize;

use crate::pipeline::processing::mapping::{FieldValueMapper, MappingLevel, ScopeChain};
use crate::pipeline::record::{resource_id, RawRecord, RecordId};

/// Outcome of one controlled field during filtering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldCheck {
    /// Empty for package-level fields
    pub resource_id: Option<String>,
    pub section: String,
    pub field: String,
    pub value: String,
    pub accepted: bool,
}

/// One filter-log entry per record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterLogEntry {
    pub record_id: RecordId,
    pub keep: bool,
    pub kept_resources: usize,
    pub dropped_resources: usize,
    pub checks: Vec<FieldCheck>,
}

#[derive(Debug, Clone)]
pub struct FilterOutcome {
    /// The record with rejected resources removed; `None` when dropped
    pub record: Option<RawRecord>,
    pub entry: FilterLogEntry,
}

/// Keeps records whose controlled-vocabulary fields are all accepted.
///
/// Resources are checked the same way when a resource-level table exists;
/// rejected resources are removed and a record left with none is dropped.
pub struct FilterStage<'a> {
    mapper: &'a FieldValueMapper,
}

impl<'a> FilterStage<'a> {
    pub fn new(mapper: &'a FieldValueMapper) -> Self {
        Self { mapper }
    }

    pub fn evaluate(&self, record: &RawRecord) -> FilterOutcome {
        let chain = ScopeChain::root(record.fields());
        let mut checks = Vec::new();

        let mut package_ok = true;
        for (section, field) in self.mapper.controlled_fields(MappingLevel::Package) {
            let accepted = self.check(&chain, MappingLevel::Package, None, section, field, &mut checks);
            package_ok &= accepted;
        }

        let resources = record.resources();
        let resource_fields = self.mapper.controlled_fields(MappingLevel::Resource);
        let filter_resources = self.mapper.table(MappingLevel::Resource).is_some();

        let mut kept = Vec::new();
        if filter_resources {
            for (position, resource) in resources.iter().enumerate() {
                let resource_chain = chain.nested(resource);
                let rid = resource_id(resource, position);
                let mut resource_ok = true;
                for (section, field) in &resource_fields {
                    let accepted = self.check(&resource_chain, MappingLevel::Resource, Some(&rid), section, field, &mut checks);
                    resource_ok &= accepted;
                }
                if resource_ok {
                    kept.push(position);
                }
            }
        }

        let keep = package_ok && (!filter_resources || !kept.is_empty());
        let (kept_resources, dropped_resources) = if filter_resources {
            (kept.len(), resources.len() - kept.len())
        } else {
            (resources.len(), 0)
        };

        let entry = FilterLogEntry {
            record_id: record.id().to_string(),
            keep,
            kept_resources,
            dropped_resources,
            checks,
        };

        let record = match (keep, filter_resources) {
            (false, _) => None,
            (true, true) if dropped_resources > 0 => Some(record.retain_resources(&kept)),
            (true, _) => Some(record.clone()),
        };

        FilterOutcome { record, entry }
    }

    fn check(
        &self,
        chain: &ScopeChain<'_>,
        level: MappingLevel,
        resource: Option<&str>,
        section: &str,
        field: &str,
        checks: &mut Vec<FieldCheck>,
    ) -> bool {
        let Some(resolution) = self.mapper.resolve(chain, level, section, field) else {
            return true;
        };
        checks.push(FieldCheck {
            resource_id: resource.map(str::to_string),
            section: section.to_string(),
            field: field.to_string(),
            value: resolution.raw_value.clone().unwrap_or_default(),
            accepted: resolution.accepted,
        });
        resolution.accepted
    }
}
