use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::app::ports::MappedRecordSink;
use crate::pipeline::{PipelineContext, RawRecord, RunSummary, StreamRunner};

/// Use case for the streaming stages: filter, map and group each record,
/// hand the survivors to a sink and fold the per-record logs together.
pub struct MapUseCase<'a> {
    runner: StreamRunner<'a>,
    max_records: Option<usize>,
}

impl<'a> MapUseCase<'a> {
    pub fn new(context: &'a PipelineContext) -> Self {
        Self {
            runner: StreamRunner::new(context),
            max_records: None,
        }
    }

    /// Stop after `limit` input records
    pub fn with_max_records(mut self, limit: Option<usize>) -> Self {
        self.max_records = limit;
        self
    }

    pub fn run<I>(&self, records: I, sink: &mut dyn MappedRecordSink) -> Result<RunSummary>
    where
        I: IntoIterator<Item = crate::error::Result<RawRecord>>,
    {
        let mut summary = RunSummary::default();
        let limit = self.max_records.unwrap_or(usize::MAX);

        for record in records.into_iter().take(limit) {
            let record = record.context("Failed to read input record")?;
            let record_id = record.id().to_string();
            let outcome = self
                .runner
                .process_record(&record)
                .with_context(|| format!("Failed to process record {}", record_id))?;

            match summary.absorb(outcome) {
                Some(mapped) => sink.write_mapped_record(&mapped)?,
                None => debug!("Record {} dropped by filter", record_id),
            }
        }
        sink.finish()?;

        info!(
            "Mapped {} records: {} kept, {} dropped, {} decisions, {} groups",
            summary.records_read,
            summary.records_kept,
            summary.records_dropped,
            summary.mapping.decisions.len(),
            summary.grouping.groups.len()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::tests::sample_context;
    use crate::pipeline::MappedRecord;
    use serde_json::json;

    fn raw(value: serde_json::Value, ordinal: usize) -> crate::error::Result<RawRecord> {
        Ok(RawRecord::from_value(value, ordinal).unwrap())
    }

    #[test]
    fn test_map_use_case_writes_kept_records_in_order() {
        let context = sample_context();
        let use_case = MapUseCase::new(&context);
        let mut sink: Vec<MappedRecord> = Vec::new();

        let records = vec![
            raw(json!({"id": "1", "scope": "genomic", "sample_name": "S1", "scientific_name": "Acacia dealbata"}), 0),
            raw(json!({"id": "2", "scope": "proteomic", "sample_name": "S2"}), 1),
            raw(json!({"id": "3", "scope": "Genome", "sample_name": "S3", "taxon_id": "3825"}), 2),
        ];

        let summary = use_case.run(records, &mut sink).unwrap();

        assert_eq!(summary.records_read, 3);
        assert_eq!(summary.records_kept, 2);
        assert_eq!(summary.records_dropped, 1);
        assert_eq!(summary.filter_log.len(), 3);
        assert_eq!(sink.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["1", "3"]);
        assert_eq!(
            sink[1].field("organism", "organism_grouping_key"),
            Some(&json!("taxon_3825"))
        );
    }

    #[test]
    fn test_max_records_limits_input() {
        let context = sample_context();
        let use_case = MapUseCase::new(&context).with_max_records(Some(1));
        let mut sink: Vec<MappedRecord> = Vec::new();

        let records = vec![
            raw(json!({"id": "1", "scope": "genomic"}), 0),
            raw(json!({"id": "2", "scope": "genomic"}), 1),
        ];

        let summary = use_case.run(records, &mut sink).unwrap();
        assert_eq!(summary.records_read, 1);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_read_error_aborts_run() {
        let context = sample_context();
        let use_case = MapUseCase::new(&context);
        let mut sink: Vec<MappedRecord> = Vec::new();

        let records = vec![
            raw(json!({"id": "1", "scope": "genomic"}), 0),
            Err(crate::error::MapperError::Config("bad line".to_string())),
        ];

        assert!(use_case.run(records, &mut sink).is_err());
    }
}
