use anyhow::Result;
use tracing::info;

use crate::app::ports::ReportWriterPort;
use crate::pipeline::runner::EntityReports;
use crate::pipeline::{MappedRecord, PipelineContext};

/// Use case for the batch stage: resolve samples, organisms and specimens
/// over every mapped record and write the entity reports.
pub struct ResolveUseCase<'a> {
    context: &'a PipelineContext,
    output: &'a dyn ReportWriterPort,
}

impl<'a> ResolveUseCase<'a> {
    pub fn new(context: &'a PipelineContext, output: &'a dyn ReportWriterPort) -> Self {
        Self { context, output }
    }

    pub fn resolve(&self, records: &[MappedRecord]) -> Result<EntityReports> {
        let reports = EntityReports::resolve(self.context, records);

        for report in reports.reports() {
            info!(
                "{}: {} unique, {} excluded by conflicts, {} records without a key",
                report.kind,
                report.included_count(),
                report.excluded_count(),
                report.skipped.len()
            );
        }
        info!("{} experiments extracted", reports.experiments.len());

        self.output.write_entity_reports(&reports)?;
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::tests::sample_context;
    use crate::pipeline::RunSummary;
    use serde_json::json;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingWriter {
        entity_reports: RefCell<usize>,
    }

    impl ReportWriterPort for RecordingWriter {
        fn write_run_summary(&self, _summary: &RunSummary) -> Result<()> {
            Ok(())
        }

        fn write_entity_reports(&self, _reports: &EntityReports) -> Result<()> {
            *self.entity_reports.borrow_mut() += 1;
            Ok(())
        }

        fn write_metrics(&self, _rendered: &str) -> Result<()> {
            Ok(())
        }
    }

    fn mapped(id: &str, sample: serde_json::Value) -> MappedRecord {
        let mut record = MappedRecord::new(id);
        record.sections.insert("sample".to_string(), sample);
        record
    }

    #[test]
    fn test_conflicting_samples_are_excluded_but_mapped() {
        let context = sample_context();
        let writer = RecordingWriter::default();
        let use_case = ResolveUseCase::new(&context, &writer);

        let records = vec![
            mapped("1", json!({"sample_name": "S1", "sex": "female"})),
            mapped("2", json!({"sample_name": "S1", "sex": "male"})),
            mapped("3", json!({"sample_name": "S2", "sex": "male"})),
        ];

        let reports = use_case.resolve(&records).unwrap();

        let table = reports.samples.unique_entity_table();
        assert!(!table.contains_key("S1"));
        assert!(table.contains_key("S2"));
        assert_eq!(reports.samples.package_map()["S1"], vec!["1", "2"]);
        assert_eq!(*writer.entity_reports.borrow(), 1);
    }
}
