use anyhow::Result;

use crate::pipeline::runner::EntityReports;
use crate::pipeline::{MappedRecord, RunSummary};

/// Destination for mapped records as they leave the streaming stages
pub trait MappedRecordSink {
    fn write_mapped_record(&mut self, record: &MappedRecord) -> Result<()>;

    /// Flush anything buffered; called once after the last record
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl MappedRecordSink for Vec<MappedRecord> {
    fn write_mapped_record(&mut self, record: &MappedRecord) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// Writes to both sinks, first then second
impl<A: MappedRecordSink, B: MappedRecordSink> MappedRecordSink for (A, B) {
    fn write_mapped_record(&mut self, record: &MappedRecord) -> Result<()> {
        self.0.write_mapped_record(record)?;
        self.1.write_mapped_record(record)
    }

    fn finish(&mut self) -> Result<()> {
        self.0.finish()?;
        self.1.finish()
    }
}

/// Run-level reports: logs, usage tables and entity outputs
pub trait ReportWriterPort {
    fn write_run_summary(&self, summary: &RunSummary) -> Result<()>;
    fn write_entity_reports(&self, reports: &EntityReports) -> Result<()>;
    fn write_metrics(&self, rendered: &str) -> Result<()>;
}
