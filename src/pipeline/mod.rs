// Metadata pipeline: record model, processing stages and the run driver

pub mod context;
pub mod processing;
pub mod record;
pub mod runner;

pub use context::PipelineContext;
pub use record::{MappedRecord, RawRecord, RecordId};
pub use runner::{RecordOutcome, RunSummary, StreamRunner};
