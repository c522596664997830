pub mod jsonl;
pub mod report_writer;

pub use jsonl::{read_mapped_records, JsonlReader, JsonlSink};
pub use report_writer::FileReportWriter;
