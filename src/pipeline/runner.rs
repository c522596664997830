use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::processing::experiments::extract_experiments;
use crate::pipeline::processing::filter::{FilterLogEntry, FilterStage};
use crate::pipeline::processing::grouping::GroupingAccumulator;
use crate::pipeline::processing::mapping::MappingAccumulator;
use crate::pipeline::processing::resolution::ResolutionReport;
use crate::pipeline::record::{MappedRecord, RawRecord};

/// Everything one record produced in the streaming stages
#[derive(Debug, Default)]
pub struct RecordOutcome {
    /// `None` when the filter dropped the record
    pub mapped: Option<MappedRecord>,
    pub filter_entry: Option<FilterLogEntry>,
    pub mapping: MappingAccumulator,
    pub grouping: GroupingAccumulator,
}

/// Run-level totals, built by merging record outcomes in input order
#[derive(Debug, Default)]
pub struct RunSummary {
    pub records_read: usize,
    pub records_kept: usize,
    pub records_dropped: usize,
    pub filter_log: Vec<FilterLogEntry>,
    pub mapping: MappingAccumulator,
    pub grouping: GroupingAccumulator,
}

impl RunSummary {
    /// Fold one record's outcome in, handing back its mapped record
    pub fn absorb(&mut self, outcome: RecordOutcome) -> Option<MappedRecord> {
        self.records_read += 1;
        if outcome.mapped.is_some() {
            self.records_kept += 1;
        } else {
            self.records_dropped += 1;
        }
        self.filter_log.extend(outcome.filter_entry);
        self.mapping.merge(outcome.mapping);
        self.grouping.merge(outcome.grouping);
        outcome.mapped
    }
}

/// Filter → map → group for one record at a time
pub struct StreamRunner<'a> {
    context: &'a PipelineContext,
}

impl<'a> StreamRunner<'a> {
    pub fn new(context: &'a PipelineContext) -> Self {
        Self { context }
    }

    pub fn process_record(&self, record: &RawRecord) -> Result<RecordOutcome> {
        metrics::input::record_read();
        let mut outcome = RecordOutcome::default();

        let filtered;
        let record = if self.context.filter_enabled {
            let result = FilterStage::new(&self.context.mapper).evaluate(record);
            metrics::filter::record_evaluated(result.entry.keep, result.entry.dropped_resources);
            outcome.filter_entry = Some(result.entry);
            match result.record {
                Some(kept) => {
                    filtered = kept;
                    &filtered
                }
                None => return Ok(outcome),
            }
        } else {
            record
        };

        let mut mapped = self.context.mapper.map_record(record, &mut outcome.mapping);
        self.context.grouper.group(&mut mapped, &mut outcome.grouping)?;
        outcome.mapped = Some(mapped);
        Ok(outcome)
    }
}

/// Resolution output for every entity kind plus the experiments table
#[derive(Debug)]
pub struct EntityReports {
    pub samples: ResolutionReport,
    pub organisms: ResolutionReport,
    pub specimens: ResolutionReport,
    pub experiments: BTreeMap<String, Map<String, Value>>,
}

impl EntityReports {
    pub fn resolve(context: &PipelineContext, records: &[MappedRecord]) -> Self {
        Self {
            samples: context.sample_resolver().resolve(records),
            organisms: context.organism_resolver().resolve(records),
            specimens: context.specimen_resolver().resolve(records),
            experiments: extract_experiments(records, &context.resolution.sample_key_field),
        }
    }

    pub fn reports(&self) -> [&ResolutionReport; 3] {
        [&self.samples, &self.organisms, &self.specimens]
    }
}
