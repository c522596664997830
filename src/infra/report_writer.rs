use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::app::ports::ReportWriterPort;
use crate::constants::*;
use crate::pipeline::processing::resolution::ResolutionReport;
use crate::pipeline::runner::EntityReports;
use crate::pipeline::RunSummary;

/// Writes every run report under one output directory: CSV for logs and
/// frequency tables, pretty JSON for entity outputs. In dry-run mode the
/// writer only logs what it would have written.
pub struct FileReportWriter {
    dir: PathBuf,
    dry_run: bool,
}

impl FileReportWriter {
    pub fn new(dir: &Path, dry_run: bool) -> Result<Self> {
        if !dry_run {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            dry_run,
        })
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    fn write_csv<F>(&self, file_name: &str, header: &[&str], rows: F) -> Result<()>
    where
        F: FnOnce(&mut csv::Writer<fs::File>) -> csv::Result<()>,
    {
        let path = self.path(file_name);
        if self.dry_run {
            info!("Dry run: skipping {}", path.display());
            return Ok(());
        }

        let mut writer = csv::Writer::from_path(&path).with_context(|| format!("Failed to create {}", path.display()))?;
        writer.write_record(header)?;
        rows(&mut writer).with_context(|| format!("Failed to write {}", path.display()))?;
        writer.flush()?;
        info!("Wrote {}", path.display());
        Ok(())
    }

    fn write_json<T: Serialize + ?Sized>(&self, file_name: &str, value: &T) -> Result<()> {
        let path = self.path(file_name);
        if self.dry_run {
            info!("Dry run: skipping {}", path.display());
            return Ok(());
        }

        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote {}", path.display());
        Ok(())
    }

    fn write_resolution(&self, report: &ResolutionReport) -> Result<()> {
        let kind = report.kind;
        self.write_json(&format!("unique_{}s.json", kind), &report.unique_entity_table())?;
        self.write_json(&format!("{}_conflicts.json", kind), &report.conflicts())?;
        self.write_json(&format!("{}_package_map.json", kind), &report.package_map())?;
        self.write_json(&format!("{}_changes.json", kind), &report.changes)?;
        Ok(())
    }
}

impl ReportWriterPort for FileReportWriter {
    fn write_run_summary(&self, summary: &RunSummary) -> Result<()> {
        self.write_csv(
            DECISION_LOG_FILE,
            &["record_id", "resource_id", "section", "field", "raw_field", "raw_value", "canonical_value", "accepted"],
            |w| {
                for d in &summary.mapping.decisions {
                    w.write_record([
                        d.record_id.as_str(),
                        d.resource_id.as_deref().unwrap_or(""),
                        d.section.as_str(),
                        d.field.as_str(),
                        d.raw_field.as_deref().unwrap_or(""),
                        d.raw_value.as_deref().unwrap_or(""),
                        d.canonical_value.as_text().as_str(),
                        bool_text(d.accepted),
                    ])?;
                }
                Ok(())
            },
        )?;

        self.write_csv(
            FILTER_LOG_FILE,
            &[
                "record_id",
                "keep",
                "kept_resources",
                "dropped_resources",
                "resource_id",
                "section",
                "field",
                "value",
                "accepted",
            ],
            |w| {
                for entry in &summary.filter_log {
                    let kept = entry.kept_resources.to_string();
                    let dropped = entry.dropped_resources.to_string();
                    let head = [entry.record_id.as_str(), bool_text(entry.keep), kept.as_str(), dropped.as_str()];
                    if entry.checks.is_empty() {
                        w.write_record(head.iter().copied().chain(["", "", "", "", ""]))?;
                    }
                    for check in &entry.checks {
                        w.write_record(head.iter().copied().chain([
                            check.resource_id.as_deref().unwrap_or(""),
                            check.section.as_str(),
                            check.field.as_str(),
                            check.value.as_str(),
                            bool_text(check.accepted),
                        ]))?;
                    }
                }
                Ok(())
            },
        )?;

        self.write_csv(GROUPING_LOG_FILE, &["record_id", "grouping_key", "taxon_id_used", "name_used"], |w| {
            for entry in &summary.grouping.log {
                w.write_record([
                    entry.record_id.clone(),
                    entry.grouping_key.clone().unwrap_or_default(),
                    entry.taxon_id_used.map(|id| id.to_string()).unwrap_or_default(),
                    entry.name_used.clone().unwrap_or_default(),
                ])?;
            }
            Ok(())
        })?;

        self.write_csv(
            SANITIZATION_LOG_FILE,
            &["record_id", "section", "field", "original", "sanitized", "rules"],
            |w| {
                for change in &summary.mapping.sanitization_changes {
                    let rules: Vec<&str> = change.rules.iter().map(|r| r.as_str()).collect();
                    w.write_record([
                        change.record_id.as_str(),
                        change.section.as_str(),
                        change.field.as_str(),
                        change.original.as_str(),
                        change.sanitized.as_deref().unwrap_or(""),
                        rules.join(";").as_str(),
                    ])?;
                }
                Ok(())
            },
        )?;

        let counters = &summary.mapping.counters;
        self.write_csv(RAW_FIELD_USAGE_FILE, &["raw_field", "count"], |w| write_counts(w, &counters.raw_fields))?;
        self.write_csv(RAW_VALUE_USAGE_FILE, &["raw_field", "value", "count"], |w| {
            write_nested_counts(w, &counters.raw_values)
        })?;
        self.write_csv(MAPPED_FIELD_USAGE_FILE, &["canonical_field", "raw_field", "count"], |w| {
            write_nested_counts(w, &counters.mapped_fields)
        })?;
        self.write_csv(MAPPED_VALUE_USAGE_FILE, &["canonical_field", "canonical_value", "count"], |w| {
            write_nested_counts(w, &counters.mapped_values)
        })?;
        self.write_csv(UNUSED_FIELD_USAGE_FILE, &["raw_field", "count"], |w| write_counts(w, &counters.unused_fields))?;

        self.write_json(GROUPED_RECORDS_FILE, &summary.grouping.grouped_output())?;
        self.write_json(UNGROUPED_RECORDS_FILE, &summary.grouping.ungrouped)?;
        Ok(())
    }

    fn write_entity_reports(&self, reports: &EntityReports) -> Result<()> {
        for report in reports.reports() {
            self.write_resolution(report)?;
        }
        self.write_json(EXPERIMENTS_FILE, &reports.experiments)
    }

    fn write_metrics(&self, rendered: &str) -> Result<()> {
        let path = self.path(METRICS_FILE);
        if self.dry_run {
            info!("Dry run: skipping {}", path.display());
            return Ok(());
        }
        fs::write(&path, rendered).with_context(|| format!("Failed to write {}", path.display()))
    }
}

fn bool_text(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn write_counts(w: &mut csv::Writer<fs::File>, counts: &BTreeMap<String, u64>) -> csv::Result<()> {
    for (key, count) in counts {
        w.write_record([key.as_str(), count.to_string().as_str()])?;
    }
    Ok(())
}

fn write_nested_counts(
    w: &mut csv::Writer<fs::File>,
    counts: &BTreeMap<String, BTreeMap<String, u64>>,
) -> csv::Result<()> {
    for (outer, inner) in counts {
        for (key, count) in inner {
            w.write_record([outer.as_str(), key.as_str(), count.to_string().as_str()])?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::filter::{FieldCheck, FilterLogEntry};
    use crate::pipeline::processing::grouping::GroupingKey;
    use crate::pipeline::processing::mapping::{CanonicalValue, Decision};
    use tempfile::TempDir;

    fn summary() -> RunSummary {
        let mut summary = RunSummary::default();
        summary.records_read = 1;
        summary.mapping.decisions.push(Decision {
            record_id: "p1".to_string(),
            resource_id: None,
            section: "organism".to_string(),
            field: "scope".to_string(),
            raw_field: Some("scope".to_string()),
            raw_value: Some("Genomic".to_string()),
            canonical_value: CanonicalValue::Single("genome".to_string()),
            accepted: true,
        });
        summary.filter_log.push(FilterLogEntry {
            record_id: "p1".to_string(),
            keep: true,
            kept_resources: 0,
            dropped_resources: 0,
            checks: vec![FieldCheck {
                resource_id: None,
                section: "organism".to_string(),
                field: "scope".to_string(),
                value: "Genomic".to_string(),
                accepted: true,
            }],
        });
        summary.mapping.counters.raw_fields.insert("scope".to_string(), 1);
        summary.grouping.groups.insert(GroupingKey::Taxon(3825), vec!["p1".to_string()]);
        summary.grouping.ungrouped.push("p2".to_string());
        summary
    }

    #[test]
    fn test_run_summary_files() {
        let dir = TempDir::new().unwrap();
        let writer = FileReportWriter::new(dir.path(), false).unwrap();

        writer.write_run_summary(&summary()).unwrap();

        let decisions = fs::read_to_string(dir.path().join(DECISION_LOG_FILE)).unwrap();
        let mut lines = decisions.lines();
        assert_eq!(
            lines.next(),
            Some("record_id,resource_id,section,field,raw_field,raw_value,canonical_value,accepted")
        );
        assert_eq!(lines.next(), Some("p1,,organism,scope,scope,Genomic,genome,true"));

        let filter_log = fs::read_to_string(dir.path().join(FILTER_LOG_FILE)).unwrap();
        assert!(filter_log.contains("p1,true,0,0,,organism,scope,Genomic,true"));

        let usage = fs::read_to_string(dir.path().join(RAW_FIELD_USAGE_FILE)).unwrap();
        assert!(usage.contains("scope,1"));

        let grouped: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(GROUPED_RECORDS_FILE)).unwrap()).unwrap();
        assert_eq!(grouped, serde_json::json!({"taxon_3825": ["p1"]}));
        assert!(grouped.get("ungrouped").is_none());

        let ungrouped: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(UNGROUPED_RECORDS_FILE)).unwrap()).unwrap();
        assert_eq!(ungrouped, serde_json::json!(["p2"]));
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        let writer = FileReportWriter::new(&out, true).unwrap();

        writer.write_run_summary(&summary()).unwrap();
        writer.write_metrics("# empty").unwrap();

        assert!(!out.exists());
    }
}
