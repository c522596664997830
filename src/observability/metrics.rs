//! Metrics for the mapping pipeline
//!
//! Counters and histograms go through the `metrics` facade. The binary
//! installs a Prometheus recorder and writes the rendered snapshot next to
//! the run outputs; without a recorder every call here is a no-op.

use std::fmt;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Input
    RecordsRead,

    // Filter
    FilterRecordsKept,
    FilterRecordsDropped,
    FilterResourcesDropped,

    // Mapping
    MappingDecisionsAccepted,
    MappingDecisionsUnaccepted,

    // Grouping
    GroupingRecordsGrouped,
    GroupingRecordsUngrouped,

    // Taxonomy
    TaxonomyNodesLoaded,
    TaxonomyCacheHits,

    // Resolution
    ResolutionEntitiesIncluded,
    ResolutionEntitiesExcluded,
    ResolutionConflicts,

    // Run
    RunDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::RecordsRead => "biometa_records_read_total",

            MetricName::FilterRecordsKept => "biometa_filter_records_kept_total",
            MetricName::FilterRecordsDropped => "biometa_filter_records_dropped_total",
            MetricName::FilterResourcesDropped => "biometa_filter_resources_dropped_total",

            MetricName::MappingDecisionsAccepted => "biometa_mapping_decisions_accepted_total",
            MetricName::MappingDecisionsUnaccepted => "biometa_mapping_decisions_unaccepted_total",

            MetricName::GroupingRecordsGrouped => "biometa_grouping_records_grouped_total",
            MetricName::GroupingRecordsUngrouped => "biometa_grouping_records_ungrouped_total",

            MetricName::TaxonomyNodesLoaded => "biometa_taxonomy_nodes_loaded",
            MetricName::TaxonomyCacheHits => "biometa_taxonomy_cache_hits_total",

            MetricName::ResolutionEntitiesIncluded => "biometa_resolution_entities_included_total",
            MetricName::ResolutionEntitiesExcluded => "biometa_resolution_entities_excluded_total",
            MetricName::ResolutionConflicts => "biometa_resolution_conflicts_total",

            MetricName::RunDuration => "biometa_run_duration_seconds",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Handle to the installed recorder, used to render the end-of-run snapshot
#[derive(Clone)]
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl MetricsHandle {
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Install the Prometheus recorder as the global metrics recorder
pub fn init() -> Result<MetricsHandle, Box<dyn std::error::Error>> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
    info!("Metrics system initialized");
    Ok(MetricsHandle { handle })
}

// ============================================================================
// Input Metrics
// ============================================================================

pub mod input {
    use super::MetricName;

    pub fn record_read() {
        ::metrics::counter!(MetricName::RecordsRead.as_str()).increment(1);
    }
}

// ============================================================================
// Filter Metrics
// ============================================================================

pub mod filter {
    use super::MetricName;

    /// Record the filter outcome for one record
    pub fn record_evaluated(kept: bool, dropped_resources: usize) {
        let name = if kept {
            MetricName::FilterRecordsKept
        } else {
            MetricName::FilterRecordsDropped
        };
        ::metrics::counter!(name.as_str()).increment(1);
        if dropped_resources > 0 {
            ::metrics::counter!(MetricName::FilterResourcesDropped.as_str()).increment(dropped_resources as u64);
        }
    }
}

// ============================================================================
// Mapping Metrics
// ============================================================================

pub mod mapping {
    use super::MetricName;

    pub fn decision_recorded(accepted: bool) {
        let name = if accepted {
            MetricName::MappingDecisionsAccepted
        } else {
            MetricName::MappingDecisionsUnaccepted
        };
        ::metrics::counter!(name.as_str()).increment(1);
    }
}

// ============================================================================
// Grouping Metrics
// ============================================================================

pub mod grouping {
    use super::MetricName;

    /// Record a keyed record, labelled by how the key was derived
    pub fn record_grouped(by_taxon: bool) {
        let basis = if by_taxon { "taxon" } else { "name" };
        ::metrics::counter!(MetricName::GroupingRecordsGrouped.as_str(), "basis" => basis).increment(1);
    }

    pub fn record_ungrouped() {
        ::metrics::counter!(MetricName::GroupingRecordsUngrouped.as_str()).increment(1);
    }
}

// ============================================================================
// Taxonomy Metrics
// ============================================================================

pub mod taxonomy {
    use super::MetricName;

    pub fn loaded(nodes: usize, from_cache: bool) {
        ::metrics::gauge!(MetricName::TaxonomyNodesLoaded.as_str()).set(nodes as f64);
        if from_cache {
            ::metrics::counter!(MetricName::TaxonomyCacheHits.as_str()).increment(1);
        }
    }
}

// ============================================================================
// Resolution Metrics
// ============================================================================

pub mod resolution {
    use super::MetricName;

    pub fn entity_resolved(kind: &'static str, included: bool) {
        let name = if included {
            MetricName::ResolutionEntitiesIncluded
        } else {
            MetricName::ResolutionEntitiesExcluded
        };
        ::metrics::counter!(name.as_str(), "kind" => kind).increment(1);
    }

    pub fn conflict_detected(kind: &'static str, ignored: bool) {
        let ignored = if ignored { "true" } else { "false" };
        ::metrics::counter!(MetricName::ResolutionConflicts.as_str(), "kind" => kind, "ignored" => ignored).increment(1);
    }
}

// ============================================================================
// Run Metrics
// ============================================================================

pub mod run {
    use super::MetricName;

    pub fn completed(command: &'static str, seconds: f64) {
        ::metrics::histogram!(MetricName::RunDuration.as_str(), "command" => command).record(seconds);
    }
}
