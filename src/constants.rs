// Canonical section names
pub const ORGANISM_SECTION: &str = "organism";
pub const SAMPLE_SECTION: &str = "sample";
pub const EXPERIMENT_SECTION: &str = "experiment";
pub const RUNS_SECTION: &str = "runs";

// Raw record structure
pub const RECORD_ID_FIELD: &str = "id";
pub const RESOURCES_FIELD: &str = "resources";
/// Prefix that resource-level candidate paths may carry
pub const RESOURCE_PATH_PREFIX: &str = "resources.";

// Canonical fields the pipeline reads or writes itself
pub const TAXON_ID_FIELD: &str = "taxon_id";
pub const SCIENTIFIC_NAME_FIELD: &str = "scientific_name";
pub const SCIENTIFIC_NAME_SOURCE_FIELD: &str = "scientific_name_source";
pub const TAXON_RANK_FIELD: &str = "taxon_rank";
pub const GROUPING_KEY_FIELD: &str = "organism_grouping_key";
pub const REFERENCE_DATASET_FIELD: &str = "reference_dataset";
pub const REFERENCE_DATASET_HOPS_FIELD: &str = "reference_dataset_distance";
pub const SPECIMEN_ID_FIELD: &str = "specimen_id";
pub const PACKAGE_ID_FIELD: &str = "bpa_package_id";

// Defaults for configurable names
pub const DEFAULT_SAMPLE_KEY_FIELD: &str = "sample_name";
pub const DEFAULT_ACCESS_DATE_FIELD: &str = "sample_access_date";

/// Raw field name recorded when a vocabulary default supplied the value
pub const DEFAULT_VALUE_SOURCE: &str = "default_value";
/// Scientific name source tag for names taken from the taxonomy
pub const NCBI_NAME_SOURCE: &str = "ncbi";

// Output file names
pub const MAPPED_RECORDS_FILE: &str = "mapped_records.jsonl";
pub const DECISION_LOG_FILE: &str = "decision_log.csv";
pub const FILTER_LOG_FILE: &str = "filter_log.csv";
pub const GROUPING_LOG_FILE: &str = "grouping_log.csv";
pub const GROUPED_RECORDS_FILE: &str = "grouped_records.json";
pub const UNGROUPED_RECORDS_FILE: &str = "ungrouped_records.json";
pub const SANITIZATION_LOG_FILE: &str = "sanitization_changes.csv";
pub const RAW_FIELD_USAGE_FILE: &str = "raw_field_usage.csv";
pub const RAW_VALUE_USAGE_FILE: &str = "raw_value_usage.csv";
pub const MAPPED_FIELD_USAGE_FILE: &str = "mapped_field_usage.csv";
pub const MAPPED_VALUE_USAGE_FILE: &str = "mapped_value_usage.csv";
pub const UNUSED_FIELD_USAGE_FILE: &str = "unused_field_usage.csv";
pub const EXPERIMENTS_FILE: &str = "experiments.json";
pub const METRICS_FILE: &str = "metrics.prom";
