use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_ACCESS_DATE_FIELD, DEFAULT_SAMPLE_KEY_FIELD};
use crate::error::{MapperError, Result};

/// Run configuration, read from TOML. Relative paths are resolved against
/// the directory holding the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub inputs: InputsConfig,
    #[serde(default)]
    pub taxonomy: Option<TaxonomyConfig>,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub resolution: ResolutionConfig,
    #[serde(default)]
    pub outputs: OutputsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputsConfig {
    /// JSON Lines file of source packages; may be given on the command line instead
    #[serde(default)]
    pub records: Option<PathBuf>,
    /// Package-level field mapping table
    pub package_field_mapping: PathBuf,
    /// Resource-level field mapping table
    #[serde(default)]
    pub resource_field_mapping: Option<PathBuf>,
    /// Controlled vocabularies
    pub value_mapping: PathBuf,
    /// Null tokens and per-field sanitization rules
    #[serde(default)]
    pub sanitization: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaxonomyConfig {
    /// NCBI `nodes.dmp`
    pub nodes: PathBuf,
    /// NCBI `names.dmp`
    pub names: PathBuf,
    /// TSV of taxon id → reference dataset id
    #[serde(default)]
    pub reference_datasets: Option<PathBuf>,
    /// Directory for the parsed-taxonomy cache; no caching when unset
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Ranks whose ancestor names are copied into the organism section
    #[serde(default)]
    pub lineage_ranks: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolutionConfig {
    #[serde(default = "default_sample_key_field")]
    pub sample_key_field: String,
    #[serde(default = "default_access_date_field")]
    pub access_date_field: String,
    #[serde(default)]
    pub sample_ignored_fields: Vec<String>,
    #[serde(default)]
    pub organism_ignored_fields: Vec<String>,
    #[serde(default)]
    pub specimen_ignored_fields: Vec<String>,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            sample_key_field: default_sample_key_field(),
            access_date_field: default_access_date_field(),
            sample_ignored_fields: Vec::new(),
            organism_ignored_fields: Vec::new(),
            specimen_ignored_fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputsConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for OutputsConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            log_dir: default_log_dir(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sample_key_field() -> String {
    DEFAULT_SAMPLE_KEY_FIELD.to_string()
}

fn default_access_date_field() -> String {
    DEFAULT_ACCESS_DATE_FIELD.to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Config {
    pub const DEFAULT_PATH: &'static str = "config.toml";

    pub fn load(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            MapperError::Config(format!("Failed to read config file '{}': {}", config_path.display(), e))
        })?;

        let mut config: Config = toml::from_str(&config_content).map_err(|e| {
            MapperError::Config(format!("Failed to parse config file '{}': {}", config_path.display(), e))
        })?;

        let base = config_path.parent().unwrap_or(Path::new("."));
        config.resolve_relative_to(base);
        Ok(config)
    }

    pub fn from_toml_str(raw: &str, base: &Path) -> Result<Self> {
        let mut config: Config = toml::from_str(raw)?;
        config.resolve_relative_to(base);
        Ok(config)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let join = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };

        if let Some(records) = self.inputs.records.as_mut() {
            join(records);
        }
        join(&mut self.inputs.package_field_mapping);
        join(&mut self.inputs.value_mapping);
        if let Some(path) = self.inputs.resource_field_mapping.as_mut() {
            join(path);
        }
        if let Some(path) = self.inputs.sanitization.as_mut() {
            join(path);
        }
        if let Some(taxonomy) = self.taxonomy.as_mut() {
            join(&mut taxonomy.nodes);
            join(&mut taxonomy.names);
            if let Some(path) = taxonomy.reference_datasets.as_mut() {
                join(path);
            }
            if let Some(path) = taxonomy.cache_dir.as_mut() {
                join(path);
            }
        }
        join(&mut self.outputs.dir);
        join(&mut self.outputs.log_dir);
    }

    /// Every input file the run will read, failing on the first missing one
    pub fn validate(&self) -> Result<()> {
        let mut required: Vec<&Path> = vec![
            self.inputs.package_field_mapping.as_path(),
            self.inputs.value_mapping.as_path(),
        ];
        required.extend(self.inputs.resource_field_mapping.as_deref());
        required.extend(self.inputs.sanitization.as_deref());
        if let Some(taxonomy) = &self.taxonomy {
            required.push(&taxonomy.nodes);
            required.push(&taxonomy.names);
            required.extend(taxonomy.reference_datasets.as_deref());
        }

        for path in required {
            if !path.is_file() {
                return Err(MapperError::Config(format!("Input file '{}' does not exist", path.display())));
            }
        }

        if self.resolution.sample_key_field.trim().is_empty() {
            return Err(MapperError::Config("resolution.sample_key_field must not be empty".to_string()));
        }
        Ok(())
    }
}
