use std::sync::Arc;

use tracing::info;

use crate::config::{Config, ResolutionConfig, TaxonomyConfig};
use crate::error::Result;
use crate::pipeline::processing::grouping::OrganismGrouper;
use crate::pipeline::processing::mapping::{FieldValueMapper, MappingTable, SanitizationConfig, VocabularyTable};
use crate::pipeline::processing::resolution::{EntityResolver, OrganismKind, SampleKind, SpecimenKind};
use crate::pipeline::processing::taxonomy::{ReferenceDatasets, TaxonomyIndex};

/// Everything loaded once before the first record: tables, taxonomy and
/// the stage objects built from them. Read-only for the rest of the run.
pub struct PipelineContext {
    pub mapper: FieldValueMapper,
    pub grouper: OrganismGrouper,
    pub taxonomy: Option<Arc<TaxonomyIndex>>,
    pub filter_enabled: bool,
    pub resolution: ResolutionConfig,
}

impl PipelineContext {
    /// Load every table and the taxonomy named by `config`. Any malformed
    /// input aborts here, before a record is read.
    pub fn load(config: &Config) -> Result<Self> {
        config.validate()?;
        let inputs = &config.inputs;

        let package_table = MappingTable::from_path(&inputs.package_field_mapping)?;
        let resource_table = inputs
            .resource_field_mapping
            .as_deref()
            .map(MappingTable::from_path)
            .transpose()?;

        let mut tables = vec![&package_table];
        tables.extend(resource_table.as_ref());
        let vocabularies = VocabularyTable::from_path(&inputs.value_mapping, &tables)?;

        let sanitization = match &inputs.sanitization {
            Some(path) => SanitizationConfig::from_path(path)?,
            None => SanitizationConfig::default(),
        };

        let mut mapper = FieldValueMapper::new(package_table, vocabularies).with_sanitization(sanitization);
        if let Some(table) = resource_table {
            mapper = mapper.with_resource_table(table)?;
        }

        let (taxonomy, grouper) = match &config.taxonomy {
            Some(taxonomy_config) => {
                let index = Arc::new(Self::load_taxonomy(taxonomy_config)?);
                let mut grouper = OrganismGrouper::new(Some(Arc::clone(&index)))
                    .with_lineage_ranks(taxonomy_config.lineage_ranks.clone());
                if let Some(path) = &taxonomy_config.reference_datasets {
                    let datasets = ReferenceDatasets::from_path(path)?;
                    info!("Loaded {} reference dataset taxa from {}", datasets.len(), path.display());
                    grouper = grouper.with_reference_datasets(Arc::new(datasets));
                }
                (Some(index), grouper)
            }
            None => {
                info!("No taxonomy configured; organisms are grouped by name only");
                (None, OrganismGrouper::new(None))
            }
        };

        Ok(Self {
            mapper,
            grouper,
            taxonomy,
            filter_enabled: config.filter.enabled,
            resolution: config.resolution.clone(),
        })
    }

    pub fn load_taxonomy(config: &TaxonomyConfig) -> Result<TaxonomyIndex> {
        match &config.cache_dir {
            Some(cache_dir) => TaxonomyIndex::load_cached(&config.nodes, &config.names, cache_dir),
            None => TaxonomyIndex::load(&config.nodes, &config.names),
        }
    }

    pub fn sample_resolver(&self) -> EntityResolver<SampleKind> {
        EntityResolver::new(SampleKind {
            key_field: self.resolution.sample_key_field.clone(),
            access_date_field: self.resolution.access_date_field.clone(),
        })
        .with_ignored_fields(self.resolution.sample_ignored_fields.iter().cloned())
    }

    pub fn organism_resolver(&self) -> EntityResolver<OrganismKind> {
        EntityResolver::new(OrganismKind).with_ignored_fields(self.resolution.organism_ignored_fields.iter().cloned())
    }

    pub fn specimen_resolver(&self) -> EntityResolver<SpecimenKind> {
        EntityResolver::new(SpecimenKind {
            sample_key_field: self.resolution.sample_key_field.clone(),
        })
        .with_ignored_fields(self.resolution.specimen_ignored_fields.iter().cloned())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::processing::taxonomy::tests::sample_index;
    use std::path::Path;

    /// Context over in-memory tables and the sample taxonomy
    pub(crate) fn sample_context() -> PipelineContext {
        let package = MappingTable::from_json_str(
            r#"{
                "organism": {
                    "scope": ["scope"],
                    "taxon_id": ["taxon_id"],
                    "scientific_name": ["scientific_name"]
                },
                "sample": {"sample_name": ["sample_name"], "sex": ["sex"]}
            }"#,
            Path::new("package.json"),
        )
        .unwrap();
        let vocab = VocabularyTable::from_json_str(
            r#"{"organism": {"scope": {"genome": ["genomic", "Genome"]}}}"#,
            Path::new("vocab.json"),
            &[&package],
        )
        .unwrap();

        let index = Arc::new(sample_index());
        PipelineContext {
            mapper: FieldValueMapper::new(package, vocab),
            grouper: OrganismGrouper::new(Some(Arc::clone(&index))).with_lineage_ranks(vec!["genus".to_string()]),
            taxonomy: Some(index),
            filter_enabled: true,
            resolution: ResolutionConfig::default(),
        }
    }

    #[test]
    fn test_load_fails_before_records_on_bad_table() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"sample": {"sample_name": []}}"#).unwrap();
        std::fs::write(dir.path().join("values.json"), "{}").unwrap();
        let config = Config::from_toml_str(
            r#"
            [inputs]
            package_field_mapping = "package.json"
            value_mapping = "values.json"
            "#,
            dir.path(),
        )
        .unwrap();

        let err = PipelineContext::load(&config).err().unwrap();
        assert!(err.to_string().contains("sample.sample_name"));
    }

    #[test]
    fn test_load_without_taxonomy_groups_by_name() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"organism": {"scientific_name": ["scientific_name"]}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("values.json"), "{}").unwrap();
        let config = Config::from_toml_str(
            r#"
            [inputs]
            package_field_mapping = "package.json"
            value_mapping = "values.json"
            "#,
            dir.path(),
        )
        .unwrap();

        let context = PipelineContext::load(&config).unwrap();
        assert!(context.taxonomy.is_none());
        assert!(context.filter_enabled);
    }
}
