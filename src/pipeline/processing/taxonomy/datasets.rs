use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{MapperError, Result};
use crate::pipeline::processing::taxonomy::{TaxonId, TaxonomyIndex};

/// Taxon id → reference dataset ids, read from a two-column TSV.
/// Lines starting with `#` and blank lines are ignored.
#[derive(Debug, Clone, Default)]
pub struct ReferenceDatasets {
    by_taxon: BTreeMap<TaxonId, Vec<String>>,
    taxon_ids: HashSet<TaxonId>,
}

/// The reference datasets attached to the closest ancestor of a taxon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetMatch {
    pub taxon_id: TaxonId,
    pub hops: usize,
    pub datasets: Vec<String>,
}

impl ReferenceDatasets {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| MapperError::io(path, e))?;
        Self::from_reader(BufReader::new(file), path)
    }

    pub fn from_reader<R: BufRead>(reader: R, path: &Path) -> Result<Self> {
        let mut by_taxon: BTreeMap<TaxonId, Vec<String>> = BTreeMap::new();

        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.map_err(|e| MapperError::io(path, e))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let mut columns = trimmed.split('\t').map(str::trim);
            let taxon = columns.next().unwrap_or_default();
            let dataset = columns.next().unwrap_or_default();
            if dataset.is_empty() {
                return Err(MapperError::reference_datasets(path, line_no, "expected <taxon id>\\t<dataset id>"));
            }
            let taxon_id: TaxonId = taxon.parse().map_err(|_| {
                MapperError::reference_datasets(path, line_no, format!("taxon id '{}' is not an integer", taxon))
            })?;

            let datasets = by_taxon.entry(taxon_id).or_default();
            if !datasets.iter().any(|d| d == dataset) {
                datasets.push(dataset.to_string());
            }
        }

        for datasets in by_taxon.values_mut() {
            datasets.sort();
        }
        let taxon_ids = by_taxon.keys().copied().collect();
        Ok(Self { by_taxon, taxon_ids })
    }

    pub fn len(&self) -> usize {
        self.by_taxon.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_taxon.is_empty()
    }

    pub fn taxon_ids(&self) -> &HashSet<TaxonId> {
        &self.taxon_ids
    }

    pub fn datasets_for(&self, taxon_id: TaxonId) -> &[String] {
        self.by_taxon.get(&taxon_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Datasets of the closest listed ancestor of `taxon_id`, if any
    pub fn nearest(&self, index: &TaxonomyIndex, taxon_id: TaxonId) -> Result<Option<DatasetMatch>> {
        Ok(index
            .nearest_dataset(taxon_id, &self.taxon_ids)?
            .map(|found| DatasetMatch {
                taxon_id: found.taxon_id,
                hops: found.hops,
                datasets: self.datasets_for(found.taxon_id).to_vec(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::taxonomy::tests::sample_index;
    use std::io::Cursor;

    #[test]
    fn test_reads_tsv_and_skips_comments() {
        let datasets = ReferenceDatasets::from_reader(
            Cursor::new("# taxid\tdataset\n3803\tfabaceae_ref\n\n3803\tlegume_ref\n3803\tfabaceae_ref\n2759\teuk_ref\n"),
            Path::new("datasets.tsv"),
        )
        .unwrap();

        assert_eq!(datasets.len(), 2);
        assert_eq!(datasets.datasets_for(3803), ["fabaceae_ref", "legume_ref"]);
        assert!(datasets.taxon_ids().contains(&2759));
    }

    #[test]
    fn test_nearest_attaches_dataset_ids() {
        let index = sample_index();
        let datasets = ReferenceDatasets::from_reader(
            Cursor::new("3803\tfabaceae_ref\n2759\teuk_ref\n"),
            Path::new("datasets.tsv"),
        )
        .unwrap();

        let found = datasets.nearest(&index, 3825).unwrap().unwrap();
        assert_eq!(found.taxon_id, 3803);
        assert_eq!(found.hops, 2);
        assert_eq!(found.datasets, vec!["fabaceae_ref".to_string()]);

        let found = datasets.nearest(&index, 434543).unwrap().unwrap();
        assert_eq!(found.datasets, vec!["euk_ref".to_string()]);
    }

    #[test]
    fn test_malformed_row_reports_line() {
        let err = ReferenceDatasets::from_reader(Cursor::new("3803\tref\nnot-a-row\n"), Path::new("datasets.tsv"))
            .unwrap_err();
        assert!(matches!(err, MapperError::ReferenceDatasets { line: 2, .. }));

        let message = err.to_string();
        assert!(message.contains("reference dataset file 'datasets.tsv' line 2"));
        assert!(!message.contains("taxonomy dump"));
    }

    #[test]
    fn test_non_integer_taxon_is_a_reference_dataset_error() {
        let err = ReferenceDatasets::from_reader(Cursor::new("acacia	ref
"), Path::new("datasets.tsv")).unwrap_err();
        assert!(matches!(err, MapperError::ReferenceDatasets { line: 1, .. }));
        assert!(err.to_string().contains("'acacia' is not an integer"));
    }
}
