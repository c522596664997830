//! Reader for the NCBI taxdump `nodes.dmp` / `names.dmp` layout.
//!
//! Both files hold one row per line, columns separated by `\t|\t` and the
//! line terminated by `\t|`.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{MapperError, Result};
use crate::pipeline::processing::taxonomy::{TaxonId, TaxonNode};

const SCIENTIFIC_NAME_CLASS: &str = "scientific name";
const SYNONYM_CLASSES: &[&str] = &["synonym", "equivalent name", "genbank synonym"];

/// A node row with the line it came from
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRow {
    pub line: usize,
    pub taxon_id: TaxonId,
    pub parent_id: TaxonId,
    pub rank: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NameRow {
    pub line: usize,
    pub taxon_id: TaxonId,
    pub name: String,
    pub name_class: String,
}

fn split_columns(line: &str) -> Vec<&str> {
    let line = line.trim_end_matches(['\r', '\n']);
    let line = line.strip_suffix("\t|").unwrap_or(line);
    line.split("\t|\t").map(str::trim).collect()
}

fn parse_id(path: &Path, line: usize, column: &str, what: &str) -> Result<TaxonId> {
    column
        .parse::<TaxonId>()
        .map_err(|_| MapperError::taxdump(path, line, format!("{} '{}' is not an integer", what, column)))
}

pub fn read_nodes<R: BufRead>(reader: R, path: &Path) -> Result<Vec<NodeRow>> {
    let mut rows = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|e| MapperError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let columns = split_columns(&line);
        if columns.len() < 3 {
            return Err(MapperError::taxdump(
                path,
                line_no,
                format!("expected at least 3 columns, found {}", columns.len()),
            ));
        }
        rows.push(NodeRow {
            line: line_no,
            taxon_id: parse_id(path, line_no, columns[0], "taxon id")?,
            parent_id: parse_id(path, line_no, columns[1], "parent id")?,
            rank: columns[2].to_string(),
        });
    }
    Ok(rows)
}

pub fn read_names<R: BufRead>(reader: R, path: &Path) -> Result<Vec<NameRow>> {
    let mut rows = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|e| MapperError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let columns = split_columns(&line);
        // tax_id | name_txt | unique name | name class
        if columns.len() < 4 {
            return Err(MapperError::taxdump(
                path,
                line_no,
                format!("expected 4 columns, found {}", columns.len()),
            ));
        }
        rows.push(NameRow {
            line: line_no,
            taxon_id: parse_id(path, line_no, columns[0], "taxon id")?,
            name: columns[1].to_string(),
            name_class: columns[3].to_string(),
        });
    }
    Ok(rows)
}

/// Join node and name rows into nodes. Each node must have exactly one
/// scientific name, and every name must belong to a known node.
pub fn assemble(nodes: Vec<NodeRow>, names: Vec<NameRow>, names_path: &Path) -> Result<Vec<(usize, TaxonNode)>> {
    let mut scientific: HashMap<TaxonId, String> = HashMap::new();
    let mut synonyms: HashMap<TaxonId, BTreeSet<String>> = HashMap::new();
    let known: HashMap<TaxonId, usize> = nodes.iter().map(|row| (row.taxon_id, row.line)).collect();

    for row in names {
        if !known.contains_key(&row.taxon_id) {
            return Err(MapperError::taxdump(
                names_path,
                row.line,
                format!("name '{}' refers to unknown taxon {}", row.name, row.taxon_id),
            ));
        }
        if row.name_class == SCIENTIFIC_NAME_CLASS {
            if let Some(existing) = scientific.insert(row.taxon_id, row.name.clone()) {
                return Err(MapperError::taxdump(
                    names_path,
                    row.line,
                    format!(
                        "taxon {} has two scientific names ('{}' and '{}')",
                        row.taxon_id, existing, row.name
                    ),
                ));
            }
        } else if SYNONYM_CLASSES.contains(&row.name_class.as_str()) {
            synonyms.entry(row.taxon_id).or_default().insert(row.name);
        }
    }

    nodes
        .into_iter()
        .map(|row| {
            let scientific_name = scientific.remove(&row.taxon_id).ok_or_else(|| {
                MapperError::taxdump(
                    names_path,
                    0,
                    format!("taxon {} has no scientific name", row.taxon_id),
                )
            })?;
            Ok((
                row.line,
                TaxonNode {
                    taxon_id: row.taxon_id,
                    parent_id: row.parent_id,
                    rank: row.rank,
                    scientific_name,
                    synonyms: synonyms.remove(&row.taxon_id).unwrap_or_default(),
                },
            ))
        })
        .collect()
}

/// Parse both dump files into nodes tagged with their `nodes.dmp` line
pub fn read_taxdump(nodes_path: &Path, names_path: &Path) -> Result<Vec<(usize, TaxonNode)>> {
    let nodes_file = File::open(nodes_path).map_err(|e| MapperError::io(nodes_path, e))?;
    let names_file = File::open(names_path).map_err(|e| MapperError::io(names_path, e))?;

    let nodes = read_nodes(BufReader::new(nodes_file), nodes_path)?;
    let names = read_names(BufReader::new(names_file), names_path)?;
    assemble(nodes, names, names_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const NODES: &str = "1\t|\t1\t|\tno rank\t|\t\t|\n2\t|\t1\t|\tsuperkingdom\t|\t\t|\n";
    const NAMES: &str = "1\t|\troot\t|\t\t|\tscientific name\t|\n\
                         2\t|\tBacteria\t|\tBacteria <bacteria>\t|\tscientific name\t|\n\
                         2\t|\teubacteria\t|\t\t|\tgenbank synonym\t|\n\
                         2\t|\tbacteria\t|\t\t|\tblast name\t|\n";

    #[test]
    fn test_reads_pipe_delimited_rows() {
        let nodes = read_nodes(Cursor::new(NODES), Path::new("nodes.dmp")).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].taxon_id, 2);
        assert_eq!(nodes[1].parent_id, 1);
        assert_eq!(nodes[1].rank, "superkingdom");
        assert_eq!(nodes[1].line, 2);

        let names = read_names(Cursor::new(NAMES), Path::new("names.dmp")).unwrap();
        let assembled = assemble(nodes, names, Path::new("names.dmp")).unwrap();
        let bacteria = &assembled[1].1;
        assert_eq!(bacteria.scientific_name, "Bacteria");
        assert!(bacteria.synonyms.contains("eubacteria"));
        assert!(!bacteria.synonyms.contains("bacteria"));
    }

    #[test]
    fn test_bad_id_reports_line() {
        let err = read_nodes(Cursor::new("1\t|\t1\t|\tno rank\t|\nx\t|\t1\t|\tgenus\t|\n"), Path::new("nodes.dmp"))
            .unwrap_err();
        match err {
            MapperError::Taxdump { line, reason, .. } => {
                assert_eq!(line, 2);
                assert!(reason.contains("'x'"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_name_for_unknown_taxon_is_fatal() {
        let nodes = read_nodes(Cursor::new(NODES), Path::new("nodes.dmp")).unwrap();
        let names = read_names(
            Cursor::new("1\t|\troot\t|\t\t|\tscientific name\t|\n9\t|\tGhost\t|\t\t|\tscientific name\t|\n"),
            Path::new("names.dmp"),
        )
        .unwrap();
        let err = assemble(nodes, names, Path::new("names.dmp")).unwrap_err();
        assert!(matches!(err, MapperError::Taxdump { line: 2, .. }));
    }

    #[test]
    fn test_missing_scientific_name_is_fatal() {
        let nodes = read_nodes(Cursor::new(NODES), Path::new("nodes.dmp")).unwrap();
        let names = read_names(Cursor::new("1\t|\troot\t|\t\t|\tscientific name\t|\n"), Path::new("names.dmp")).unwrap();
        let err = assemble(nodes, names, Path::new("names.dmp")).unwrap_err();
        assert!(err.to_string().contains("taxon 2 has no scientific name"));
    }
}
