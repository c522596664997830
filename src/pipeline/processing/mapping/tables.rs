use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{MapperError, Result};

/// Canonical section → canonical field → raw field candidates, highest
/// priority first.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    source: PathBuf,
    sections: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl MappingTable {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| MapperError::io(path, e))?;
        Self::from_json_str(&raw, path)
    }

    /// Parse and validate a table. `source` is only used in error messages.
    pub fn from_json_str(raw: &str, source: &Path) -> Result<Self> {
        let sections: BTreeMap<String, BTreeMap<String, Vec<String>>> =
            serde_json::from_str(raw).map_err(|e| MapperError::json(source, e))?;

        for (section, fields) in &sections {
            for (field, candidates) in fields {
                let key = format!("{}.{}", section, field);
                if candidates.is_empty() {
                    return Err(MapperError::table(source, key, "candidate list is empty"));
                }
                let mut seen = BTreeSet::new();
                for candidate in candidates {
                    if candidate.trim().is_empty() {
                        return Err(MapperError::table(source, key, "candidate name is blank"));
                    }
                    if !seen.insert(candidate.as_str()) {
                        return Err(MapperError::table(
                            source,
                            key,
                            format!("candidate '{}' listed twice", candidate),
                        ));
                    }
                }
            }
        }

        Ok(Self {
            source: source.to_path_buf(),
            sections,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn candidates(&self, section: &str, field: &str) -> Option<&[String]> {
        self.sections
            .get(section)
            .and_then(|fields| fields.get(field))
            .map(Vec::as_slice)
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    pub fn has_field(&self, section: &str, field: &str) -> bool {
        self.candidates(section, field).is_some()
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Every (section, field, candidates) entry in section/field order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &[String])> {
        self.sections.iter().flat_map(|(section, fields)| {
            fields
                .iter()
                .map(move |(field, candidates)| (section.as_str(), field.as_str(), candidates.as_slice()))
        })
    }

    /// Every raw field name any candidate refers to, as written in the table
    pub fn referenced_raw_fields(&self) -> BTreeSet<&str> {
        self.sections
            .values()
            .flat_map(|fields| fields.values())
            .flatten()
            .map(String::as_str)
            .collect()
    }
}

/// Controlled vocabulary for one canonical field
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    /// case-folded, trimmed synonym → canonical value
    synonyms: HashMap<String, String>,
    canonical_values: BTreeSet<String>,
    default: Option<String>,
}

impl Vocabulary {
    /// Canonical value for an already-normalized raw value
    pub fn lookup(&self, normalized: &str) -> Option<&str> {
        self.synonyms.get(normalized).map(String::as_str)
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn canonical_values(&self) -> impl Iterator<Item = &str> {
        self.canonical_values.iter().map(String::as_str)
    }
}

/// Case-fold and trim a raw value before vocabulary matching
pub fn normalize_for_match(raw: &str) -> String {
    raw.trim().to_lowercase()
}

type RawVocabulary = BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<Option<String>>>>>;

/// Canonical section → canonical field → vocabulary.
///
/// In the file each canonical value lists its raw synonyms; a `null` entry in
/// that list marks the canonical value as the field's default.
#[derive(Debug, Clone, Default)]
pub struct VocabularyTable {
    sections: BTreeMap<String, BTreeMap<String, Vocabulary>>,
}

impl VocabularyTable {
    /// Load a vocabulary file and check it against the mapping tables it
    /// will be used with.
    pub fn from_path(path: &Path, mapping: &[&MappingTable]) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| MapperError::io(path, e))?;
        Self::from_json_str(&raw, path, mapping)
    }

    pub fn from_json_str(raw: &str, source: &Path, mapping: &[&MappingTable]) -> Result<Self> {
        let parsed: RawVocabulary =
            serde_json::from_str(raw).map_err(|e| MapperError::json(source, e))?;

        let mut sections = BTreeMap::new();
        for (section, fields) in parsed {
            if !mapping.iter().any(|table| table.has_section(&section)) {
                debug!(
                    "Skipping vocabulary section '{}': not present in any mapping table",
                    section
                );
                continue;
            }

            let mut vocabularies = BTreeMap::new();
            for (field, canonicals) in fields {
                let key = format!("{}.{}", section, field);
                if !mapping.iter().any(|table| table.has_field(&section, &field)) {
                    return Err(MapperError::table(
                        source,
                        key,
                        "vocabulary field has no entry in the mapping table",
                    ));
                }
                let vocabulary = build_vocabulary(source, &key, canonicals)?;
                vocabularies.insert(field, vocabulary);
            }
            sections.insert(section, vocabularies);
        }

        Ok(Self { sections })
    }

    pub fn get(&self, section: &str, field: &str) -> Option<&Vocabulary> {
        self.sections.get(section).and_then(|fields| fields.get(field))
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

fn build_vocabulary(
    source: &Path,
    key: &str,
    canonicals: BTreeMap<String, Vec<Option<String>>>,
) -> Result<Vocabulary> {
    let mut vocabulary = Vocabulary::default();

    for (canonical, synonyms) in canonicals {
        // only listed synonyms match; a canonical value is not implicitly its own
        for synonym in synonyms {
            match synonym {
                None => {
                    if let Some(existing) = &vocabulary.default {
                        if existing != &canonical {
                            return Err(MapperError::table(
                                source,
                                key,
                                format!(
                                    "more than one default value ('{}' and '{}')",
                                    existing, canonical
                                ),
                            ));
                        }
                    }
                    vocabulary.default = Some(canonical.clone());
                }
                Some(raw) => {
                    let normalized = normalize_for_match(&raw);
                    match vocabulary.synonyms.get(&normalized) {
                        Some(existing) if existing != &canonical => {
                            return Err(MapperError::table(
                                source,
                                key,
                                format!(
                                    "synonym '{}' maps to both '{}' and '{}'",
                                    raw, existing, canonical
                                ),
                            ));
                        }
                        Some(_) => {}
                        None => {
                            vocabulary.synonyms.insert(normalized, canonical.clone());
                        }
                    }
                }
            }
        }
        vocabulary.canonical_values.insert(canonical);
    }

    Ok(vocabulary)
}
