use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MapperError, Result};
use crate::pipeline::record::RecordId;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static INTEGRAL_FLOAT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(-?\d+)\.0+$").unwrap());

/// Cleanup applied to an accepted free-text value, in declared order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizationRule {
    /// Collapse internal whitespace runs and trim
    TextSanitization,
    /// Null tokens become null
    EmptyStringSanitization,
    /// `"12.0"` becomes `"12"`
    IntegerSanitization,
}

impl SanitizationRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            SanitizationRule::TextSanitization => "text_sanitization",
            SanitizationRule::EmptyStringSanitization => "empty_string_sanitization",
            SanitizationRule::IntegerSanitization => "integer_sanitization",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSanitizationConfig {
    #[serde(default)]
    null_values: Vec<String>,
    #[serde(flatten)]
    sections: BTreeMap<String, BTreeMap<String, Vec<SanitizationRule>>>,
}

/// Null tokens plus per section/field rule lists
#[derive(Debug, Clone, Default)]
pub struct SanitizationConfig {
    /// upper-cased, trimmed
    null_values: HashSet<String>,
    rules: BTreeMap<String, BTreeMap<String, Vec<SanitizationRule>>>,
}

/// One value rewritten by sanitization
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SanitizationChange {
    pub record_id: RecordId,
    pub section: String,
    pub field: String,
    pub original: String,
    pub sanitized: Option<String>,
    pub rules: Vec<SanitizationRule>,
}

impl SanitizationConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| MapperError::io(path, e))?;
        Self::from_json_str(&raw, path)
    }

    pub fn from_json_str(raw: &str, source: &Path) -> Result<Self> {
        let parsed: RawSanitizationConfig =
            serde_json::from_str(raw).map_err(|e| MapperError::json(source, e))?;

        Ok(Self {
            null_values: parsed
                .null_values
                .iter()
                .map(|token| token.trim().to_uppercase())
                .collect(),
            rules: parsed.sections,
        })
    }

    /// Tokens that stand for "no value", e.g. `NA`
    pub fn with_null_values<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.null_values
            .extend(tokens.into_iter().map(|t| t.as_ref().trim().to_uppercase()));
        self
    }

    pub fn is_null_token(&self, value: &str) -> bool {
        let trimmed = value.trim();
        !trimmed.is_empty() && self.null_values.contains(&trimmed.to_uppercase())
    }

    pub fn rules_for(&self, section: &str, field: &str) -> &[SanitizationRule] {
        self.rules
            .get(section)
            .and_then(|fields| fields.get(field))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Run the field's rules over `value`. Returns the result and the rules
    /// that actually changed something.
    pub fn apply(&self, section: &str, field: &str, value: &str) -> (Option<String>, Vec<SanitizationRule>) {
        let mut current = value.to_string();
        let mut applied = Vec::new();

        for rule in self.rules_for(section, field) {
            let next = match rule {
                SanitizationRule::TextSanitization => {
                    Some(WHITESPACE_RUN.replace_all(current.trim(), " ").into_owned())
                }
                SanitizationRule::EmptyStringSanitization => {
                    if current.trim().is_empty() || self.is_null_token(&current) {
                        None
                    } else {
                        Some(current.clone())
                    }
                }
                SanitizationRule::IntegerSanitization => Some(
                    INTEGRAL_FLOAT
                        .captures(current.trim())
                        .map(|caps| caps[1].to_string())
                        .unwrap_or_else(|| current.clone()),
                ),
            };

            match next {
                None => {
                    applied.push(*rule);
                    return (None, applied);
                }
                Some(next) => {
                    if next != current {
                        applied.push(*rule);
                        current = next;
                    }
                }
            }
        }

        (Some(current), applied)
    }
}
