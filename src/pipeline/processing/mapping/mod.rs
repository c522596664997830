// Field/value mapping: tables, scope-chain lookup, sanitization and the mapper

pub mod counters;
pub mod lookup;
pub mod mapper;
pub mod sanitize;
pub mod tables;

pub use counters::UsageCounters;
pub use lookup::{Lookup, ScopeChain};
pub use mapper::{CanonicalValue, Decision, FieldResolution, FieldValueMapper, MappingAccumulator, MappingLevel};
pub use sanitize::{SanitizationChange, SanitizationConfig, SanitizationRule};
pub use tables::{MappingTable, Vocabulary, VocabularyTable};
