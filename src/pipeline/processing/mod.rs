// Pipeline processing: filtering, mapping, taxonomy, grouping and resolution

pub mod experiments;
pub mod filter;
pub mod grouping;
pub mod mapping;
pub mod resolution;
pub mod taxonomy;
