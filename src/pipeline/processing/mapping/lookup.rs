use std::collections::BTreeSet;

use serde_json::{Map, Value};

/// Outcome of resolving one dotted path against a scope chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Absent,
    /// Distinct scalar values, sorted, rendered as text
    Found(Vec<String>),
}

impl Lookup {
    pub fn values(&self) -> &[String] {
        match self {
            Lookup::Absent => &[],
            Lookup::Found(values) => values,
        }
    }
}

/// Ordered chain of enclosing objects, innermost first.
///
/// A resource lookup runs against `[resource, package]`; a package lookup
/// against `[package]`. Each path is tried on every scope in turn and the
/// first scope holding an informative value wins.
#[derive(Debug, Clone)]
pub struct ScopeChain<'a> {
    scopes: Vec<&'a Map<String, Value>>,
}

impl<'a> ScopeChain<'a> {
    pub fn root(scope: &'a Map<String, Value>) -> Self {
        Self {
            scopes: vec![scope],
        }
    }

    /// A new chain with `inner` in front of this one
    pub fn nested(&self, inner: &'a Map<String, Value>) -> Self {
        let mut scopes = Vec::with_capacity(self.scopes.len() + 1);
        scopes.push(inner);
        scopes.extend(self.scopes.iter().copied());
        Self { scopes }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Resolve `path` using non-empty text as the informative test.
    pub fn resolve(&self, path: &str) -> Lookup {
        self.resolve_with(path, |value| !value.trim().is_empty())
    }

    /// Resolve `path` on each scope in turn. A scope whose values are all
    /// uninformative is remembered but does not stop the walk; it is returned
    /// only when no enclosing scope does better.
    pub fn resolve_with<F>(&self, path: &str, informative: F) -> Lookup
    where
        F: Fn(&str) -> bool,
    {
        let mut uninformative: Option<Vec<String>> = None;

        for scope in &self.scopes {
            let values = resolve_in_scope(scope, path);
            if values.is_empty() {
                continue;
            }
            if values.iter().any(|v| informative(v)) {
                return Lookup::Found(values);
            }
            if uninformative.is_none() {
                uninformative = Some(values);
            }
        }

        uninformative.map(Lookup::Found).unwrap_or(Lookup::Absent)
    }
}

fn resolve_in_scope(scope: &Map<String, Value>, path: &str) -> Vec<String> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let mut found = BTreeSet::new();

    if let Some((head, rest)) = segments.split_first() {
        if let Some(value) = scope.get(*head) {
            collect(value, rest, &mut found);
        }
    }

    found.into_iter().collect()
}

fn collect(current: &Value, segments: &[&str], found: &mut BTreeSet<String>) {
    match segments.split_first() {
        None => collect_leaf(current, found),
        Some((head, rest)) => match current {
            Value::Object(map) => {
                if let Some(next) = map.get(*head) {
                    collect(next, rest, found);
                }
            }
            // A segment addressing a list applies to every element
            Value::Array(items) => {
                for item in items {
                    collect(item, segments, found);
                }
            }
            _ => {}
        },
    }
}

fn collect_leaf(value: &Value, found: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            found.insert(s.clone());
        }
        Value::Number(n) => {
            found.insert(n.to_string());
        }
        Value::Bool(b) => {
            found.insert(b.to_string());
        }
        Value::Array(items) => {
            for item in items {
                collect_leaf(item, found);
            }
        }
        Value::Null | Value::Object(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_dotted_path_collects_from_every_list_element() {
        let package = object(json!({
            "resources": [
                {"library": {"platform": "illumina"}},
                {"library": {"platform": "pacbio"}},
                {"library": {"platform": "illumina"}},
                {"library": {}}
            ]
        }));

        let chain = ScopeChain::root(&package);
        assert_eq!(
            chain.resolve("resources.library.platform"),
            Lookup::Found(vec!["illumina".to_string(), "pacbio".to_string()])
        );
    }

    #[test]
    fn test_absent_and_null_values_resolve_to_absent() {
        let package = object(json!({"sex": null, "nested": {"value": 1}}));
        let chain = ScopeChain::root(&package);

        assert_eq!(chain.resolve("sex"), Lookup::Absent);
        assert_eq!(chain.resolve("missing"), Lookup::Absent);
        assert_eq!(chain.resolve("nested.value.deeper"), Lookup::Absent);
        assert_eq!(chain.resolve("nested"), Lookup::Absent);
    }

    #[test]
    fn test_falls_back_to_enclosing_scope() {
        let package = object(json!({"scientific_name": "Acacia dealbata"}));
        let resource = object(json!({"id": "r1", "library_type": "wgs"}));
        let chain = ScopeChain::root(&package).nested(&resource);

        assert_eq!(chain.depth(), 2);
        assert_eq!(
            chain.resolve("scientific_name"),
            Lookup::Found(vec!["Acacia dealbata".to_string()])
        );
        assert_eq!(
            chain.resolve("library_type"),
            Lookup::Found(vec!["wgs".to_string()])
        );
    }

    #[test]
    fn test_empty_inner_value_yields_to_informative_outer_value() {
        let package = object(json!({"sex": "female"}));
        let resource = object(json!({"sex": "  "}));
        let chain = ScopeChain::root(&package).nested(&resource);
        assert_eq!(
            chain.resolve("sex"),
            Lookup::Found(vec!["female".to_string()])
        );

        let empty_package = object(json!({}));
        let chain = ScopeChain::root(&empty_package).nested(&resource);
        assert_eq!(chain.resolve("sex"), Lookup::Found(vec!["  ".to_string()]));
    }

    #[test]
    fn test_numbers_and_booleans_are_rendered_as_text() {
        let package = object(json!({"taxon_id": 434543, "flag": true, "ids": [3, 1, 3]}));
        let chain = ScopeChain::root(&package);

        assert_eq!(chain.resolve("taxon_id").values(), ["434543"]);
        assert_eq!(chain.resolve("flag").values(), ["true"]);
        assert_eq!(chain.resolve("ids").values(), ["1", "3"]);
    }
}
