//! Dependency graph over variant names.
//!
//! Each node keeps its dependencies in insertion order without duplicates, so
//! traversals are deterministic for a given sequence of `add` calls.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Error type for dependency graph operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DepGraphError {
    /// The key was never added to the graph
    #[error("there is no key '{key}' in the dependency graph")]
    NoSuchKey { key: String },

    /// A key was re-entered while its dependencies were being resolved
    #[error("detected dependency graph cycle at '{key}'")]
    CycleAt { key: String },
}

/// A directed graph of string keys with ordered, deduplicated adjacency.
#[derive(Debug, Clone, Default)]
pub struct DepGraph {
    nodes: HashMap<String, Vec<String>>,
}

impl DepGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures a node exists for `key`, returning its dependency list.
    pub fn ensure(&mut self, key: &str) -> &mut Vec<String> {
        self.nodes.entry(key.to_string()).or_default()
    }

    /// Records that `key` depends on `dep`.
    ///
    /// Re-adding an existing edge leaves the graph unchanged.
    pub fn add(&mut self, key: &str, dep: &str) {
        let deps = self.ensure(key);
        if !deps.iter().any(|d| d == dep) {
            deps.push(dep.to_string());
        }
        self.ensure(dep);
    }

    /// Returns true if the graph knows about `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    /// Returns the transitive dependencies of `key`, leaves first.
    ///
    /// # Arguments
    /// * `key` - The node whose dependencies are resolved
    ///
    /// # Returns
    /// * `Ok(Vec<String>)` - Dependencies in post-order, each listed at its first occurrence
    /// * `Err(DepGraphError)` - The key is unknown or a cycle was found
    pub fn get_deps(&self, key: &str) -> Result<Vec<String>, DepGraphError> {
        let mut visiting = HashSet::new();
        let mut seen = HashSet::new();
        let mut result = Vec::new();

        self.visit(key, &mut visiting, &mut seen, &mut result)?;

        Ok(result)
    }

    fn visit(
        &self,
        key: &str,
        visiting: &mut HashSet<String>,
        seen: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) -> Result<(), DepGraphError> {
        let deps = self
            .nodes
            .get(key)
            .ok_or_else(|| DepGraphError::NoSuchKey { key: key.to_string() })?;

        if deps.is_empty() {
            return Ok(());
        }

        if !visiting.insert(key.to_string()) {
            return Err(DepGraphError::CycleAt { key: key.to_string() });
        }

        for dep in deps {
            self.visit(dep, visiting, seen, result)?;

            if seen.insert(dep.clone()) {
                result.push(dep.clone());
            }
        }

        visiting.remove(key);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> DepGraph {
        let mut graph = DepGraph::new();
        graph.add("top", "mid1");
        graph.add("top", "mid2");
        graph.add("mid1", "leaf1");
        graph.add("mid1", "leaf2");
        graph.add("mid2", "leaf2");
        graph.add("mid2", "leaf3");
        graph
    }

    #[test]
    fn test_get_deps_post_order() {
        let graph = seeded();

        let deps = graph.get_deps("top").unwrap();
        assert_eq!(deps, vec!["leaf1", "leaf2", "mid1", "leaf3", "mid2"]);
    }

    #[test]
    fn test_get_deps_is_stable() {
        let graph = seeded();

        assert_eq!(graph.get_deps("top").unwrap(), graph.get_deps("top").unwrap());
        assert_eq!(graph.get_deps("mid2").unwrap(), vec!["leaf2", "leaf3"]);
    }

    #[test]
    fn test_leaf_has_no_deps() {
        let graph = seeded();
        assert!(graph.get_deps("leaf1").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_edges_ignored() {
        let mut graph = DepGraph::new();
        graph.add("a", "b");
        graph.add("a", "b");

        assert_eq!(graph.get_deps("a").unwrap(), vec!["b"]);
    }

    #[test]
    fn test_cycle_detected() {
        let mut graph = DepGraph::new();
        graph.add("top", "mid1");
        graph.add("mid1", "leaf1");
        graph.add("leaf1", "top");

        let err = graph.get_deps("top").unwrap_err();
        assert_eq!(err, DepGraphError::CycleAt { key: "top".to_string() });
        assert_eq!(err.to_string(), "detected dependency graph cycle at 'top'");
    }

    #[test]
    fn test_unknown_key() {
        let graph = seeded();

        let err = graph.get_deps("bogus").unwrap_err();
        assert_eq!(err.to_string(), "there is no key 'bogus' in the dependency graph");
    }
}
