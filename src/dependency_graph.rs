//! Bidirectional dependency graph backing cascade invalidation.
//!
//! Grounded on Design Note "graph with shared ownership": the graph owns
//! all nodes in a `DashMap` arena keyed by cache key; edges are plain
//! `String` references rather than pointers, so the logical graph may
//! contain cycles without creating them in the Rust ownership graph.

use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, Default)]
pub struct DependencyNode {
    pub dependencies: HashSet<String>,
    pub dependents: HashSet<String>,
    pub last_updated: f64,
    pub update_frequency_per_hour: f64,
    pub priority: u8,
}

#[derive(Default)]
pub struct DependencyGraph {
    nodes: DashMap<String, DependencyNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares "`key_a` depends on `key_b`"; creates nodes if missing and
    /// maintains both directions.
    pub fn add_edge(&self, key_a: &str, key_b: &str) {
        self.nodes
            .entry(key_a.to_string())
            .or_default()
            .dependencies
            .insert(key_b.to_string());
        self.nodes
            .entry(key_b.to_string())
            .or_default()
            .dependents
            .insert(key_a.to_string());
    }

    pub fn remove_edge(&self, key_a: &str, key_b: &str) {
        if let Some(mut node) = self.nodes.get_mut(key_a) {
            node.dependencies.remove(key_b);
        }
        if let Some(mut node) = self.nodes.get_mut(key_b) {
            node.dependents.remove(key_a);
        }
    }

    /// BFS from `key` over `dependents`, capped at `max_depth`, deduplicated.
    /// Does not include `key` itself.
    pub fn dependents_of(&self, key: &str, max_depth: usize) -> Vec<String> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(key.to_string());
        let mut result = Vec::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((key.to_string(), 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            for dependent in node.dependents.iter() {
                if visited.insert(dependent.clone()) {
                    result.push(dependent.clone());
                    queue.push_back((dependent.clone(), depth + 1));
                }
            }
        }

        result
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn keys_matching(&self, matches: impl Fn(&str) -> bool) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|entry| matches(entry.key()))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn touch(&self, key: &str, now: f64) {
        let mut node = self.nodes.entry(key.to_string()).or_default();
        node.last_updated = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bidirectional_consistency() {
        let graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        assert!(graph.nodes.get("a").unwrap().dependencies.contains("b"));
        assert!(graph.nodes.get("b").unwrap().dependents.contains("a"));
    }

    #[test]
    fn remove_edge_is_inverse_of_add_edge() {
        let graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        graph.remove_edge("a", "b");
        assert!(!graph.nodes.get("a").unwrap().dependencies.contains("b"));
        assert!(!graph.nodes.get("b").unwrap().dependents.contains("a"));
    }

    #[test]
    fn s2_cascade_depth_bound() {
        // chain A <- B <- C <- D <- E (each depends on its left neighbour)
        let graph = DependencyGraph::new();
        graph.add_edge("B", "A");
        graph.add_edge("C", "B");
        graph.add_edge("D", "C");
        graph.add_edge("E", "D");

        let affected = graph.dependents_of("A", 3);
        let mut affected_with_self: HashSet<String> = affected.into_iter().collect();
        affected_with_self.insert("A".to_string());

        assert_eq!(affected_with_self.len(), 4);
        assert!(affected_with_self.contains("A"));
        assert!(affected_with_self.contains("B"));
        assert!(affected_with_self.contains("C"));
        assert!(affected_with_self.contains("D"));
        assert!(!affected_with_self.contains("E"));
    }

    #[test]
    fn dependents_of_never_exceeds_node_count() {
        let graph = DependencyGraph::new();
        graph.add_edge("b", "a");
        graph.add_edge("c", "b");
        let affected = graph.dependents_of("a", 10);
        assert!(affected.len() <= 2);
    }
}
