use std::collections::{BTreeMap, BTreeSet};

use crate::error::GenomeError;

/// Depth-first and topological searches over a small directed graph with
/// string node ids. Children are visited in the order their edges were added.
#[derive(Debug, Clone, Default)]
pub struct GraphSearcher {
    nodes: Vec<String>,
    edges: BTreeMap<String, Vec<String>>,
}

impl GraphSearcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &str) {
        if !self.nodes.iter().any(|node| node == id) {
            self.nodes.push(id.to_string());
        }
    }

    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.add_node(from);
        self.add_node(to);
        self.edges
            .entry(from.to_string())
            .or_default()
            .push(to.to_string());
    }

    pub fn children(&self, id: &str) -> &[String] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes reachable from `start`, parents before children.
    pub fn depth_first(&self, start: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        let mut stack = vec![start.to_string()];
        while let Some(node) = stack.pop() {
            if !seen.insert(node.clone()) {
                continue;
            }
            for child in self.children(&node).iter().rev() {
                if !seen.contains(child) {
                    stack.push(child.clone());
                }
            }
            out.push(node);
        }
        out
    }

    /// Every node, each after all of its predecessors. Rejects cycles.
    pub fn topo_sort(&self) -> Result<Vec<String>, GenomeError> {
        let mut indegree: BTreeMap<&str, usize> =
            self.nodes.iter().map(|node| (node.as_str(), 0)).collect();
        for targets in self.edges.values() {
            for target in targets {
                if let Some(count) = indegree.get_mut(target.as_str()) {
                    *count += 1;
                }
            }
        }
        let mut ready: Vec<&str> = self
            .nodes
            .iter()
            .map(String::as_str)
            .filter(|node| indegree.get(node) == Some(&0))
            .collect();
        ready.reverse();
        let mut out = Vec::with_capacity(self.nodes.len());
        while let Some(node) = ready.pop() {
            out.push(node.to_string());
            for child in self.children(node).iter().rev() {
                if let Some(count) = indegree.get_mut(child.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(child.as_str());
                    }
                }
            }
        }
        if out.len() != self.nodes.len() {
            return Err(GenomeError::Precondition(
                "model parent links form a cycle".to_string(),
            ));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_first_visits_subtrees_in_order() {
        let mut graph = GraphSearcher::new();
        graph.add_edge("root", "a");
        graph.add_edge("root", "b");
        graph.add_edge("a", "a1");
        assert_eq!(graph.depth_first("root"), vec!["root", "a", "a1", "b"]);
        let topo = graph.topo_sort().unwrap();
        assert_eq!(topo[0], "root");
    }

    #[test]
    fn cycles_are_rejected() {
        let mut graph = GraphSearcher::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "a");
        assert!(graph.topo_sort().is_err());
    }
}
