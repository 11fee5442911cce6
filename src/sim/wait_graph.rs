//! Directed wait-for graph over transaction IDs, with deterministic
//! cycle detection: roots are visited in ascending id order so that
//! victim selection is reproducible across runs.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::common::TransactionId;
use crate::error::SimResult;
use crate::invariant;

#[derive(Debug, Default)]
pub struct WaitForGraph {
    edges: BTreeMap<TransactionId, BTreeSet<TransactionId>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self { edges: BTreeMap::new() }
    }

    /// Records `src -> t` for each `t` in `targets`, skipping self-loops.
    /// Duplicate edges are harmless (a `BTreeSet`, not a multiset).
    pub fn add_edges(&mut self, src: TransactionId, targets: impl IntoIterator<Item = TransactionId>) {
        let entry = self.edges.entry(src).or_default();
        for t in targets {
            if t != src {
                entry.insert(t);
            }
        }
    }

    /// Removes every edge touching `txn`: its own out-edges and every
    /// incoming edge from another transaction. Deletion is total in
    /// both directions, as the data model requires.
    pub fn remove_source(&mut self, txn: TransactionId) {
        self.edges.remove(&txn);
        for targets in self.edges.values_mut() {
            targets.remove(&txn);
        }
    }

    /// Iterative DFS over roots in ascending id order. On discovering
    /// a back edge `u -> v` where `v` is on the current path, returns
    /// the suffix of the path from `v` onward (the cycle) and stops.
    /// Returns an empty set if the graph is acyclic.
    pub fn detect_cycle(&self) -> SimResult<BTreeSet<TransactionId>> {
        let roots: Vec<TransactionId> = self.edges.keys().copied().collect();
        for root in roots {
            let mut path: Vec<TransactionId> = Vec::new();
            let mut on_path: HashSet<TransactionId> = HashSet::new();
            if let Some(cycle) = self.dfs(root, &mut path, &mut on_path, &mut HashSet::new())? {
                return Ok(cycle);
            }
        }
        Ok(BTreeSet::new())
    }

    fn dfs(
        &self,
        node: TransactionId,
        path: &mut Vec<TransactionId>,
        on_path: &mut HashSet<TransactionId>,
        visited: &mut HashSet<TransactionId>,
    ) -> SimResult<Option<BTreeSet<TransactionId>>> {
        if on_path.contains(&node) {
            invariant!(
                path.contains(&node),
                "wait-for graph node T{node} is marked on-path but missing from the path stack"
            );
            let pos = path.iter().position(|&n| n == node).expect("checked above");
            return Ok(Some(path[pos..].iter().copied().collect()));
        }
        if visited.contains(&node) {
            return Ok(None);
        }
        visited.insert(node);
        path.push(node);
        on_path.insert(node);

        if let Some(targets) = self.edges.get(&node) {
            for &next in targets {
                if let Some(cycle) = self.dfs(next, path, on_path, visited)? {
                    return Ok(Some(cycle));
                }
            }
        }

        path.pop();
        on_path.remove(&node);
        Ok(None)
    }

    pub fn is_empty(&self) -> bool {
        self.edges.values().all(|t| t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_cycle_in_chain() {
        let mut g = WaitForGraph::new();
        g.add_edges(1, [2]);
        g.add_edges(2, [3]);
        assert!(g.detect_cycle().unwrap().is_empty());
    }

    #[test]
    fn simple_two_cycle() {
        let mut g = WaitForGraph::new();
        g.add_edges(1, [2]);
        g.add_edges(2, [1]);
        let cycle = g.detect_cycle().unwrap();
        assert_eq!(cycle, BTreeSet::from([1, 2]));
    }

    #[test]
    fn self_loop_ignored() {
        let mut g = WaitForGraph::new();
        g.add_edges(1, [1]);
        assert!(g.detect_cycle().unwrap().is_empty());
    }

    #[test]
    fn remove_source_is_total() {
        let mut g = WaitForGraph::new();
        g.add_edges(1, [2]);
        g.add_edges(2, [1]);
        g.remove_source(1);
        assert!(g.detect_cycle().unwrap().is_empty());
        assert!(g.edges.get(&2).map(|t| t.is_empty()).unwrap_or(true));
    }

    #[test]
    fn three_cycle_detected() {
        let mut g = WaitForGraph::new();
        g.add_edges(1, [2]);
        g.add_edges(2, [3]);
        g.add_edges(3, [1]);
        let cycle = g.detect_cycle().unwrap();
        assert_eq!(cycle, BTreeSet::from([1, 2, 3]));
    }

    #[test]
    fn roots_visited_in_ascending_order() {
        let mut g = WaitForGraph::new();
        // 5 -> 6 is acyclic; 1 -> 2 -> 1 is a cycle. Root 1 < 5, so
        // detection must find the cycle via root 1 regardless of
        // insertion order.
        g.add_edges(5, [6]);
        g.add_edges(1, [2]);
        g.add_edges(2, [1]);
        let cycle = g.detect_cycle().unwrap();
        assert_eq!(cycle, BTreeSet::from([1, 2]));
    }
}
