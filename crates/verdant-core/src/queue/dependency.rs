//! Dependency graph between live entries.
//!
//! - Forward edges: entry -> entries it waits for
//! - Reverse edges: entry -> entries waiting for it
//! - Invariant: edges and reverse_edges are kept in sync
//!
//! Only live dependents own edges. A dependency id may be absent from the
//! queue (settled, not yet admitted, or never existing); the scheduler
//! resolves those cases against the settled log.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::domain::EntryId;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: HashMap<EntryId, HashSet<EntryId>>,
    reverse_edges: HashMap<EntryId, HashSet<EntryId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// `entry` waits for `depends_on`.
    pub fn add_dependency(&mut self, entry: &EntryId, depends_on: &EntryId) {
        self.edges
            .entry(entry.clone())
            .or_default()
            .insert(depends_on.clone());
        self.reverse_edges
            .entry(depends_on.clone())
            .or_default()
            .insert(entry.clone());
    }

    pub fn remove_dependency(&mut self, entry: &EntryId, depends_on: &EntryId) {
        if let Entry::Occupied(mut e) = self.edges.entry(entry.clone()) {
            e.get_mut().remove(depends_on);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
        if let Entry::Occupied(mut e) = self.reverse_edges.entry(depends_on.clone()) {
            e.get_mut().remove(entry);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
    }

    /// Drop every forward edge of `entry` (it left the queue). Edges of
    /// entries waiting for it stay, so a later failure can still cascade.
    pub fn remove_entry(&mut self, entry: &EntryId) {
        for dep in self.dependencies_of(entry) {
            self.remove_dependency(entry, &dep);
        }
    }

    pub fn dependencies_of(&self, entry: &EntryId) -> Vec<EntryId> {
        self.edges
            .get(entry)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Entries directly waiting for `entry`.
    pub fn dependents_of(&self, entry: &EntryId) -> Vec<EntryId> {
        self.reverse_edges
            .get(entry)
            .map(|waiting| waiting.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every entry that transitively waits for `root`, nearest first.
    pub fn transitive_dependents(&self, root: &EntryId) -> Vec<EntryId> {
        let mut seen: HashSet<EntryId> = HashSet::new();
        let mut order = Vec::new();
        let mut frontier: VecDeque<EntryId> = VecDeque::from([root.clone()]);
        while let Some(node) = frontier.pop_front() {
            let mut next = self.dependents_of(&node);
            next.sort();
            for dependent in next {
                if dependent != *root && seen.insert(dependent.clone()) {
                    order.push(dependent.clone());
                    frontier.push_back(dependent);
                }
            }
        }
        order
    }

    /// If making `entry` wait for `deps` would close a cycle, return it as
    /// `[entry, .., entry]`.
    ///
    /// The graph is acyclic before the call, so any new cycle runs through
    /// `entry`: it exists iff some dep already (transitively) waits for it.
    pub fn cycle_through(&self, entry: &EntryId, deps: &[EntryId]) -> Option<Vec<EntryId>> {
        for dep in deps {
            if dep == entry {
                return Some(vec![entry.clone(), entry.clone()]);
            }
            if let Some(path) = self.path(dep, entry) {
                let mut cycle = Vec::with_capacity(path.len() + 1);
                cycle.push(entry.clone());
                cycle.extend(path);
                return Some(cycle);
            }
        }
        None
    }

    /// Path `from -> .. -> to` following forward edges, if one exists.
    fn path(&self, from: &EntryId, to: &EntryId) -> Option<Vec<EntryId>> {
        let mut visited: HashSet<EntryId> = HashSet::new();
        let mut stack: Vec<(EntryId, Vec<EntryId>)> = vec![(from.clone(), vec![from.clone()])];
        while let Some((node, path)) = stack.pop() {
            if node == *to {
                return Some(path);
            }
            if !visited.insert(node.clone()) {
                continue;
            }
            for dep in self.dependencies_of(&node) {
                if !visited.contains(&dep) {
                    let mut next = path.clone();
                    next.push(dep.clone());
                    stack.push((dep, next));
                }
            }
        }
        None
    }
}
