//! Generic directed graph of named nodes.
//!
//! `Graph` only does adjacency bookkeeping. Edges may reference nodes that
//! were never added; callers are expected to run `dangling_edges()` and
//! `find_cycle()` once construction is finished and reject the graph if
//! either reports a problem.

use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};

/// An edge endpoint that does not resolve to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DanglingEdge<K> {
    /// `parent` has children but is not a node itself.
    MissingParent { parent: K, children: Vec<K> },
    /// `parent` lists `child`, which is not a node.
    MissingChild { parent: K, child: K },
}

/// A directed graph rooted at a single node.
///
/// Children are kept in first-insertion order and never duplicated.
#[derive(Debug, Clone)]
pub struct Graph<K, V> {
    root: K,
    nodes: BTreeMap<K, V>,
    edges: BTreeMap<K, Vec<K>>,
}

impl<K: Ord + Clone, V> Graph<K, V> {
    /// Create a graph containing only the root node.
    pub fn new(root: K, value: V) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(root.clone(), value);
        Self {
            root,
            nodes,
            edges: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &K {
        &self.root
    }

    /// Insert or replace a node, returning the previous value.
    pub fn add_node(&mut self, name: K, value: V) -> Option<V> {
        self.nodes.insert(name, value)
    }

    /// Add `child` under `parent`. Neither endpoint has to exist yet.
    pub fn add_edge(&mut self, parent: K, child: K) {
        let children = self.edges.entry(parent).or_default();
        if !children.contains(&child) {
            children.push(child);
        }
    }

    pub fn has_node<Q>(&self, name: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.nodes.contains_key(name)
    }

    pub fn node<Q>(&self, name: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> &BTreeMap<K, V> {
        &self.nodes
    }

    /// Parent → ordered children view.
    pub fn edges(&self) -> &BTreeMap<K, Vec<K>> {
        &self.edges
    }

    pub fn children<Q>(&self, name: &Q) -> &[K]
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Splice a new node between `target` and its children.
    ///
    /// The new node inherits every current child of `target` and becomes
    /// the only child of `target`.
    pub fn inject_node(&mut self, name: K, value: V, target: &K) {
        let inherited = self.edges.remove(target).unwrap_or_default();
        self.nodes.insert(name.clone(), value);

        let children = self.edges.entry(name.clone()).or_default();
        for child in inherited {
            if child != name && !children.contains(&child) {
                children.push(child);
            }
        }

        self.edges.insert(target.clone(), vec![name]);
    }

    /// Every edge endpoint that is not a node, in parent order.
    pub fn dangling_edges(&self) -> Vec<DanglingEdge<K>> {
        let mut dangling = Vec::new();
        for (parent, children) in &self.edges {
            if !self.nodes.contains_key(parent) {
                dangling.push(DanglingEdge::MissingParent {
                    parent: parent.clone(),
                    children: children.clone(),
                });
                continue;
            }
            for child in children {
                if !self.nodes.contains_key(child) {
                    dangling.push(DanglingEdge::MissingChild {
                        parent: parent.clone(),
                        child: child.clone(),
                    });
                }
            }
        }
        dangling
    }

    /// Return a node that closes a cycle reachable from the root, if any.
    pub fn find_cycle(&self) -> Option<K> {
        let mut done = BTreeSet::new();
        let mut path = BTreeSet::new();
        self.visit_for_cycle(&self.root, &mut path, &mut done)
    }

    fn visit_for_cycle(
        &self,
        node: &K,
        path: &mut BTreeSet<K>,
        done: &mut BTreeSet<K>,
    ) -> Option<K> {
        if path.contains(node) {
            return Some(node.clone());
        }
        if done.contains(node) {
            return None;
        }

        path.insert(node.clone());
        for child in self.children(node) {
            if let Some(found) = self.visit_for_cycle(child, path, done) {
                return Some(found);
            }
        }
        path.remove(node);
        done.insert(node.clone());
        None
    }
}
