//! Input asset graph: the read-only DAG handed over by the resolver stage.
//!
//! Nodes alternate between assets and dependencies: an asset points at its
//! dependency nodes, and each dependency points at the assets it resolves
//! to (zero or more). Entry dependencies hang off a virtual root.

use crate::types::{Asset, Dependency};
use serde::Serialize;
use weft_graph::{Graph, NodeId};

/// A node in the asset graph.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AssetGraphNode {
    Root,
    Asset(Asset),
    Dependency(Dependency),
}

/// The input graph of source modules and their dependencies.
#[derive(Debug)]
pub struct AssetGraph {
    graph: Graph<AssetGraphNode>,
    root: NodeId,
}

impl AssetGraph {
    /// Create a graph containing only the virtual root.
    #[must_use]
    pub fn new() -> Self {
        let mut graph = Graph::new();
        let root = graph.add_node(AssetGraphNode::Root);
        Self { graph, root }
    }

    /// The virtual root every entry dependency hangs off.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Add an asset node.
    pub fn add_asset(&mut self, asset: Asset) -> NodeId {
        self.graph.add_node(AssetGraphNode::Asset(asset))
    }

    /// Add an entry dependency under the virtual root.
    pub fn add_entry_dependency(&mut self, dep: Dependency) -> NodeId {
        let id = self.graph.add_node(AssetGraphNode::Dependency(dep));
        self.graph.add_edge(self.root, id);
        id
    }

    /// Add a dependency originating from `source`.
    pub fn add_dependency(&mut self, source: NodeId, dep: Dependency) -> NodeId {
        let id = self.graph.add_node(AssetGraphNode::Dependency(dep));
        self.graph.add_edge(source, id);
        id
    }

    /// Record that `dep` resolves to `asset`.
    pub fn resolve(&mut self, dep: NodeId, asset: NodeId) {
        self.graph.add_edge(dep, asset);
    }

    /// The underlying graph, for traversal.
    #[must_use]
    pub fn graph(&self) -> &Graph<AssetGraphNode> {
        &self.graph
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &AssetGraphNode {
        self.graph.node(id)
    }

    #[must_use]
    pub fn asset(&self, id: NodeId) -> Option<&Asset> {
        match self.graph.node(id) {
            AssetGraphNode::Asset(asset) => Some(asset),
            _ => None,
        }
    }

    #[must_use]
    pub fn dependency(&self, id: NodeId) -> Option<&Dependency> {
        match self.graph.node(id) {
            AssetGraphNode::Dependency(dep) => Some(dep),
            _ => None,
        }
    }

    /// Get an asset node that must exist.
    ///
    /// # Panics
    /// Panics if `id` is not an asset node; the bundler only constructs
    /// asset ids from resolution edges, so this indicates graph corruption.
    #[must_use]
    pub fn expect_asset(&self, id: NodeId) -> &Asset {
        self.asset(id)
            .unwrap_or_else(|| panic!("node {id} is not an asset"))
    }

    /// Get a dependency node that must exist.
    ///
    /// # Panics
    /// Panics if `id` is not a dependency node.
    #[must_use]
    pub fn expect_dependency(&self, id: NodeId) -> &Dependency {
        self.dependency(id)
            .unwrap_or_else(|| panic!("node {id} is not a dependency"))
    }

    /// Entry dependencies in declaration order.
    #[must_use]
    pub fn entry_dependencies(&self) -> &[NodeId] {
        self.graph.outgoing(self.root)
    }

    /// Dependency nodes of an asset, in source order.
    #[must_use]
    pub fn dependencies_of(&self, asset: NodeId) -> &[NodeId] {
        self.graph.outgoing(asset)
    }

    /// Assets a dependency resolves to, in resolution order.
    #[must_use]
    pub fn resolutions_of(&self, dep: NodeId) -> &[NodeId] {
        self.graph.outgoing(dep)
    }

    /// The asset a dependency originates from, or `None` for entries.
    #[must_use]
    pub fn source_of(&self, dep: NodeId) -> Option<NodeId> {
        self.graph
            .incoming(dep)
            .iter()
            .copied()
            .find(|&n| matches!(self.graph.node(n), AssetGraphNode::Asset(_)))
    }

    /// All dependency node ids, in id order.
    pub fn dependency_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.graph
            .iter()
            .filter(|(_, n)| matches!(n, AssetGraphNode::Dependency(_)))
            .map(|(id, _)| id)
    }
}

impl Default for AssetGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Target;

    #[test]
    fn test_entry_wiring() {
        let mut g = AssetGraph::new();
        let dep = g.add_entry_dependency(Dependency::entry("entry", Target::new("web", "dist")));
        let asset = g.add_asset(Asset::new("a.js", "js", 100));
        g.resolve(dep, asset);

        assert_eq!(g.entry_dependencies(), &[dep]);
        assert_eq!(g.resolutions_of(dep), &[asset]);
        assert!(g.source_of(dep).is_none());
        assert_eq!(g.expect_asset(asset).id, "a.js");
    }

    #[test]
    fn test_source_of_skips_root() {
        let mut g = AssetGraph::new();
        let entry = g.add_entry_dependency(Dependency::entry("entry", Target::new("web", "dist")));
        let a = g.add_asset(Asset::new("a.js", "js", 100));
        g.resolve(entry, a);
        let dep = g.add_dependency(a, Dependency::new("a->b"));
        let b = g.add_asset(Asset::new("b.js", "js", 100));
        g.resolve(dep, b);

        assert_eq!(g.source_of(dep), Some(a));
        assert_eq!(g.dependencies_of(a), &[dep]);
    }

    #[test]
    #[should_panic(expected = "not an asset")]
    fn test_expect_asset_panics_on_dependency() {
        let mut g = AssetGraph::new();
        let dep = g.add_entry_dependency(Dependency::new("entry"));
        g.expect_asset(dep);
    }
}
