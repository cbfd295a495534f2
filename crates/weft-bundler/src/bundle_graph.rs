//! Mutable overlay over the asset graph: bundles, bundle-groups,
//! containment, references, and the ancestry queries the optimizer passes
//! are built on.
//!
//! Containment is computed by walking the asset graph without crossing
//! split points: dependencies that open a bundle-group (entries, dynamic
//! imports, isolated or inline resolutions) and dependency -> asset pairs
//! recorded as asset references. Keeping type-parallel subgraphs behind
//! references is what makes every bundle type-homogeneous.

use crate::asset_graph::AssetGraph;
use crate::error::Error;
use crate::types::{AssetType, Environment, Target};
use rustc_hash::{FxHashMap, FxHashSet};
use weft_graph::NodeId;

pub type BundleId = usize;
pub type BundleGroupId = usize;

/// An emittable artifact grouping assets of one type.
#[derive(Debug)]
pub struct Bundle {
    pub id: BundleId,
    /// Identity for bundles without a single entry asset (shared bundles).
    pub unique_key: Option<String>,
    pub asset_type: AssetType,
    pub env: Environment,
    pub target: Target,
    pub is_entry: bool,
    pub is_inline: bool,
    /// Whether the optimizer may move assets in or out.
    pub is_splittable: bool,
    entry_assets: Vec<NodeId>,
    assets: FxHashSet<NodeId>,
}

impl Bundle {
    /// Ordered root assets whose reachable subgraphs comprise the bundle.
    #[must_use]
    pub fn entry_assets(&self) -> &[NodeId] {
        &self.entry_assets
    }

    /// The first entry asset, if any.
    #[must_use]
    pub fn main_entry(&self) -> Option<NodeId> {
        self.entry_assets.first().copied()
    }

    #[must_use]
    pub fn has_asset(&self, asset: NodeId) -> bool {
        self.assets.contains(&asset)
    }

    /// Assets currently attached, in id order.
    #[must_use]
    pub fn assets(&self) -> Vec<NodeId> {
        let mut assets: Vec<NodeId> = self.assets.iter().copied().collect();
        assets.sort_unstable();
        assets
    }

    #[must_use]
    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }
}

/// An atomic loadable unit: the bundles fetched together for one entry or
/// one dynamic import site.
#[derive(Debug)]
pub struct BundleGroup {
    pub id: BundleGroupId,
    /// The dependency that triggered the group.
    pub dependency: NodeId,
    pub target: Target,
    bundles: Vec<BundleId>,
}

impl BundleGroup {
    /// Member bundles in attachment order.
    #[must_use]
    pub fn bundles(&self) -> &[BundleId] {
        &self.bundles
    }
}

/// Parameters for [`BundleGraph::create_bundle`].
#[derive(Debug)]
pub struct CreateBundle {
    /// Root asset. Either this or `unique_key` must be set.
    pub entry_asset: Option<NodeId>,
    pub unique_key: Option<String>,
    /// Required when there is no entry asset to inherit the type from.
    pub asset_type: Option<AssetType>,
    pub env: Environment,
    pub target: Target,
    pub is_entry: bool,
    pub is_inline: bool,
    pub is_splittable: bool,
}

/// What a dependency that crosses bundle boundaries resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalResolution {
    BundleGroup(BundleGroupId),
    Asset(NodeId),
}

/// The bundle graph: the output of bundling, mutated in place by the
/// optimizer passes and handed to the packager.
#[derive(Debug)]
pub struct BundleGraph<'a> {
    assets: &'a AssetGraph,
    bundles: Vec<Bundle>,
    groups: Vec<BundleGroup>,
    dead_bundles: FxHashSet<BundleId>,
    dead_groups: FxHashSet<BundleGroupId>,
    groups_by_bundle: FxHashMap<BundleId, Vec<BundleGroupId>>,
    bundles_by_asset: FxHashMap<NodeId, Vec<BundleId>>,
    references: FxHashMap<BundleId, Vec<BundleId>>,
    referenced_by: FxHashMap<BundleId, Vec<BundleId>>,
    asset_references: FxHashMap<NodeId, Vec<NodeId>>,
    referenced_edges: FxHashSet<(NodeId, NodeId)>,
    internalized: FxHashMap<BundleId, FxHashSet<NodeId>>,
}

impl<'a> BundleGraph<'a> {
    #[must_use]
    pub fn new(assets: &'a AssetGraph) -> Self {
        Self {
            assets,
            bundles: Vec::new(),
            groups: Vec::new(),
            dead_bundles: FxHashSet::default(),
            dead_groups: FxHashSet::default(),
            groups_by_bundle: FxHashMap::default(),
            bundles_by_asset: FxHashMap::default(),
            references: FxHashMap::default(),
            referenced_by: FxHashMap::default(),
            asset_references: FxHashMap::default(),
            referenced_edges: FxHashSet::default(),
            internalized: FxHashMap::default(),
        }
    }

    /// The asset graph this overlay was built over.
    #[must_use]
    pub fn asset_graph(&self) -> &'a AssetGraph {
        self.assets
    }

    pub fn create_bundle_group(&mut self, dependency: NodeId, target: Target) -> BundleGroupId {
        let id = self.groups.len();
        self.groups.push(BundleGroup {
            id,
            dependency,
            target,
            bundles: Vec::new(),
        });
        id
    }

    pub fn create_bundle(&mut self, params: CreateBundle) -> Result<BundleId, Error> {
        if params.entry_asset.is_none() && params.unique_key.is_none() {
            return Err(Error::BundleWithoutIdentity);
        }
        let (asset_type, entry_assets) = if let Some(entry) = params.entry_asset {
            (
                self.assets.expect_asset(entry).asset_type.clone(),
                vec![entry],
            )
        } else {
            let ty = params.asset_type.ok_or(Error::BundleWithoutIdentity)?;
            (ty, Vec::new())
        };

        let id = self.bundles.len();
        self.bundles.push(Bundle {
            id,
            unique_key: params.unique_key,
            asset_type,
            env: params.env,
            target: params.target,
            is_entry: params.is_entry,
            is_inline: params.is_inline,
            is_splittable: params.is_splittable,
            entry_assets,
            assets: FxHashSet::default(),
        });
        Ok(id)
    }

    /// Attach `bundle` to `group`. Idempotent.
    pub fn add_bundle_to_bundle_group(&mut self, bundle: BundleId, group: BundleGroupId) {
        if self.groups[group].bundles.contains(&bundle) {
            return;
        }
        self.groups[group].bundles.push(bundle);
        self.groups_by_bundle.entry(bundle).or_default().push(group);
    }

    /// Append a root asset to a bundle.
    pub fn add_entry_asset(&mut self, bundle: BundleId, asset: NodeId) {
        let entries = &mut self.bundles[bundle].entry_assets;
        if !entries.contains(&asset) {
            entries.push(asset);
        }
    }

    /// Attach `asset` and everything transitively reachable from it that
    /// is not across a split point. Idempotent per asset per bundle.
    pub fn add_asset_graph_to_bundle(&mut self, asset: NodeId, bundle: BundleId) -> Result<(), Error> {
        let assets = self.assets;
        let mut stack = vec![asset];
        while let Some(node) = stack.pop() {
            if self.bundles[bundle].assets.contains(&node) {
                continue;
            }
            let weight = assets.expect_asset(node);
            if weight.asset_type != self.bundles[bundle].asset_type {
                return Err(Error::TypeMismatch {
                    asset: weight.id.clone(),
                    asset_type: weight.asset_type.clone(),
                    bundle,
                    bundle_type: self.bundles[bundle].asset_type.clone(),
                });
            }
            self.bundles[bundle].assets.insert(node);
            let containing = self.bundles_by_asset.entry(node).or_default();
            if !containing.contains(&bundle) {
                containing.push(bundle);
            }
            for &dep in assets.dependencies_of(node) {
                if self.is_split_dependency(dep) {
                    continue;
                }
                for &resolved in assets.resolutions_of(dep) {
                    if self.referenced_edges.contains(&(dep, resolved)) {
                        continue;
                    }
                    stack.push(resolved);
                }
            }
        }
        Ok(())
    }

    /// Remove `asset` and its subgraph from `bundle`, keeping any node
    /// still reachable from another entry of the bundle on a path that
    /// avoids `asset`.
    pub fn remove_asset_graph_from_bundle(&mut self, asset: NodeId, bundle: BundleId) {
        let members = self.bundles[bundle].assets.clone();
        if !members.contains(&asset) {
            return;
        }

        let mut retained = FxHashSet::default();
        let entries = self.bundles[bundle].entry_assets.clone();
        for &entry in &entries {
            if entry == asset {
                continue;
            }
            self.reachable_within(entry, &members, Some(asset), &mut retained);
        }

        let mut doomed = FxHashSet::default();
        self.reachable_within(asset, &members, None, &mut doomed);

        let mut removed: Vec<NodeId> = doomed.difference(&retained).copied().collect();
        removed.sort_unstable();
        for node in removed {
            self.bundles[bundle].assets.remove(&node);
            if let Some(containing) = self.bundles_by_asset.get_mut(&node) {
                containing.retain(|&b| b != bundle);
            }
        }

        let keep: Vec<NodeId> = {
            let b = &self.bundles[bundle];
            b.entry_assets
                .iter()
                .copied()
                .filter(|e| b.assets.contains(e))
                .collect()
        };
        self.bundles[bundle].entry_assets = keep;
    }

    /// Record that `dep` resolves to `asset` in a different bundle. The
    /// pair is excluded from containment traversal from here on.
    pub fn create_asset_reference(&mut self, dep: NodeId, asset: NodeId) {
        if self.referenced_edges.insert((dep, asset)) {
            self.asset_references.entry(dep).or_default().push(asset);
        }
    }

    /// Record that `from`'s code causes `to` to load.
    pub fn create_bundle_reference(&mut self, from: BundleId, to: BundleId) {
        let refs = self.references.entry(from).or_default();
        if !refs.contains(&to) {
            refs.push(to);
            self.referenced_by.entry(to).or_default().push(from);
        }
    }

    /// Mark an async dependency as satisfied inside `bundle`; the code
    /// generator elides the loader call and the bundle no longer counts as
    /// a parent of the group the dependency resolves to.
    pub fn internalize_async_dependency(&mut self, bundle: BundleId, dep: NodeId) {
        self.internalized.entry(bundle).or_default().insert(dep);
    }

    /// Remove a bundle group, dropping member bundles left in no group.
    pub fn remove_bundle_group(&mut self, group: BundleGroupId) {
        if !self.dead_groups.insert(group) {
            return;
        }
        let members = self.groups[group].bundles.clone();
        for bundle in members {
            if let Some(groups) = self.groups_by_bundle.get_mut(&bundle) {
                groups.retain(|&g| g != group);
            }
            if self
                .groups_by_bundle
                .get(&bundle)
                .map_or(true, |v| v.is_empty())
            {
                self.remove_bundle(bundle);
            }
        }
    }

    fn remove_bundle(&mut self, bundle: BundleId) {
        if !self.dead_bundles.insert(bundle) {
            return;
        }
        let members: Vec<NodeId> = self.bundles[bundle].assets.drain().collect();
        for node in members {
            if let Some(containing) = self.bundles_by_asset.get_mut(&node) {
                containing.retain(|&b| b != bundle);
            }
        }
        self.bundles[bundle].entry_assets.clear();
    }

    // ---- queries ----

    #[must_use]
    pub fn bundle(&self, id: BundleId) -> &Bundle {
        &self.bundles[id]
    }

    #[must_use]
    pub fn group(&self, id: BundleGroupId) -> &BundleGroup {
        &self.groups[id]
    }

    /// Live bundles in creation order.
    pub fn bundles(&self) -> impl Iterator<Item = &Bundle> {
        self.bundles
            .iter()
            .filter(|b| !self.dead_bundles.contains(&b.id))
    }

    /// Live bundle groups in creation order.
    pub fn bundle_groups(&self) -> impl Iterator<Item = &BundleGroup> {
        self.groups
            .iter()
            .filter(|g| !self.dead_groups.contains(&g.id))
    }

    /// Ids of live bundles in creation order.
    #[must_use]
    pub fn live_bundle_ids(&self) -> Vec<BundleId> {
        self.bundles().map(|b| b.id).collect()
    }

    /// Assets a dependency resolves to.
    #[must_use]
    pub fn get_dependency_assets(&self, dep: NodeId) -> &[NodeId] {
        self.assets.resolutions_of(dep)
    }

    /// The unique resolved asset of a dependency, if any.
    #[must_use]
    pub fn get_dependency_resolution(&self, dep: NodeId) -> Option<NodeId> {
        self.assets.resolutions_of(dep).first().copied()
    }

    /// Dependency nodes of an asset.
    #[must_use]
    pub fn get_dependencies(&self, asset: NodeId) -> &[NodeId] {
        self.assets.dependencies_of(asset)
    }

    /// Live bundles containing `asset`, in id order.
    #[must_use]
    pub fn find_bundles_with_asset(&self, asset: NodeId) -> Vec<BundleId> {
        let mut bundles: Vec<BundleId> = self
            .bundles_by_asset
            .get(&asset)
            .map(|v| {
                v.iter()
                    .copied()
                    .filter(|b| !self.dead_bundles.contains(b))
                    .collect()
            })
            .unwrap_or_default();
        bundles.sort_unstable();
        bundles
    }

    /// Live bundles containing the asset a dependency originates from.
    #[must_use]
    pub fn find_bundles_with_dependency(&self, dep: NodeId) -> Vec<BundleId> {
        match self.assets.source_of(dep) {
            Some(source) => self.find_bundles_with_asset(source),
            None => Vec::new(),
        }
    }

    /// Live groups `bundle` belongs to, in attachment order.
    #[must_use]
    pub fn get_bundle_groups_containing_bundle(&self, bundle: BundleId) -> Vec<BundleGroupId> {
        self.groups_by_bundle
            .get(&bundle)
            .map(|v| {
                v.iter()
                    .copied()
                    .filter(|g| !self.dead_groups.contains(g))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Live members of a group, in attachment order.
    #[must_use]
    pub fn get_bundles_in_bundle_group(&self, group: BundleGroupId) -> Vec<BundleId> {
        self.groups[group]
            .bundles
            .iter()
            .copied()
            .filter(|b| !self.dead_bundles.contains(b))
            .collect()
    }

    /// Bundles `bundle` references, in recording order.
    #[must_use]
    pub fn get_referenced_bundles(&self, bundle: BundleId) -> Vec<BundleId> {
        self.references
            .get(&bundle)
            .map(|v| {
                v.iter()
                    .copied()
                    .filter(|b| !self.dead_bundles.contains(b))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Other bundles sharing a group with `bundle`.
    #[must_use]
    pub fn get_sibling_bundles(&self, bundle: BundleId) -> Vec<BundleId> {
        let mut siblings = Vec::new();
        for group in self.get_bundle_groups_containing_bundle(bundle) {
            for member in self.get_bundles_in_bundle_group(group) {
                if member != bundle && !siblings.contains(&member) {
                    siblings.push(member);
                }
            }
        }
        siblings
    }

    /// Bundles that load this group: those containing the group's
    /// triggering dependency and not having internalized it. Empty for
    /// entry groups.
    #[must_use]
    pub fn get_parent_bundles_of_bundle_group(&self, group: BundleGroupId) -> Vec<BundleId> {
        let dep = self.groups[group].dependency;
        let Some(source) = self.assets.source_of(dep) else {
            return Vec::new();
        };
        self.find_bundles_with_asset(source)
            .into_iter()
            .filter(|b| !self.internalized.get(b).is_some_and(|s| s.contains(&dep)))
            .collect()
    }

    /// Whether `asset` is guaranteed to be loaded before `bundle` in every
    /// group the bundle belongs to.
    ///
    /// For each group, the ancestors are the group's earlier co-members,
    /// its parent bundles, bundles referencing `bundle`, and their
    /// ancestors transitively; `asset` must be present in some ancestor
    /// for every group.
    #[must_use]
    pub fn is_asset_in_ancestor_bundles(&self, bundle: BundleId, asset: NodeId) -> bool {
        let groups = self.get_bundle_groups_containing_bundle(bundle);
        if groups.is_empty() {
            return false;
        }
        groups.iter().all(|&group| {
            self.group_ancestors(group, bundle)
                .iter()
                .any(|&a| self.bundles[a].assets.contains(&asset))
        })
    }

    fn group_ancestors(&self, group: BundleGroupId, bundle: BundleId) -> FxHashSet<BundleId> {
        let mut frontier: Vec<BundleId> = Vec::new();
        for &member in self.groups[group].bundles() {
            if member == bundle {
                break;
            }
            frontier.push(member);
        }
        frontier.extend(self.get_parent_bundles_of_bundle_group(group));
        if let Some(refs) = self.referenced_by.get(&bundle) {
            frontier.extend(refs.iter().copied());
        }

        let mut seen = FxHashSet::default();
        while let Some(current) = frontier.pop() {
            if current == bundle
                || self.dead_bundles.contains(&current)
                || !seen.insert(current)
            {
                continue;
            }
            if let Some(refs) = self.referenced_by.get(&current) {
                frontier.extend(refs.iter().copied());
            }
            for g in self.get_bundle_groups_containing_bundle(current) {
                for &member in self.groups[g].bundles() {
                    if member == current {
                        break;
                    }
                    frontier.push(member);
                }
                frontier.extend(self.get_parent_bundles_of_bundle_group(g));
            }
        }
        seen
    }

    /// Whether a dependency in a bundle other than `bundle` references
    /// `asset` across bundle boundaries.
    #[must_use]
    pub fn is_asset_referenced_by_dependant(&self, bundle: BundleId, asset: NodeId) -> bool {
        self.asset_references.iter().any(|(&dep, targets)| {
            targets.contains(&asset)
                && self
                    .find_bundles_with_dependency(dep)
                    .iter()
                    .any(|&b| b != bundle)
        })
    }

    /// Total size in bytes of the subgraph rooted at `asset`, bounded by
    /// the same split points as containment.
    #[must_use]
    pub fn get_total_size(&self, asset: NodeId) -> u64 {
        let assets = self.assets;
        let mut visited = FxHashSet::default();
        let mut stack = vec![asset];
        let mut total = 0;
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            total += assets.expect_asset(node).size;
            for &dep in assets.dependencies_of(node) {
                if self.is_split_dependency(dep) {
                    continue;
                }
                for &resolved in assets.resolutions_of(dep) {
                    if !self.referenced_edges.contains(&(dep, resolved)) {
                        stack.push(resolved);
                    }
                }
            }
        }
        total
    }

    /// Resolve a dependency that crosses bundle boundaries: the group it
    /// triggers, or the asset it references in a sibling bundle.
    #[must_use]
    pub fn resolve_external_dependency(&self, dep: NodeId) -> Option<ExternalResolution> {
        if let Some(group) = self
            .groups
            .iter()
            .find(|g| !self.dead_groups.contains(&g.id) && g.dependency == dep)
        {
            return Some(ExternalResolution::BundleGroup(group.id));
        }
        self.asset_references
            .get(&dep)
            .and_then(|targets| targets.first())
            .copied()
            .map(ExternalResolution::Asset)
    }

    /// Async dependencies satisfied inside `bundle`, in node id order.
    #[must_use]
    pub fn internalized_dependencies(&self, bundle: BundleId) -> Vec<NodeId> {
        let mut deps: Vec<NodeId> = self
            .internalized
            .get(&bundle)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        deps.sort_unstable();
        deps
    }

    /// All recorded asset references as (dependency, asset) pairs, sorted.
    #[must_use]
    pub fn asset_references(&self) -> Vec<(NodeId, NodeId)> {
        let mut refs: Vec<(NodeId, NodeId)> = self.referenced_edges.iter().copied().collect();
        refs.sort_unstable();
        refs
    }

    /// Live groups triggered by entry dependencies, in creation order.
    #[must_use]
    pub fn entry_groups(&self) -> Vec<BundleGroupId> {
        self.bundle_groups()
            .filter(|g| self.assets.expect_dependency(g.dependency).is_entry)
            .map(|g| g.id)
            .collect()
    }

    /// Live bundles in post-order over the load hierarchy: a bundle comes
    /// after every bundle a group it triggers can load.
    #[must_use]
    pub fn bundles_post_order(&self) -> Vec<BundleId> {
        let mut order = Vec::new();
        let mut seen_groups = FxHashSet::default();
        let mut seen_bundles = FxHashSet::default();
        for group in self.entry_groups() {
            self.post_order_group(group, &mut seen_groups, &mut seen_bundles, &mut order);
        }
        for bundle in self.live_bundle_ids() {
            if seen_bundles.insert(bundle) {
                order.push(bundle);
            }
        }
        order
    }

    fn post_order_group(
        &self,
        group: BundleGroupId,
        seen_groups: &mut FxHashSet<BundleGroupId>,
        seen_bundles: &mut FxHashSet<BundleId>,
        order: &mut Vec<BundleId>,
    ) {
        if !seen_groups.insert(group) {
            return;
        }
        for bundle in self.get_bundles_in_bundle_group(group) {
            self.post_order_bundle(bundle, seen_groups, seen_bundles, order);
        }
    }

    fn post_order_bundle(
        &self,
        bundle: BundleId,
        seen_groups: &mut FxHashSet<BundleGroupId>,
        seen_bundles: &mut FxHashSet<BundleId>,
        order: &mut Vec<BundleId>,
    ) {
        if !seen_bundles.insert(bundle) {
            return;
        }
        for group in self.child_groups(bundle) {
            self.post_order_group(group, seen_groups, seen_bundles, order);
        }
        order.push(bundle);
    }

    /// Groups triggered by dependencies originating inside `bundle`.
    fn child_groups(&self, bundle: BundleId) -> Vec<BundleGroupId> {
        self.bundle_groups()
            .filter(|g| {
                self.assets
                    .source_of(g.dependency)
                    .is_some_and(|src| self.bundles[bundle].assets.contains(&src))
            })
            .map(|g| g.id)
            .collect()
    }

    /// Dependency nodes of every asset in `bundle`, in a stable
    /// entry-rooted walk order.
    #[must_use]
    pub fn bundle_dependencies(&self, bundle: BundleId) -> Vec<NodeId> {
        let assets = self.assets;
        let members = &self.bundles[bundle].assets;
        let mut deps = Vec::new();
        let mut visited = FxHashSet::default();
        let mut stack: Vec<NodeId> = self.bundles[bundle]
            .entry_assets
            .iter()
            .rev()
            .copied()
            .collect();
        while let Some(node) = stack.pop() {
            if !members.contains(&node) || !visited.insert(node) {
                continue;
            }
            for &dep in assets.dependencies_of(node) {
                deps.push(dep);
            }
            for &dep in assets.dependencies_of(node).iter().rev() {
                if self.is_split_dependency(dep) {
                    continue;
                }
                for &resolved in assets.resolutions_of(dep).iter().rev() {
                    if !self.referenced_edges.contains(&(dep, resolved)) {
                        stack.push(resolved);
                    }
                }
            }
        }
        deps
    }

    /// Whether a dependency is a code-split point: it opened a bundle
    /// group during bundling.
    fn is_split_dependency(&self, dep: NodeId) -> bool {
        let weight = self.assets.expect_dependency(dep);
        if weight.is_entry || weight.is_async {
            return true;
        }
        self.assets.resolutions_of(dep).first().is_some_and(|&r| {
            let asset = self.assets.expect_asset(r);
            asset.is_isolated || asset.is_inline
        })
    }

    fn reachable_within(
        &self,
        from: NodeId,
        members: &FxHashSet<NodeId>,
        blocked: Option<NodeId>,
        out: &mut FxHashSet<NodeId>,
    ) {
        if !members.contains(&from) || blocked == Some(from) {
            return;
        }
        let assets = self.assets;
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if !out.insert(node) {
                continue;
            }
            for &dep in assets.dependencies_of(node) {
                if self.is_split_dependency(dep) {
                    continue;
                }
                for &resolved in assets.resolutions_of(dep) {
                    if self.referenced_edges.contains(&(dep, resolved))
                        || blocked == Some(resolved)
                        || !members.contains(&resolved)
                    {
                        continue;
                    }
                    stack.push(resolved);
                }
            }
        }
    }
}
