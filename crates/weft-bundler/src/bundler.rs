//! Initial bundling: materialize bundles and bundle-groups at the code
//! split points of the asset graph.
//!
//! A new bundle-group opens at every entry or dynamic-import dependency
//! (and at isolated or inline resolutions); inside a group, an asset whose
//! type differs from its parent gets a parallel bundle of its own type.
//! Only bundle roots are recorded during the walk; contents are populated
//! afterwards by expanding each root's subgraph.

use crate::asset_graph::AssetGraphNode;
use crate::bundle_graph::{BundleGraph, BundleGroupId, BundleId, CreateBundle};
use crate::error::Error;
use crate::types::AssetType;
use rustc_hash::FxHashMap;
use tracing::debug;
use weft_graph::{NodeId, Visitor, Walk};

/// Context inherited down the asset-graph walk. The group's triggering
/// dependency is not carried separately; the group itself records it.
#[derive(Debug, Clone, Default)]
struct Ctx {
    bundle_group: Option<BundleGroupId>,
    /// Index into the per-group type -> bundle map arena.
    bundle_by_type: Option<usize>,
    parent_bundle: Option<BundleId>,
    parent_asset: Option<NodeId>,
}

struct InitialBundler<'b, 'a> {
    graph: &'b mut BundleGraph<'a>,
    bundles_by_entry_asset: FxHashMap<NodeId, BundleId>,
    /// One type -> bundle map per bundle-group; shared by every visit inside
    /// the group.
    type_maps: Vec<FxHashMap<AssetType, BundleId>>,
    /// Sibling-bundle lists. Same-type children alias their parent's list
    /// on purpose: a sibling created anywhere under a root must be visible
    /// wherever that subtree is re-entered from another group.
    sibling_lists: Vec<Vec<BundleId>>,
    sibling_list_by_asset: FxHashMap<NodeId, usize>,
}

impl InitialBundler<'_, '_> {
    fn sibling_list_of(&mut self, asset: NodeId) -> usize {
        if let Some(&idx) = self.sibling_list_by_asset.get(&asset) {
            return idx;
        }
        let idx = self.sibling_lists.len();
        self.sibling_lists.push(Vec::new());
        self.sibling_list_by_asset.insert(asset, idx);
        idx
    }

    fn enter_dependency(&mut self, dep_id: NodeId, ctx: &Ctx) -> Result<Walk<Ctx>, Error> {
        let assets = self.graph.asset_graph();
        let dep = assets.expect_dependency(dep_id);
        let resolved = assets.resolutions_of(dep_id);

        if resolved.is_empty() {
            if dep.is_optional || dep.is_weak {
                return Ok(Walk::SkipChildren);
            }
            return Err(Error::UnresolvedDependency { id: dep.id.clone() });
        }

        let resolution = assets.expect_asset(resolved[0]);
        if dep.is_entry || dep.is_async || resolution.is_isolated || resolution.is_inline {
            return self.open_bundle_group(dep_id, ctx);
        }
        self.extend_bundle_group(dep_id, ctx)?;
        Ok(Walk::Descend(ctx.clone()))
    }

    /// A dependency that is a split point: every resolved asset becomes the
    /// entry of a fresh bundle in a fresh group.
    fn open_bundle_group(&mut self, dep_id: NodeId, ctx: &Ctx) -> Result<Walk<Ctx>, Error> {
        let assets = self.graph.asset_graph();
        let dep = assets.expect_dependency(dep_id);

        let target = match (&dep.target, ctx.bundle_group) {
            (Some(target), _) => target.clone(),
            (None, Some(group)) => self.graph.group(group).target.clone(),
            (None, None) => {
                return Err(Error::MissingTarget { id: dep.id.clone() });
            }
        };

        let group = self.graph.create_bundle_group(dep_id, target.clone());
        let type_map = self.type_maps.len();
        self.type_maps.push(FxHashMap::default());

        for &asset_id in assets.resolutions_of(dep_id) {
            let asset = assets.expect_asset(asset_id);
            let bundle = self.graph.create_bundle(CreateBundle {
                entry_asset: Some(asset_id),
                unique_key: None,
                asset_type: None,
                env: asset.env.clone(),
                target: target.clone(),
                is_entry: if asset.is_isolated { false } else { dep.is_entry },
                is_inline: asset.is_inline,
                is_splittable: !asset.is_isolated,
            })?;
            self.type_maps[type_map].insert(asset.asset_type.clone(), bundle);
            self.bundles_by_entry_asset.insert(asset_id, bundle);
            self.sibling_list_of(asset_id);
            self.graph.add_bundle_to_bundle_group(bundle, group);
        }

        let mut next = ctx.clone();
        next.bundle_group = Some(group);
        next.bundle_by_type = Some(type_map);
        Ok(Walk::Descend(next))
    }

    /// A dependency inside an existing group: same-type assets flow into
    /// the current bundle, type changes open parallel sibling bundles.
    fn extend_bundle_group(&mut self, dep_id: NodeId, ctx: &Ctx) -> Result<(), Error> {
        let assets = self.graph.asset_graph();
        let dep = assets.expect_dependency(dep_id);
        let parent_asset_id = ctx.parent_asset.ok_or_else(|| Error::MissingParent {
            id: dep.id.clone(),
        })?;
        let (group, type_map) = match (ctx.bundle_group, ctx.bundle_by_type) {
            (Some(group), Some(type_map)) => (group, type_map),
            _ => {
                return Err(Error::MissingParent { id: dep.id.clone() });
            }
        };

        let parent_type = assets.expect_asset(parent_asset_id).asset_type.clone();
        let all_same_type = assets
            .resolutions_of(dep_id)
            .iter()
            .all(|&a| assets.expect_asset(a).asset_type == parent_type);

        for &asset_id in assets.resolutions_of(dep_id) {
            let asset = assets.expect_asset(asset_id);

            if asset.asset_type == parent_type {
                if all_same_type && self.sibling_list_by_asset.contains_key(&asset_id) {
                    // Re-entry through a new group: the asset's previously
                    // generated type-siblings must load with this group too.
                    let siblings = self.sibling_lists[self.sibling_list_by_asset[&asset_id]].clone();
                    for sibling in siblings {
                        self.graph.add_bundle_to_bundle_group(sibling, group);
                    }
                } else if !self.sibling_list_by_asset.contains_key(&asset_id) {
                    let list = if all_same_type {
                        self.sibling_list_of(parent_asset_id)
                    } else {
                        let idx = self.sibling_lists.len();
                        self.sibling_lists.push(Vec::new());
                        idx
                    };
                    self.sibling_list_by_asset.insert(asset_id, list);
                }
                continue;
            }

            if let Some(&existing) = self.type_maps[type_map].get(&asset.asset_type) {
                self.graph.add_entry_asset(existing, asset_id);
                self.graph.create_asset_reference(dep_id, asset_id);
            } else {
                let bundle = self.graph.create_bundle(CreateBundle {
                    entry_asset: Some(asset_id),
                    unique_key: None,
                    asset_type: None,
                    env: asset.env.clone(),
                    target: self.graph.group(group).target.clone(),
                    is_entry: false,
                    is_inline: asset.is_inline,
                    is_splittable: !asset.is_isolated,
                })?;
                self.type_maps[type_map].insert(asset.asset_type.clone(), bundle);
                let parent_list = self.sibling_list_of(parent_asset_id);
                self.sibling_lists[parent_list].push(bundle);
                self.bundles_by_entry_asset.insert(asset_id, bundle);
                self.sibling_list_of(asset_id);
                self.graph.create_asset_reference(dep_id, asset_id);
                if let Some(parent_bundle) = ctx.parent_bundle {
                    self.graph.create_bundle_reference(parent_bundle, bundle);
                }
                self.graph.add_bundle_to_bundle_group(bundle, group);
            }
        }

        Ok(())
    }
}

impl Visitor<AssetGraphNode> for InitialBundler<'_, '_> {
    type Context = Ctx;
    type Error = Error;

    fn enter(
        &mut self,
        id: NodeId,
        node: &AssetGraphNode,
        ctx: &Ctx,
    ) -> Result<Walk<Ctx>, Error> {
        match node {
            AssetGraphNode::Root => Ok(Walk::Descend(Ctx::default())),
            AssetGraphNode::Asset(_) => {
                let mut next = ctx.clone();
                next.parent_asset = Some(id);
                if let Some(&bundle) = self.bundles_by_entry_asset.get(&id) {
                    next.parent_bundle = Some(bundle);
                }
                Ok(Walk::Descend(next))
            }
            AssetGraphNode::Dependency(_) => self.enter_dependency(id, ctx),
        }
    }
}

/// Pass 1: walk the asset graph, create bundle-groups at split points and
/// typed bundles within them, then populate every bundle from its roots.
pub fn create_initial_bundles(graph: &mut BundleGraph<'_>) -> Result<(), Error> {
    let assets = graph.asset_graph();
    {
        let mut visitor = InitialBundler {
            graph: &mut *graph,
            bundles_by_entry_asset: FxHashMap::default(),
            type_maps: Vec::new(),
            sibling_lists: Vec::new(),
            sibling_list_by_asset: FxHashMap::default(),
        };
        assets
            .graph()
            .traverse(&[assets.root()], &Ctx::default(), &mut visitor)?;
    }

    for bundle in graph.live_bundle_ids() {
        for root in graph.bundle(bundle).entry_assets().to_vec() {
            graph.add_asset_graph_to_bundle(root, bundle)?;
        }
    }

    debug!(
        bundles = graph.bundles().count(),
        groups = graph.bundle_groups().count(),
        "initial bundling complete"
    );
    Ok(())
}
