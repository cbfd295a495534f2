//! Optimizer passes over the bundle graph.
//!
//! The passes run in a fixed order and each assumes the invariants of its
//! predecessors: reparent splittable entries, remove assets duplicated in
//! ancestors, extract shared bundles, internalize satisfied async
//! dependencies. A pass that would push a bundle-group past the parallel
//! request limit declines the transformation instead of failing.

use crate::asset_graph::AssetGraphNode;
use crate::bundle_graph::{BundleGraph, BundleGroupId, BundleId, CreateBundle, ExternalResolution};
use crate::config::BundlerOptions;
use crate::error::Error;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;
use weft_graph::NodeId;

/// Run passes 2–5 in order.
pub fn run(graph: &mut BundleGraph<'_>, options: &BundlerOptions) -> Result<(), Error> {
    reparent_entry_bundles(graph, options);
    dedupe_ancestor_assets(graph);
    extract_shared_bundles(graph, options)?;
    internalize_async_dependencies(graph);
    debug!(
        bundles = graph.bundles().count(),
        groups = graph.bundle_groups().count(),
        "optimizer passes complete"
    );
    Ok(())
}

/// Pass 2: when a bundle's main entry is duplicated inside another
/// splittable bundle, drop the copy and load the original bundle alongside
/// instead, capacity permitting.
pub fn reparent_entry_bundles(graph: &mut BundleGraph<'_>, options: &BundlerOptions) {
    for bundle in graph.live_bundle_ids() {
        {
            let b = graph.bundle(bundle);
            if b.is_inline || !b.is_splittable {
                continue;
            }
        }
        let Some(main_entry) = graph.bundle(bundle).main_entry() else {
            continue;
        };
        let candidates: Vec<BundleId> = graph
            .find_bundles_with_asset(main_entry)
            .into_iter()
            .filter(|&c| c != bundle)
            .filter(|&c| {
                let candidate = graph.bundle(c);
                !candidate.is_entry && !candidate.is_inline && candidate.is_splittable
            })
            .collect();
        if candidates.is_empty() {
            continue;
        }

        // The bundle travels with its non-inline referenced siblings.
        let mut additions = vec![bundle];
        for referenced in graph.get_referenced_bundles(bundle) {
            if !graph.bundle(referenced).is_inline && !additions.contains(&referenced) {
                additions.push(referenced);
            }
        }

        for candidate in candidates {
            let groups = graph.get_bundle_groups_containing_bundle(candidate);
            let fits = groups.iter().all(|&group| {
                let members = graph.get_bundles_in_bundle_group(group);
                let joining = additions.iter().filter(|b| !members.contains(b)).count();
                members.len() + joining <= options.max_parallel_requests
            });
            if !fits {
                continue;
            }
            graph.remove_asset_graph_from_bundle(main_entry, candidate);
            for &group in &groups {
                for &addition in &additions {
                    graph.add_bundle_to_bundle_group(addition, group);
                }
            }
        }
    }
}

/// Pass 3: remove assets already guaranteed to be loaded by an ancestor
/// bundle, in post-order over the load hierarchy.
pub fn dedupe_ancestor_assets(graph: &mut BundleGraph<'_>) {
    for bundle in graph.bundles_post_order() {
        dedupe_bundle(graph, bundle);
    }
}

fn dedupe_bundle(graph: &mut BundleGraph<'_>, bundle: BundleId) {
    {
        let b = graph.bundle(bundle);
        if b.env.is_isolated() || !b.is_splittable {
            return;
        }
    }
    for dep in graph.bundle_dependencies(bundle) {
        for asset in graph.get_dependency_assets(dep).to_vec() {
            if graph.bundle(bundle).has_asset(asset)
                && graph.is_asset_in_ancestor_bundles(bundle, asset)
            {
                graph.remove_asset_graph_from_bundle(asset, bundle);
            }
        }
    }
}

struct SharedCandidate {
    /// Sorted, joined source-bundle ids; the bucket key.
    key: String,
    source_bundles: Vec<BundleId>,
    assets: Vec<NodeId>,
    size: u64,
}

/// Pass 4: factor assets duplicated across enough bundles into shared
/// bundles, largest candidates first.
pub fn extract_shared_bundles(
    graph: &mut BundleGraph<'_>,
    options: &BundlerOptions,
) -> Result<(), Error> {
    let assets = graph.asset_graph();

    // Scan bundle contents. A bucketed asset accounts for its whole
    // subgraph, so its children are not scanned again.
    let mut candidates: FxHashMap<String, SharedCandidate> = FxHashMap::default();
    let mut visited: FxHashSet<NodeId> = FxHashSet::default();
    let mut stack = vec![assets.root()];
    while let Some(node) = stack.pop() {
        if !visited.insert(node) {
            continue;
        }
        if matches!(assets.node(node), AssetGraphNode::Asset(_)) {
            let containing: Vec<BundleId> = graph
                .find_bundles_with_asset(node)
                .into_iter()
                .filter(|&b| {
                    let bundle = graph.bundle(b);
                    bundle.is_splittable
                        && !bundle.is_inline
                        && !bundle.env.is_isolated()
                        && bundle.main_entry() != Some(node)
                })
                .collect();
            if containing.len() > options.min_bundles {
                let mut ids: Vec<String> = containing.iter().map(ToString::to_string).collect();
                ids.sort();
                let key = ids.join(",");
                let size = graph.get_total_size(node);
                let candidate =
                    candidates
                        .entry(key.clone())
                        .or_insert_with(|| SharedCandidate {
                            key,
                            source_bundles: containing,
                            assets: Vec::new(),
                            size: 0,
                        });
                candidate.assets.push(node);
                candidate.size += size;
                continue;
            }
        }
        for &child in assets.graph().outgoing(node).iter().rev() {
            if !visited.contains(&child) {
                stack.push(child);
            }
        }
    }

    let mut ordered: Vec<SharedCandidate> = candidates
        .into_values()
        .filter(|c| c.size >= options.min_bundle_size)
        .collect();
    ordered.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.key.cmp(&b.key)));

    for candidate in ordered {
        let mut groups: Vec<BundleGroupId> = Vec::new();
        for &source in &candidate.source_bundles {
            for group in graph.get_bundle_groups_containing_bundle(source) {
                if !groups.contains(&group) {
                    groups.push(group);
                }
            }
        }
        // A group at the parallel-request limit declines the candidate.
        if groups
            .iter()
            .any(|&g| graph.get_bundles_in_bundle_group(g).len() >= options.max_parallel_requests)
        {
            continue;
        }

        let (asset_type, env, target) = {
            let first = graph.bundle(candidate.source_bundles[0]);
            (first.asset_type.clone(), first.env.clone(), first.target.clone())
        };
        for &source in &candidate.source_bundles[1..] {
            let bundle = graph.bundle(source);
            if bundle.asset_type != asset_type {
                return Err(Error::SharedBundleMismatch { what: "asset type" });
            }
            if bundle.env != env {
                return Err(Error::SharedBundleMismatch { what: "environment" });
            }
            if bundle.target != target {
                return Err(Error::SharedBundleMismatch { what: "target" });
            }
        }

        let unique_key = blake3::hash(candidate.key.as_bytes()).to_hex().to_string();
        let shared = graph.create_bundle(CreateBundle {
            entry_asset: None,
            unique_key: Some(unique_key),
            asset_type: Some(asset_type),
            env,
            target,
            is_entry: false,
            is_inline: false,
            is_splittable: true,
        })?;

        for &asset in &candidate.assets {
            graph.add_entry_asset(shared, asset);
            graph.add_asset_graph_to_bundle(asset, shared)?;
            for &source in &candidate.source_bundles {
                graph.remove_asset_graph_from_bundle(asset, source);
            }
        }
        for &group in &groups {
            graph.add_bundle_to_bundle_group(shared, group);
        }
        dedupe_bundle(graph, shared);

        debug!(
            bundle = shared,
            assets = candidate.assets.len(),
            size = candidate.size,
            "extracted shared bundle"
        );
    }

    Ok(())
}

/// Pass 5: mark async dependencies whose resolution is already available
/// in (or above) the requesting bundle as internally satisfied, then drop
/// async groups nobody loads anymore.
pub fn internalize_async_dependencies(graph: &mut BundleGraph<'_>) {
    let assets = graph.asset_graph();
    let mut async_groups: Vec<BundleGroupId> = Vec::new();

    for dep_id in assets.dependency_nodes().collect::<Vec<_>>() {
        let dep = assets.expect_dependency(dep_id);
        if dep.is_entry || !dep.is_async {
            continue;
        }
        let Some(resolution) = graph.get_dependency_resolution(dep_id) else {
            continue;
        };
        if let Some(ExternalResolution::BundleGroup(group)) =
            graph.resolve_external_dependency(dep_id)
        {
            if !async_groups.contains(&group) {
                async_groups.push(group);
            }
        }
        for bundle in graph.find_bundles_with_dependency(dep_id) {
            if graph.bundle(bundle).has_asset(resolution)
                || graph.is_asset_in_ancestor_bundles(bundle, resolution)
            {
                graph.internalize_async_dependency(bundle, dep_id);
            }
        }
    }

    for group in async_groups {
        if graph.get_parent_bundles_of_bundle_group(group).is_empty() {
            graph.remove_bundle_group(group);
        }
    }
}
