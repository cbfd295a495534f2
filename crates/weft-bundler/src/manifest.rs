//! Packager-facing summary of a bundle graph.
//!
//! The overlay itself borrows the asset graph and answers queries; the
//! manifest is the flat, serializable shape handed across the boundary to
//! the packager (and to anything that wants to diff two bundling results).

use crate::bundle_graph::{BundleGraph, BundleGroupId, BundleId};
use crate::types::AssetType;
use serde::{Deserialize, Serialize};

/// Summary of one bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleInfo {
    pub id: BundleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_key: Option<String>,
    pub asset_type: AssetType,
    pub target: String,
    pub is_entry: bool,
    pub is_inline: bool,
    /// Root asset ids in order.
    pub entry_assets: Vec<String>,
    /// All contained asset ids, sorted.
    pub assets: Vec<String>,
    /// Sum of contained asset sizes in bytes.
    pub total_size: u64,
    pub referenced_bundles: Vec<BundleId>,
    /// Async dependency ids satisfied inside this bundle; the code
    /// generator elides their loader calls.
    pub internalized_dependencies: Vec<String>,
}

/// Summary of one bundle-group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleGroupInfo {
    pub id: BundleGroupId,
    /// Id of the dependency that triggered the group.
    pub dependency: String,
    pub target: String,
    pub bundles: Vec<BundleId>,
}

/// A dependency whose resolution lives in another bundle; the packager
/// rewrites the require site accordingly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetReferenceInfo {
    pub dependency: String,
    pub asset: String,
}

/// The complete hand-off to the packager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub bundles: Vec<BundleInfo>,
    pub groups: Vec<BundleGroupInfo>,
    pub asset_references: Vec<AssetReferenceInfo>,
}

impl BundleManifest {
    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl BundleGraph<'_> {
    /// Flatten the live bundles and groups into a manifest.
    #[must_use]
    pub fn to_manifest(&self) -> BundleManifest {
        let assets = self.asset_graph();

        let bundles = self
            .bundles()
            .map(|bundle| {
                let members = bundle.assets();
                BundleInfo {
                    id: bundle.id,
                    unique_key: bundle.unique_key.clone(),
                    asset_type: bundle.asset_type.clone(),
                    target: bundle.target.name.clone(),
                    is_entry: bundle.is_entry,
                    is_inline: bundle.is_inline,
                    entry_assets: bundle
                        .entry_assets()
                        .iter()
                        .map(|&a| assets.expect_asset(a).id.clone())
                        .collect(),
                    assets: members
                        .iter()
                        .map(|&a| assets.expect_asset(a).id.clone())
                        .collect(),
                    total_size: members.iter().map(|&a| assets.expect_asset(a).size).sum(),
                    referenced_bundles: self.get_referenced_bundles(bundle.id),
                    internalized_dependencies: self
                        .internalized_dependencies(bundle.id)
                        .iter()
                        .map(|&d| assets.expect_dependency(d).id.clone())
                        .collect(),
                }
            })
            .collect();

        let groups = self
            .bundle_groups()
            .map(|group| BundleGroupInfo {
                id: group.id,
                dependency: assets.expect_dependency(group.dependency).id.clone(),
                target: group.target.name.clone(),
                bundles: self.get_bundles_in_bundle_group(group.id),
            })
            .collect();

        let asset_references = self
            .asset_references()
            .iter()
            .map(|&(dep, asset)| AssetReferenceInfo {
                dependency: assets.expect_dependency(dep).id.clone(),
                asset: assets.expect_asset(asset).id.clone(),
            })
            .collect();

        BundleManifest {
            bundles,
            groups,
            asset_references,
        }
    }
}
