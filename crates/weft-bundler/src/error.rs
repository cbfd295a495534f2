use crate::types::AssetType;
use thiserror::Error;

/// Core error type for bundling operations.
///
/// Only structural violations surface here. Resource-limit conflicts
/// (a bundle-group at its parallel-request limit) are resolved by
/// declining the transformation and are never errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("dependency {id} resolved to no assets and is not optional")]
    UnresolvedDependency { id: String },

    #[error("dependency {id} reached without a parent asset in context")]
    MissingParent { id: String },

    #[error("dependency {id} opens a bundle group but carries no target and none is inherited")]
    MissingTarget { id: String },

    #[error("asset {asset} of type {asset_type} cannot join bundle {bundle} of type {bundle_type}")]
    TypeMismatch {
        asset: String,
        asset_type: AssetType,
        bundle: usize,
        bundle_type: AssetType,
    },

    #[error("bundle requires an entry asset or a unique key")]
    BundleWithoutIdentity,

    #[error("source bundles of shared bundle candidate disagree on {what}")]
    SharedBundleMismatch { what: &'static str },
}
