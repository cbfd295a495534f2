#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_lines)]

//! Bundling core for weft.
//!
//! Consumes a resolved asset graph and produces a bundle graph: assets
//! grouped into typed bundles, bundles grouped into bundle-groups (the
//! unit a page or dynamic import loads in parallel), with shared code
//! factored out under resource constraints.
//!
//! ## Architecture
//!
//! 1. **Initial bundling** - create bundle-groups at code split points and
//!    typed bundles within them
//! 2. **Reparent** - load existing bundles instead of duplicated copies
//! 3. **Dedupe** - drop assets already provided by ancestor bundles
//! 4. **Shared bundles** - factor widely duplicated assets out
//! 5. **Internalize** - elide async loads already satisfied in place
//!
//! ```
//! use weft_bundler::{Asset, AssetGraph, Bundler, Dependency, Target};
//!
//! let mut assets = AssetGraph::new();
//! let entry = assets.add_entry_dependency(Dependency::entry("entry", Target::new("web", "dist")));
//! let main = assets.add_asset(Asset::new("main.js", "js", 1_000));
//! assets.resolve(entry, main);
//!
//! let bundles = Bundler::default().bundle(&assets)?;
//! assert_eq!(bundles.bundles().count(), 1);
//! # Ok::<(), weft_bundler::Error>(())
//! ```

pub mod asset_graph;
pub mod bundle_graph;
pub mod bundler;
pub mod config;
pub mod error;
pub mod manifest;
pub mod optimize;
pub mod types;

pub use asset_graph::{AssetGraph, AssetGraphNode};
pub use bundle_graph::{
    Bundle, BundleGraph, BundleGroup, BundleGroupId, BundleId, CreateBundle, ExternalResolution,
};
pub use config::BundlerOptions;
pub use error::Error;
pub use manifest::{AssetReferenceInfo, BundleGroupInfo, BundleInfo, BundleManifest};
pub use types::{Asset, AssetType, Dependency, EnvContext, Environment, OutputFormat, Target};
pub use weft_graph::NodeId;

/// The bundler: runs initial bundling and the optimizer passes over a
/// fresh bundle graph.
#[derive(Debug, Default)]
pub struct Bundler {
    options: BundlerOptions,
}

impl Bundler {
    #[must_use]
    pub fn new(options: BundlerOptions) -> Self {
        Self { options }
    }

    /// Bundle an asset graph.
    pub fn bundle<'a>(&self, assets: &'a AssetGraph) -> Result<BundleGraph<'a>, Error> {
        let mut graph = BundleGraph::new(assets);
        bundler::create_initial_bundles(&mut graph)?;
        optimize::run(&mut graph, &self.options)?;
        Ok(graph)
    }
}
