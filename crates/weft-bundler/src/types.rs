//! Data-model types shared across the bundling passes.
//!
//! Assets and dependencies are input: the resolver/transformer stage
//! produces them and the core never mutates them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// File type of an asset (`"js"`, `"css"`, `"html"`, ...). Open set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetType(String);

impl AssetType {
    #[must_use]
    pub fn new(ty: impl Into<String>) -> Self {
        Self(ty.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AssetType {
    fn from(ty: &str) -> Self {
        Self(ty.to_string())
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Execution context code runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvContext {
    Browser,
    WebWorker,
    ServiceWorker,
    Node,
    ElectronMain,
    ElectronRenderer,
}

impl EnvContext {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::WebWorker => "web-worker",
            Self::ServiceWorker => "service-worker",
            Self::Node => "node",
            Self::ElectronMain => "electron-main",
            Self::ElectronRenderer => "electron-renderer",
        }
    }
}

impl fmt::Display for EnvContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Module format emitted for a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    EsModule,
    CommonJs,
    Global,
}

/// Environment descriptor attached to assets, dependencies and bundles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Environment {
    pub context: EnvContext,
    pub output_format: OutputFormat,
    pub is_library: bool,
}

impl Environment {
    /// Default browser environment.
    #[must_use]
    pub fn browser() -> Self {
        Self {
            context: EnvContext::Browser,
            output_format: OutputFormat::Global,
            is_library: false,
        }
    }

    /// Whether code in this environment may not share a loading context
    /// with its parent (workers run in their own global scope).
    #[must_use]
    pub fn is_isolated(&self) -> bool {
        matches!(self.context, EnvContext::WebWorker | EnvContext::ServiceWorker)
    }
}

/// Output descriptor: where and for which environment bundles are emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub dist_dir: String,
    pub public_url: String,
    pub env: Environment,
}

impl Target {
    #[must_use]
    pub fn new(name: impl Into<String>, dist_dir: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dist_dir: dist_dir.into(),
            public_url: "/".to_string(),
            env: Environment::browser(),
        }
    }
}

/// An opaque unit of code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Stable identifier.
    pub id: String,
    /// Path the asset was loaded from.
    pub file_path: String,
    pub asset_type: AssetType,
    /// Size in bytes, nonzero.
    pub size: u64,
    /// Embedded at its use site rather than emitted standalone.
    pub is_inline: bool,
    /// May not share a parent loading context.
    pub is_isolated: bool,
    pub env: Environment,
}

impl Asset {
    #[must_use]
    pub fn new(id: impl Into<String>, asset_type: impl Into<AssetType>, size: u64) -> Self {
        let id = id.into();
        Self {
            file_path: id.clone(),
            id,
            asset_type: asset_type.into(),
            size,
            is_inline: false,
            is_isolated: false,
            env: Environment::browser(),
        }
    }

    /// Mark the asset as inlined at its use site.
    #[must_use]
    pub fn inline(mut self) -> Self {
        self.is_inline = true;
        self
    }

    /// Mark the asset as isolated from its parent context.
    #[must_use]
    pub fn isolated(mut self) -> Self {
        self.is_isolated = true;
        self
    }

    #[must_use]
    pub fn with_env(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }
}

/// A directed edge from a source asset (or the virtual root) to the assets
/// it resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Stable identifier.
    pub id: String,
    /// User-declared entry point.
    pub is_entry: bool,
    /// Dynamic import; always a code-split point.
    pub is_async: bool,
    /// May resolve to nothing without failing the build.
    pub is_optional: bool,
    /// Resolution may be deferred to a later stage.
    pub is_weak: bool,
    /// Output descriptor. Required on entries; inherited otherwise.
    pub target: Option<Target>,
    pub env: Environment,
}

impl Dependency {
    /// A synchronous, required dependency.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_entry: false,
            is_async: false,
            is_optional: false,
            is_weak: false,
            target: None,
            env: Environment::browser(),
        }
    }

    /// A user-declared entry point.
    #[must_use]
    pub fn entry(id: impl Into<String>, target: Target) -> Self {
        let mut dep = Self::new(id);
        dep.is_entry = true;
        dep.target = Some(target);
        dep
    }

    /// A dynamic import.
    #[must_use]
    pub fn dynamic(id: impl Into<String>) -> Self {
        let mut dep = Self::new(id);
        dep.is_async = true;
        dep
    }

    /// Mark the dependency as optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }
}
