//! The git-backed PEP 503 simple index the wheels are published into.
//!
//! Each normalized package name maps to `<target_dir>/<name>/index.html`, a list of
//! links pointing at the tagged source of every published release.

mod inventory;
mod metadata;
mod name;
mod page;
mod publish;

pub use inventory::{is_available, HttpInventory, Inventory, LocalInventory};
pub use metadata::{check_version_gate, MetadataSource, PackageMetadata, PYTHON_CLASSIFIER};
pub use name::{normalize, NormalizedName};
pub use page::{IndexEntry, IndexPage};
pub use publish::{IndexPublisher, PublishResult, PublishTarget};

use std::path::PathBuf;

/// Everything that stops a release from being published
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The git tag doesn't match the version the package declares
    #[error("tag <> package version mismatch: {tag} vs {version}")]
    GateMismatch { tag: String, version: String },
    #[error("Failed to read the package metadata: {0}")]
    Metadata(String),
    /// A git operation failed, nothing has been pushed
    #[error("`{command}` failed: {reason}")]
    Transport { command: String, reason: String },
    /// The existing index page could not be understood
    #[error("Failed to parse the index page of {package}: {reason}")]
    Parse { package: String, reason: String },
    #[error("Failed to access {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
