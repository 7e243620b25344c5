//! Builds python wheels for a set of packages and publishes them into a static,
//! git-backed [PEP 503](https://peps.python.org/pep-0503/) simple index.
//!
//! A run goes through these stages:
//!
//!  * [`requirements::resolve`]: the requirement lines that need a fresh build
//!  * [`skip_binary::apply_policy`]: which of them pip must build from source
//!  * [`WheelBuilder`]: one of the [`BuildStrategy`] variants, salvaging pip's
//!    wheel cache when a build times out
//!  * [`ArtifactNormalizer`]: optional `auditwheel` repair and platform tag fix-up
//!  * [`IndexPublisher`]: adds the release to the index page and pushes it
//!
//! All external tools (pip, auditwheel, git, python) run through a
//! [`ProcessRunner`], so every stage can be exercised without them.

pub use crate::artifacts::{ArtifactSet, WheelFilename};
pub use crate::build::{
    BuildAttempt, BuildOutcome, BuildStatus, BuildStrategy, PipBackend, WheelBuilder, WheelCache,
    EXIT_BUILD_FAILURE, EXIT_BUILD_TIMEOUT,
};
pub use crate::build_options::{
    BuildOptions, Cli, ConfigError, FileConfig, PipelineConfig, PublishConfig, PublishOptions,
};
pub use crate::git::Signature;
pub use crate::index::{
    HttpInventory, IndexEntry, IndexPage, IndexPublisher, Inventory, LocalInventory,
    MetadataSource, NormalizedName, PackageMetadata, PublishError, PublishResult, PublishTarget,
};
pub use crate::normalize::{ArtifactNormalizer, NormalizeReport};
pub use crate::pipeline::{Pipeline, PipelineReport};
pub use crate::process::{
    Invocation, ProcessOutcome, ProcessOutput, ProcessRunner, RunError, SystemRunner,
};
pub use crate::requirements::{PackageSet, PackageSpec};
pub use crate::skip_binary::SkipBinarySet;

mod artifacts;
pub mod build;
mod build_options;
pub mod git;
pub mod index;
pub mod normalize;
mod pipeline;
pub mod process;
pub mod requirements;
pub mod skip_binary;
mod util;
