//! Materializing wheels into the output directory.
//!
//! A run uses exactly one [`BuildStrategy`]. Build failures and timeouts never
//! abort the run: they are recorded per attempt and folded into a
//! [`BuildStatus`], which becomes the process exit code once every stage ran.

mod cache;
mod pip;

pub use cache::WheelCache;
pub use pip::{PipBackend, WheelOptions, WheelTarget};

use crate::artifacts::{list_wheels, ArtifactSet};
use crate::process::{Invocation, ProcessOutcome, ProcessRunner};
use crate::requirements::PackageSet;
use crate::skip_binary::SkipBinarySet;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

/// Exit code of a run in which a build failed
pub const EXIT_BUILD_FAILURE: i32 = 109;
/// Exit code of a run in which a build timed out and the wheel cache was salvaged
pub const EXIT_BUILD_TIMEOUT: i32 = 80;

/// Classification of a build attempt, ordered from best to worst.
///
/// A hard build failure outranks a timeout: when both happen in one run the
/// run reports [`BuildStatus::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum BuildStatus {
    #[default]
    Success,
    TimedOut,
    Failed,
}

impl BuildStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            BuildStatus::Success => 0,
            BuildStatus::TimedOut => EXIT_BUILD_TIMEOUT,
            BuildStatus::Failed => EXIT_BUILD_FAILURE,
        }
    }

    /// The worse of both
    pub fn worst(self, other: BuildStatus) -> BuildStatus {
        self.max(other)
    }
}

/// One invocation of the build tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildAttempt {
    /// The requirement line, requirement file or directory that was built
    pub target: String,
    pub status: BuildStatus,
    /// Wheels salvaged from the cache after a timeout
    pub recovered: usize,
}

/// Everything the build stage did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutcome {
    pub attempts: Vec<BuildAttempt>,
    /// The wheels in the output directory after the build stage
    pub wheels: Vec<PathBuf>,
}

impl BuildOutcome {
    pub fn status(&self) -> BuildStatus {
        self.attempts
            .iter()
            .map(|attempt| attempt.status)
            .fold(BuildStatus::Success, BuildStatus::worst)
    }

    pub fn recovered(&self) -> usize {
        self.attempts.iter().map(|attempt| attempt.recovered).sum()
    }
}

/// How the wheels of a run are produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStrategy {
    /// Build the project checked out in `source_dir`
    LocalFolder { source_dir: PathBuf },
    /// Copy already built wheels, no build at all
    PrebuiltCopy { prebuilt_dir: PathBuf },
    /// One build per package, each with its own timeout; failures are isolated
    SingleInstall { packages: PackageSet },
    /// One build for the whole set through a generated requirement file
    BatchRequirement {
        packages: PackageSet,
        requirement_file: PathBuf,
    },
}

impl BuildStrategy {
    /// The packages the strategy builds, if it builds from a requirement set
    pub fn packages(&self) -> Option<&PackageSet> {
        match self {
            BuildStrategy::SingleInstall { packages }
            | BuildStrategy::BatchRequirement { packages, .. } => Some(packages),
            BuildStrategy::LocalFolder { .. } | BuildStrategy::PrebuiltCopy { .. } => None,
        }
    }
}

/// Runs a [`BuildStrategy`] with pip
pub struct WheelBuilder<'a> {
    runner: &'a dyn ProcessRunner,
    pip: PipBackend,
    index_url: Url,
    constraint: Option<PathBuf>,
    timeout: Duration,
    cache: WheelCache,
    jobs: usize,
}

impl<'a> WheelBuilder<'a> {
    pub fn new(
        runner: &'a dyn ProcessRunner,
        pip: PipBackend,
        index_url: Url,
        timeout: Duration,
        cache: WheelCache,
    ) -> Self {
        let jobs = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            runner,
            pip,
            index_url,
            constraint: None,
            timeout,
            cache,
            jobs,
        }
    }

    /// Passed verbatim to every requirement-driven build
    pub fn constraint(mut self, constraint: Option<PathBuf>) -> Self {
        self.constraint = constraint;
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Install the helper packages the builds need, a failure here is fatal
    pub fn install_helpers(&self, helpers: &[String]) -> Result<()> {
        if helpers.is_empty() {
            return Ok(());
        }
        let invocation = self.pip.install_helpers(helpers, &self.index_url);
        match self
            .runner
            .run(&invocation)
            .context("Failed to install the build helpers")?
        {
            ProcessOutcome::Completed(output) if output.success() => Ok(()),
            ProcessOutcome::Completed(output) => anyhow::bail!(
                "Failed to install the build helpers {}: exit code {:?}",
                helpers.join(", "),
                output.code
            ),
            ProcessOutcome::TimedOut => {
                anyhow::bail!("Installing the build helpers timed out")
            }
        }
    }

    /// Run `strategy`, collecting wheels into `artifacts`.
    ///
    /// Only infrastructure problems (unreadable prebuilt directory, unwritable
    /// requirement file) are errors; build failures are part of the outcome.
    #[instrument(skip_all)]
    pub fn build(
        &self,
        strategy: &BuildStrategy,
        skip_binary: &SkipBinarySet,
        artifacts: &ArtifactSet,
    ) -> Result<BuildOutcome> {
        let mut attempts = Vec::new();
        match strategy {
            BuildStrategy::LocalFolder { source_dir } => {
                let options = self.options(artifacts, None);
                let invocation = self.pip.wheel(WheelTarget::Local(source_dir), &options);
                attempts.push(self.attempt(&source_dir.display().to_string(), &invocation, artifacts));
            }
            BuildStrategy::PrebuiltCopy { prebuilt_dir } => {
                attempts.push(copy_prebuilt(prebuilt_dir, artifacts)?);
            }
            BuildStrategy::SingleInstall { packages } => {
                let options = self.options(artifacts, Some(skip_binary));
                for spec in packages {
                    eprintln!("📦 Process package: {spec}");
                    let invocation = self.pip.wheel(WheelTarget::Package(spec), &options);
                    attempts.push(self.attempt(spec.raw(), &invocation, artifacts));
                }
            }
            BuildStrategy::BatchRequirement {
                packages,
                requirement_file,
            } => {
                if packages.is_empty() {
                    eprintln!("📦 Nothing to build, every requirement is in the diff baseline");
                } else {
                    packages.write_requirement(requirement_file).with_context(|| {
                        format!("Failed to write {}", requirement_file.display())
                    })?;
                    let options = self.options(artifacts, Some(skip_binary));
                    let invocation = self
                        .pip
                        .wheel(WheelTarget::Requirement(requirement_file), &options);
                    attempts.push(self.attempt(
                        &requirement_file.display().to_string(),
                        &invocation,
                        artifacts,
                    ));
                }
            }
        }
        Ok(BuildOutcome {
            attempts,
            wheels: artifacts.wheels()?,
        })
    }

    fn options<'b>(
        &'b self,
        artifacts: &'b ArtifactSet,
        skip_binary: Option<&'b SkipBinarySet>,
    ) -> WheelOptions<'b> {
        WheelOptions {
            wheel_dir: artifacts.dir(),
            index_url: &self.index_url,
            skip_binary,
            constraint: self.constraint.as_deref(),
            timeout: self.timeout,
            jobs: self.jobs,
        }
    }

    fn attempt(&self, target: &str, invocation: &Invocation, artifacts: &ArtifactSet) -> BuildAttempt {
        let (status, recovered) = match self.runner.run(invocation) {
            Ok(ProcessOutcome::Completed(output)) if output.success() => {
                debug!("built {}", target);
                (BuildStatus::Success, 0)
            }
            Ok(ProcessOutcome::Completed(output)) => {
                eprintln!("💥 Failed to build {target} (exit code {:?})", output.code);
                (BuildStatus::Failed, 0)
            }
            Ok(ProcessOutcome::TimedOut) => {
                eprintln!(
                    "⏰ Building {target} timed out after {} minutes, recovering wheels from {}",
                    self.timeout.as_secs() / 60,
                    self.cache.dir().display()
                );
                let recovered = self.cache.recover_into(artifacts);
                eprintln!("♻️  Recovered {recovered} wheel(s) from the cache");
                (BuildStatus::TimedOut, recovered)
            }
            Err(err) => {
                warn!("{:#}", anyhow::Error::new(err));
                eprintln!("💥 Failed to build {target}");
                (BuildStatus::Failed, 0)
            }
        };
        BuildAttempt {
            target: target.to_string(),
            status,
            recovered,
        }
    }
}

fn copy_prebuilt(prebuilt_dir: &Path, artifacts: &ArtifactSet) -> Result<BuildAttempt> {
    let wheels = list_wheels(prebuilt_dir)
        .with_context(|| format!("Failed to list the wheels in {}", prebuilt_dir.display()))?;
    for wheel in &wheels {
        artifacts.import(wheel)?;
    }
    eprintln!(
        "📦 Copied {} prebuilt wheel(s) from {}",
        wheels.len(),
        prebuilt_dir.display()
    );
    Ok(BuildAttempt {
        target: prebuilt_dir.display().to_string(),
        status: BuildStatus::Success,
        recovered: 0,
    })
}
