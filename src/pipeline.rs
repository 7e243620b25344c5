//! Runs the stages of a build in order: resolve, skip-binary policy, build
//! (with cache recovery), normalize and publish.

use crate::artifacts::ArtifactSet;
use crate::build::{BuildAttempt, BuildOutcome, BuildStatus, WheelBuilder};
use crate::build_options::PipelineConfig;
use crate::index::{IndexPublisher, Inventory, PackageMetadata, PublishResult};
use crate::normalize::{ArtifactNormalizer, NormalizeReport};
use crate::process::ProcessRunner;
use crate::skip_binary::{apply_policy, SkipBinarySet};
use anyhow::{Context, Result};
use tracing::{debug, instrument};

/// Everything a run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub skip_binary: SkipBinarySet,
    pub build: BuildOutcome,
    pub normalize: NormalizeReport,
    /// `None` in test mode
    pub publish: Option<PublishResult>,
}

impl PipelineReport {
    /// 0, or the sentinel of the worst build attempt
    pub fn exit_code(&self) -> i32 {
        self.build.status().exit_code()
    }
}

pub struct Pipeline<'a> {
    config: PipelineConfig,
    runner: &'a dyn ProcessRunner,
    inventory: &'a dyn Inventory,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: PipelineConfig,
        runner: &'a dyn ProcessRunner,
        inventory: &'a dyn Inventory,
    ) -> Self {
        Self {
            config,
            runner,
            inventory,
        }
    }

    /// Run every stage.
    ///
    /// Failed or timed out builds don't stop the run, they only decide the exit
    /// code; normalization always runs on whatever was produced. Setup problems
    /// and publish errors are returned as errors.
    #[instrument(skip_all)]
    pub fn run(&self) -> Result<PipelineReport> {
        let config = &self.config;
        let artifacts = ArtifactSet::create(&config.out_dir)?;

        let builder = WheelBuilder::new(
            self.runner,
            config.pip.clone(),
            config.index_url.clone(),
            config.timeout,
            config.cache.clone(),
        )
        .constraint(config.constraint.clone())
        .jobs(config.jobs);
        builder.install_helpers(&config.helpers)?;

        let skip_binary = match config.strategy.packages() {
            Some(packages) => apply_policy(config.skip_binary.clone(), packages, self.inventory),
            None => config.skip_binary.clone(),
        };
        debug!("skip binary: {}", skip_binary);

        let build = builder
            .build(&config.strategy, &skip_binary, &artifacts)
            .unwrap_or_else(|err| {
                eprintln!("💥 Build stage failed: {err:#}");
                BuildOutcome {
                    attempts: vec![BuildAttempt {
                        target: config.out_dir.display().to_string(),
                        status: BuildStatus::Failed,
                        recovered: 0,
                    }],
                    wheels: artifacts.wheels().unwrap_or_default(),
                }
            });

        let normalize = ArtifactNormalizer::new(self.runner, config.platform_tag.clone())
            .repair_with(config.auditwheel.clone())
            .normalize(&artifacts)
            .context("Failed to normalize the built wheels")?;

        let publish = match &config.publish {
            Some(publish) => {
                let metadata = PackageMetadata::load(&publish.metadata, self.runner)?;
                let result = IndexPublisher::new(self.runner).publish(
                    &artifacts,
                    &metadata,
                    &publish.target,
                )?;
                Some(result)
            }
            None => None,
        };

        Ok(PipelineReport {
            skip_binary,
            build,
            normalize,
            publish,
        })
    }
}
