use crate::build::{BuildStrategy, PipBackend, WheelCache};
use crate::git::Signature;
use crate::index::{MetadataSource, PublishTarget};
use crate::normalize::host_platform_tag;
use crate::requirements;
use crate::skip_binary::SkipBinarySet;
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// The config file picked up from the working directory when `--config` isn't given
pub const DEFAULT_CONFIG_FILE: &str = "wheels-builder.toml";
/// Timeout of every build invocation, in minutes
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 345;
/// Longer timeouts are rejected, a year of minutes
pub const MAX_TIMEOUT_MINUTES: u64 = 60 * 24 * 365;
pub const DEFAULT_HELPERS: &str = "Cython";
pub const DEFAULT_OUT_DIR: &str = "/tmp/wheelhouse";
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_TARGET_DIR: &str = "docs";
/// Name of the requirement file written for batch builds, inside the temp directory
const BATCH_REQUIREMENT: &str = "wheels_requirement.txt";

/// Invalid or missing input, detected before anything is built
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("The {kind} file {} does not exist", path.display())]
    MissingFile { kind: &'static str, path: PathBuf },
    #[error("The {kind} directory {} does not exist", path.display())]
    MissingDirectory { kind: &'static str, path: PathBuf },
    #[error("Failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse the config file {}", path.display())]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("`{0}` is required")]
    MissingOption(&'static str),
    #[error("Only one build strategy can be selected, got {0}")]
    ConflictingStrategies(String),
    #[error("The repository url should start with \"https://\", got `{0}`")]
    InvalidRepoUrl(String),
    #[error("The index name should look like `owner/repository`, got `{0}`")]
    InvalidIndexName(String),
    #[error("Invalid index url `{url}`")]
    InvalidIndexUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("The timeout must be at least one minute")]
    ZeroTimeout,
    #[error("A timeout of {0} minutes is too large")]
    TimeoutTooLarge(u64),
    #[error("Failed to determine the platform tag, pass --platform-tag: {0}")]
    PlatformTag(String),
}

/// What to build and how
#[derive(Debug, Default, Serialize, Deserialize, clap::Parser, Clone, Eq, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct BuildOptions {
    /// Python packages needed by the builds themselves, comma or space separated
    /// [default: Cython]
    #[arg(long = "pip", value_name = "PACKAGES")]
    pub helpers: Option<String>,

    /// Packages that must not use a prebuilt wheel from another index,
    /// comma separated. `:none:` for none, `:all:` for every package
    #[arg(long, value_name = "PACKAGES")]
    pub skip_binary: Option<String>,

    /// Requirement file listing the packages to build
    #[arg(long, value_name = "FILE")]
    pub requirement: Option<PathBuf>,

    /// Requirement file of the previous build; lines in both files are not rebuilt
    #[arg(long, value_name = "FILE")]
    pub requirement_diff: Option<PathBuf>,

    /// Constraint file passed to pip as is
    #[arg(long, value_name = "FILE")]
    pub constraint: Option<PathBuf>,

    /// Copy the already built wheels of this directory instead of building
    #[arg(long, value_name = "DIRECTORY", conflicts_with_all = ["local", "single"])]
    pub prebuild_dir: Option<PathBuf>,

    /// Build every package of the requirement file on its own
    #[arg(long)]
    pub single: bool,

    /// Build the project in the source directory
    #[arg(long, conflicts_with = "single")]
    pub local: bool,

    /// The project directory for `--local` and the metadata query [default: .]
    #[arg(long, value_name = "DIRECTORY")]
    pub source_dir: Option<PathBuf>,

    /// Bundle external shared libraries into the wheels with auditwheel
    #[arg(long)]
    pub auditwheel: bool,

    /// Platform tag every binary wheel must carry [default: the host's tag]
    #[arg(long, value_name = "TAG")]
    pub platform_tag: Option<String>,

    /// Max runtime of one pip invocation, in minutes [default: 345]
    #[arg(long, value_name = "MINUTES", env = "WHEELS_TIMEOUT")]
    pub timeout: Option<u64>,

    /// The directory to store the built wheels in [default: /tmp/wheelhouse]
    #[arg(short, long, value_name = "DIRECTORY")]
    pub out: Option<PathBuf>,

    /// pip's wheel cache, salvaged after a timeout [default: pip's cache]
    #[arg(long, value_name = "DIRECTORY")]
    pub cache_dir: Option<PathBuf>,

    /// The python interpreter running pip and the metadata query [default: python3]
    #[arg(long, value_name = "PATH")]
    pub python: Option<PathBuf>,

    /// Run this pip executable instead of `python -m pip`
    #[arg(long, value_name = "PATH")]
    pub pip_executable: Option<PathBuf>,

    /// Parallel jobs of native builds, defaults to # of CPUs
    #[arg(short = 'j', long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Build the wheels without publishing them
    #[arg(long)]
    pub test: bool,
}

/// Where to publish
#[derive(Debug, Default, Serialize, Deserialize, clap::Parser, Clone, Eq, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct PublishOptions {
    /// The repository url where the python package officially lives, starting with `https://`
    #[arg(long, value_name = "URL")]
    pub repo_url: Option<String>,

    /// Token with push access to the index repository
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    #[serde(skip_serializing)]
    pub github_token: Option<String>,

    /// Index repository on GitHub, e.g. `owner/python-package-server`
    #[arg(long, value_name = "OWNER/REPO", env = "WHEELS_INDEX_NAME")]
    pub index_name: Option<String>,

    /// Url of the served index [default: the GitHub Pages url of the index repository]
    #[arg(long, value_name = "URL")]
    pub index_url: Option<String>,

    /// Git signature for the index repository, `Full Name <email@example.com>`
    #[arg(long)]
    pub signature: Option<String>,

    /// The tag to publish, must match the version of the package
    #[arg(long, value_name = "TAG")]
    pub repo_tag: Option<String>,

    /// Branch of the index repository to publish to [default: main]
    #[arg(long, value_name = "BRANCH")]
    pub target_branch: Option<String>,

    /// Directory of the index repository that is the index root [default: docs]
    #[arg(long, value_name = "DIRECTORY")]
    pub target_dir: Option<PathBuf>,

    /// Read the package metadata from this wheel instead of querying setup.py
    #[arg(long, value_name = "WHEEL")]
    pub metadata_wheel: Option<PathBuf>,

    /// Render the updated index page but don't push it
    #[arg(long)]
    pub do_not_push: bool,
}

/// Build wheels for a set of python packages and publish them into a
/// git-backed package index
#[derive(Debug, clap::Parser)]
#[command(name = "wheels-builder", version)]
pub struct Cli {
    /// TOML file with defaults for every option [default: wheels-builder.toml, if present]
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Use verbose output
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(flatten)]
    pub build: BuildOptions,

    #[command(flatten)]
    pub publish: PublishOptions,
}

impl Cli {
    /// The config file to use: the explicit one must exist, the default one may not
    pub fn load_file_config(&self) -> Result<FileConfig, ConfigError> {
        match &self.config {
            Some(path) => FileConfig::load(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.is_file() {
                    FileConfig::load(path)
                } else {
                    Ok(FileConfig::default())
                }
            }
        }
    }

    /// Merge with the config file and resolve everything the run needs
    pub fn into_pipeline_config(self) -> Result<PipelineConfig, ConfigError> {
        let file = self.load_file_config()?;
        PipelineConfig::resolve(
            self.build.merge(file.build),
            self.publish.merge(file.publish),
        )
    }
}

/// The `wheels-builder.toml` layout, e.g.
///
/// ```toml
/// [build]
/// requirement = "requirements.txt"
/// single = true
///
/// [publish]
/// index-name = "acme/wheels"
/// ```
#[derive(Debug, Default, Serialize, Deserialize, Clone, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub build: BuildOptions,
    pub publish: PublishOptions,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::MissingFile {
                kind: "config",
                path: path.to_path_buf(),
            });
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl BuildOptions {
    /// Fill every option not given on the command line from `file`
    pub fn merge(self, file: BuildOptions) -> BuildOptions {
        BuildOptions {
            helpers: self.helpers.or(file.helpers),
            skip_binary: self.skip_binary.or(file.skip_binary),
            requirement: self.requirement.or(file.requirement),
            requirement_diff: self.requirement_diff.or(file.requirement_diff),
            constraint: self.constraint.or(file.constraint),
            prebuild_dir: self.prebuild_dir.or(file.prebuild_dir),
            single: self.single || file.single,
            local: self.local || file.local,
            source_dir: self.source_dir.or(file.source_dir),
            auditwheel: self.auditwheel || file.auditwheel,
            platform_tag: self.platform_tag.or(file.platform_tag),
            timeout: self.timeout.or(file.timeout),
            out: self.out.or(file.out),
            cache_dir: self.cache_dir.or(file.cache_dir),
            python: self.python.or(file.python),
            pip_executable: self.pip_executable.or(file.pip_executable),
            jobs: self.jobs.or(file.jobs),
            test: self.test || file.test,
        }
    }

    /// The helper packages to install, `--pip` split on commas and whitespace
    pub fn helper_packages(&self) -> Vec<String> {
        self.helpers
            .as_deref()
            .unwrap_or(DEFAULT_HELPERS)
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|helper| !helper.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn resolve_strategy(&self) -> Result<BuildStrategy, ConfigError> {
        let mut selected = Vec::new();
        if self.local {
            selected.push("--local");
        }
        if self.prebuild_dir.is_some() {
            selected.push("--prebuild-dir");
        }
        if self.single {
            selected.push("--single");
        }
        if selected.len() > 1 {
            return Err(ConfigError::ConflictingStrategies(selected.join(", ")));
        }

        if self.local {
            let source_dir = self.source_dir();
            if !source_dir.is_dir() {
                return Err(ConfigError::MissingDirectory {
                    kind: "source",
                    path: source_dir,
                });
            }
            return Ok(BuildStrategy::LocalFolder { source_dir });
        }
        if let Some(prebuilt_dir) = &self.prebuild_dir {
            if !prebuilt_dir.is_dir() {
                return Err(ConfigError::MissingDirectory {
                    kind: "prebuilt wheels",
                    path: prebuilt_dir.clone(),
                });
            }
            return Ok(BuildStrategy::PrebuiltCopy {
                prebuilt_dir: prebuilt_dir.clone(),
            });
        }

        let requirement = self
            .requirement
            .as_deref()
            .ok_or(ConfigError::MissingOption("--requirement"))?;
        let packages = requirements::resolve(requirement, self.requirement_diff.as_deref())?;
        if self.single {
            Ok(BuildStrategy::SingleInstall { packages })
        } else {
            Ok(BuildStrategy::BatchRequirement {
                packages,
                requirement_file: env::temp_dir().join(BATCH_REQUIREMENT),
            })
        }
    }

    fn source_dir(&self) -> PathBuf {
        self.source_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

impl PublishOptions {
    /// Fill every option not given on the command line from `file`
    pub fn merge(self, file: PublishOptions) -> PublishOptions {
        PublishOptions {
            repo_url: self.repo_url.or(file.repo_url),
            github_token: self.github_token.or(file.github_token),
            index_name: self.index_name.or(file.index_name),
            index_url: self.index_url.or(file.index_url),
            signature: self.signature.or(file.signature),
            repo_tag: self.repo_tag.or(file.repo_tag),
            target_branch: self.target_branch.or(file.target_branch),
            target_dir: self.target_dir.or(file.target_dir),
            metadata_wheel: self.metadata_wheel.or(file.metadata_wheel),
            do_not_push: self.do_not_push || file.do_not_push,
        }
    }

    /// `--index-url`, otherwise the GitHub Pages url of `--index-name`
    fn resolve_index_url(&self) -> Result<Url, ConfigError> {
        let raw = match (&self.index_url, &self.index_name) {
            (Some(url), _) => url.clone(),
            (None, Some(index_name)) => {
                let (owner, repo) = split_index_name(index_name)?;
                format!("https://{}.github.io/{}/", owner.to_ascii_lowercase(), repo)
            }
            (None, None) => return Err(ConfigError::MissingOption("--index-name")),
        };
        Url::parse(&raw).map_err(|source| ConfigError::InvalidIndexUrl { url: raw, source })
    }

    fn resolve_target(&self) -> Result<PublishTarget, ConfigError> {
        let repo_url = self
            .repo_url
            .clone()
            .ok_or(ConfigError::MissingOption("--repo-url"))?;
        match Url::parse(&repo_url) {
            Ok(url) if url.scheme() == "https" => {}
            _ => return Err(ConfigError::InvalidRepoUrl(repo_url)),
        }
        let token = self
            .github_token
            .clone()
            .ok_or(ConfigError::MissingOption("--github-token"))?;
        let index_name = self
            .index_name
            .as_deref()
            .ok_or(ConfigError::MissingOption("--index-name"))?;
        let (owner, repo) = split_index_name(index_name)?;
        let signature = self
            .signature
            .as_deref()
            .ok_or(ConfigError::MissingOption("--signature"))?
            .parse::<Signature>()
            .map_err(ConfigError::InvalidSignature)?;
        let repo_tag = self
            .repo_tag
            .clone()
            .ok_or(ConfigError::MissingOption("--repo-tag"))?;

        Ok(PublishTarget {
            index_name: format!("{owner}/{repo}"),
            token,
            branch: self
                .target_branch
                .clone()
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            target_dir: self
                .target_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TARGET_DIR)),
            signature,
            repo_url,
            repo_tag,
            dry_run: self.do_not_push,
        })
    }
}

/// `owner/repo`, tolerating a trailing `/` or `/.`
fn split_index_name(index_name: &str) -> Result<(&str, &str), ConfigError> {
    let trimmed = index_name.trim().trim_end_matches(['/', '.']);
    match trimmed.split('/').collect::<Vec<_>>().as_slice() {
        [owner, repo] if !owner.is_empty() && !repo.is_empty() => Ok((*owner, *repo)),
        _ => Err(ConfigError::InvalidIndexName(index_name.to_string())),
    }
}

/// How the published release is described and where it goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishConfig {
    pub target: PublishTarget,
    pub metadata: MetadataSource,
}

/// Everything a run needs, fully validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub strategy: BuildStrategy,
    pub constraint: Option<PathBuf>,
    /// The user supplied part of the skip-binary set
    pub skip_binary: SkipBinarySet,
    pub helpers: Vec<String>,
    pub timeout: Duration,
    pub out_dir: PathBuf,
    pub cache: WheelCache,
    pub pip: PipBackend,
    pub jobs: usize,
    pub platform_tag: String,
    /// `Some` when auditwheel repair is enabled
    pub auditwheel: Option<PathBuf>,
    /// The served index, queried for available wheels and used as extra index
    pub index_url: Url,
    /// `None` in test mode
    pub publish: Option<PublishConfig>,
}

impl PipelineConfig {
    /// Validate the merged options, reading the requirement files
    #[instrument(skip_all)]
    pub fn resolve(
        build: BuildOptions,
        publish: PublishOptions,
    ) -> Result<PipelineConfig, ConfigError> {
        let strategy = build.resolve_strategy()?;
        if let Some(constraint) = &build.constraint {
            if !constraint.is_file() {
                return Err(ConfigError::MissingFile {
                    kind: "constraint",
                    path: constraint.clone(),
                });
            }
        }
        let timeout_minutes = build.timeout.unwrap_or(DEFAULT_TIMEOUT_MINUTES);
        if timeout_minutes == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        let timeout = timeout_minutes
            .checked_mul(60)
            .filter(|_| timeout_minutes <= MAX_TIMEOUT_MINUTES)
            .map(Duration::from_secs)
            .ok_or(ConfigError::TimeoutTooLarge(timeout_minutes))?;
        let platform_tag = match &build.platform_tag {
            Some(tag) => tag.clone(),
            None => {
                host_platform_tag().map_err(|err| ConfigError::PlatformTag(format!("{err:#}")))?
            }
        };
        let python = build
            .python
            .clone()
            .unwrap_or_else(|| PathBuf::from("python3"));
        let index_url = publish.resolve_index_url()?;

        let publish_config = if build.test {
            debug!("test mode, nothing will be published");
            None
        } else {
            let metadata = match &publish.metadata_wheel {
                Some(wheel) => MetadataSource::Wheel(wheel.clone()),
                None => MetadataSource::SetupPy {
                    python: python.clone(),
                    package_dir: build.source_dir(),
                },
            };
            Some(PublishConfig {
                target: publish.resolve_target()?,
                metadata,
            })
        };

        let skip_binary = build
            .skip_binary
            .as_deref()
            .unwrap_or(crate::skip_binary::NONE)
            .parse::<SkipBinarySet>()
            .unwrap_or_default();

        Ok(PipelineConfig {
            strategy,
            constraint: build.constraint.clone(),
            skip_binary,
            helpers: build.helper_packages(),
            timeout,
            out_dir: build
                .out
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR)),
            cache: build
                .cache_dir
                .clone()
                .map(WheelCache::new)
                .unwrap_or_else(WheelCache::locate),
            pip: PipBackend::new(python, build.pip_executable.clone()),
            jobs: build.jobs.unwrap_or_else(|| {
                std::thread::available_parallelism().map_or(1, |n| n.get())
            }),
            platform_tag,
            auditwheel: build.auditwheel.then(|| PathBuf::from("auditwheel")),
            index_url,
            publish: publish_config,
        })
    }
}
