use crate::process::Invocation;
use crate::requirements::PackageSpec;
use crate::skip_binary::SkipBinarySet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// What a single `pip wheel` invocation builds
#[derive(Debug, Clone, Copy)]
pub enum WheelTarget<'a> {
    /// One requirement line
    Package(&'a PackageSpec),
    /// Every line of a requirement file
    Requirement(&'a Path),
    /// The project in a source directory
    Local(&'a Path),
}

/// Options shared by every `pip wheel` invocation of a run
#[derive(Debug, Clone)]
pub struct WheelOptions<'a> {
    pub wheel_dir: &'a Path,
    pub index_url: &'a Url,
    /// `None` for local builds, which always build the project itself
    pub skip_binary: Option<&'a SkipBinarySet>,
    pub constraint: Option<&'a Path>,
    pub timeout: Duration,
    /// Exported as `MAKEFLAGS=-j<jobs>`
    pub jobs: usize,
}

/// How pip is invoked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipBackend {
    python: PathBuf,
    /// Explicit pip executable, otherwise `python -m pip`
    pip: Option<PathBuf>,
}

impl PipBackend {
    pub fn new(python: PathBuf, pip: Option<PathBuf>) -> Self {
        Self { python, pip }
    }

    pub fn make_invocation(&self) -> Invocation {
        match &self.pip {
            Some(pip) => Invocation::new(pip.to_string_lossy()).arg("--disable-pip-version-check"),
            None => Invocation::new(self.python.to_string_lossy())
                .args(["-m", "pip", "--disable-pip-version-check"]),
        }
    }

    /// Install the python packages needed by the builds themselves
    pub fn install_helpers(&self, helpers: &[String], index_url: &Url) -> Invocation {
        self.make_invocation()
            .args(["install", "--upgrade", "--progress-bar", "off"])
            .arg("--extra-index-url")
            .arg(index_url.as_str())
            .args(helpers)
    }

    pub fn wheel(&self, target: WheelTarget<'_>, options: &WheelOptions<'_>) -> Invocation {
        let mut invocation = self
            .make_invocation()
            .args(["wheel", "--progress-bar", "off", "--no-clean"]);
        if let Some(skip_binary) = options.skip_binary {
            invocation = invocation.arg("--no-binary").arg(skip_binary.to_string());
        }
        invocation = invocation
            .arg("--wheel-dir")
            .arg(options.wheel_dir)
            .arg("--extra-index-url")
            .arg(options.index_url.as_str());
        if let Some(constraint) = options.constraint {
            invocation = invocation.arg("--constraint").arg(constraint);
        }
        invocation = match target {
            WheelTarget::Package(spec) => invocation.arg(spec.raw()),
            WheelTarget::Requirement(path) => invocation.arg("--requirement").arg(path),
            WheelTarget::Local(dir) => invocation.arg(".").current_dir(dir),
        };
        invocation
            .env("MAKEFLAGS", format!("-j{}", options.jobs))
            .timeout(options.timeout)
    }
}
