use super::PublishError;
use crate::process::{Invocation, ProcessOutcome, ProcessRunner};
use pep440_rs::Version;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, instrument};

/// Prefix of the trove classifiers declaring supported python versions
pub const PYTHON_CLASSIFIER: &str = "Programming Language :: Python :: ";

/// Where the name, version and classifiers of the published package come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataSource {
    /// Ask the package itself with `python setup.py --name --version --classifiers`
    SetupPy { python: PathBuf, package_dir: PathBuf },
    /// Read the METADATA of an already built wheel
    Wheel(PathBuf),
}

/// The declared metadata of the package being published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
    pub classifiers: Vec<String>,
}

impl PackageMetadata {
    #[instrument(skip_all)]
    pub fn load(source: &MetadataSource, runner: &dyn ProcessRunner) -> Result<Self, PublishError> {
        match source {
            MetadataSource::SetupPy {
                python,
                package_dir,
            } => Self::from_setup_py(runner, python, package_dir),
            MetadataSource::Wheel(path) => Self::from_wheel(path),
        }
    }

    fn from_setup_py(
        runner: &dyn ProcessRunner,
        python: &Path,
        package_dir: &Path,
    ) -> Result<Self, PublishError> {
        let invocation = Invocation::new(python.to_string_lossy())
            .arg(package_dir.join("setup.py"))
            .args(["--name", "--version", "--classifiers"])
            .current_dir(package_dir)
            .capture_output();
        let output = match runner.run(&invocation) {
            Ok(ProcessOutcome::Completed(output)) if output.success() => output,
            Ok(ProcessOutcome::Completed(output)) => {
                return Err(PublishError::Metadata(format!(
                    "`{}` exited with {:?}: {}",
                    invocation,
                    output.code,
                    output.stderr.trim()
                )))
            }
            Ok(ProcessOutcome::TimedOut) => {
                return Err(PublishError::Metadata(format!("`{invocation}` timed out")))
            }
            Err(err) => {
                return Err(PublishError::Metadata(format!(
                    "{:#}",
                    anyhow::Error::new(err)
                )))
            }
        };
        Self::from_query_output(&output.stdout)
    }

    /// Parse the output of `setup.py --name --version --classifiers`: the name and
    /// version on the first two lines, one classifier per following line
    pub fn from_query_output(stdout: &str) -> Result<Self, PublishError> {
        let mut lines = stdout.lines().map(str::trim);
        let (Some(name), Some(version)) = (lines.next(), lines.next()) else {
            return Err(PublishError::Metadata(format!(
                "expected the name and version of the package, got {stdout:?}"
            )));
        };
        if name.is_empty() || version.is_empty() {
            return Err(PublishError::Metadata(format!(
                "expected the name and version of the package, got {stdout:?}"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
            classifiers: lines
                .filter(|line| !line.is_empty())
                .map(ToString::to_string)
                .collect(),
        })
    }

    fn from_wheel(path: &Path) -> Result<Self, PublishError> {
        let distribution = python_pkginfo::Distribution::new(path).map_err(|err| {
            PublishError::Metadata(format!("Failed to read {}: {}", path.display(), err))
        })?;
        let metadata = distribution.metadata();
        Ok(Self {
            name: metadata.name.clone(),
            version: metadata.version.clone(),
            classifiers: metadata.classifiers.clone(),
        })
    }

    /// The lowest python version among the `Programming Language :: Python :: X`
    /// classifiers. Classifiers that aren't versions (`3 :: Only`,
    /// `Implementation :: CPython`) are ignored.
    pub fn min_python_version(&self) -> Result<Version, PublishError> {
        let min = self
            .classifiers
            .iter()
            .filter_map(|classifier| classifier.strip_prefix(PYTHON_CLASSIFIER))
            .filter_map(|value| Version::from_str(value.trim()).ok())
            .min();
        debug!(package = %self.name, min_python = ?min.as_ref().map(ToString::to_string));
        min.ok_or_else(|| {
            PublishError::Metadata(format!(
                "the package must declare a \"{}\" classifier",
                PYTHON_CLASSIFIER.trim_end().trim_end_matches("::").trim_end()
            ))
        })
    }
}

/// The tag being published, stripped of leading `v`s, must be exactly the
/// declared version
pub fn check_version_gate(tag: &str, version: &str) -> Result<(), PublishError> {
    let stripped = tag.trim_start_matches('v');
    if stripped == version {
        Ok(())
    } else {
        Err(PublishError::GateMismatch {
            tag: stripped.to_string(),
            version: version.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("v2.1.0", "2.1.0", true)]
    #[case("2.1.0", "2.1.0", true)]
    #[case("v2.1.1", "2.1.0", false)]
    #[case("version-2.1.0", "2.1.0", false)]
    #[case("v2.1.0", "2.1", false)]
    fn test_version_gate(#[case] tag: &str, #[case] version: &str, #[case] passes: bool) {
        let result = check_version_gate(tag, version);
        assert_eq!(result.is_ok(), passes);
        if !passes {
            assert!(matches!(result, Err(PublishError::GateMismatch { .. })));
        }
    }

    #[test]
    fn test_gate_mismatch_message() {
        let err = check_version_gate("v2.1.1", "2.1.0").unwrap_err();
        assert_snapshot!(err.to_string(), @"tag <> package version mismatch: 2.1.1 vs 2.1.0");
    }

    #[test]
    fn test_from_query_output() {
        let metadata = PackageMetadata::from_query_output(indoc! {"
            widget
            3.2.1
            Development Status :: 5 - Production/Stable
            Programming Language :: Python :: 3
            Programming Language :: Python :: 3 :: Only
            Programming Language :: Python :: 3.10
            Programming Language :: Python :: 3.9
            Programming Language :: Python :: Implementation :: CPython
        "})
        .unwrap();
        assert_eq!(metadata.name, "widget");
        assert_eq!(metadata.version, "3.2.1");
        assert_eq!(metadata.classifiers.len(), 6);
        // 3 < 3.9 < 3.10 in PEP 440 ordering
        assert_eq!(metadata.min_python_version().unwrap().to_string(), "3");
    }

    #[test]
    fn test_min_python_version_orders_numerically() {
        let metadata = PackageMetadata {
            name: "widget".to_string(),
            version: "1.0".to_string(),
            classifiers: vec![
                "Programming Language :: Python :: 3.10".to_string(),
                "Programming Language :: Python :: 3.9".to_string(),
                "Programming Language :: Python :: 3.11".to_string(),
            ],
        };
        assert_eq!(metadata.min_python_version().unwrap().to_string(), "3.9");
    }

    #[test]
    fn test_missing_python_classifier() {
        let metadata = PackageMetadata::from_query_output("widget\n1.0\nLicense :: OSI Approved\n").unwrap();
        let err = metadata.min_python_version().unwrap_err();
        assert_snapshot!(err.to_string(), @r#"Failed to read the package metadata: the package must declare a "Programming Language :: Python" classifier"#);
    }

    #[test]
    fn test_query_output_too_short() {
        assert!(matches!(
            PackageMetadata::from_query_output("widget\n"),
            Err(PublishError::Metadata(_))
        ));
    }
}
