//! Post-processing of the output directory: optional `auditwheel` repair and
//! platform tag fix-up of wheel file names.

use crate::artifacts::{ArtifactSet, WheelFilename};
use crate::process::{Invocation, ProcessOutcome, ProcessRunner};
use anyhow::{bail, Context, Result};
use fs_err as fs;
use std::env;
use std::path::{Path, PathBuf};
use target_lexicon::{Architecture, OperatingSystem, Triple, HOST};
use tracing::{debug, instrument, warn};

/// The platform tag pip gives wheels built on `triple`, e.g. `linux_x86_64`.
///
/// `_PYTHON_HOST_PLATFORM` overrides the detection, the same way it does for
/// the python build tooling.
pub fn default_platform_tag(triple: &Triple) -> Result<String> {
    if let Ok(host_platform) = env::var("_PYTHON_HOST_PLATFORM") {
        return Ok(host_platform.replace(['.', '-'], "_"));
    }
    platform_tag_for(triple)
}

/// The tag for the machine this runs on
pub fn host_platform_tag() -> Result<String> {
    default_platform_tag(&HOST)
}

fn platform_tag_for(triple: &Triple) -> Result<String> {
    let arch = match triple.architecture {
        Architecture::X86_64 => "x86_64".to_string(),
        Architecture::X86_32(_) => "i686".to_string(),
        Architecture::Aarch64(_) => "aarch64".to_string(),
        Architecture::Arm(_) => "armv7l".to_string(),
        Architecture::Powerpc64le => "ppc64le".to_string(),
        Architecture::S390x => "s390x".to_string(),
        Architecture::Unknown => bail!("Unknown architecture in {}", triple),
        other => other.to_string(),
    };
    let tag = match (&triple.operating_system, arch.as_str()) {
        (OperatingSystem::Linux, _) => format!("linux_{arch}"),
        (OperatingSystem::Windows, "x86_64") => "win_amd64".to_string(),
        (OperatingSystem::Windows, "i686") => "win32".to_string(),
        (OperatingSystem::Windows, "aarch64") => "win_arm64".to_string(),
        (OperatingSystem::Unknown, _) => bail!("Unknown operating system in {}", triple),
        (os, _) => format!("{}_{arch}", os.to_string().to_ascii_lowercase()),
    };
    Ok(tag)
}

/// What normalization changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    /// Wheels replaced by their repaired version
    pub repaired: Vec<PathBuf>,
    /// `(old, new)` file names
    pub renamed: Vec<(PathBuf, PathBuf)>,
    /// Files that look like wheels but have a malformed name
    pub skipped: Vec<PathBuf>,
    /// Existing wheels replaced by a renamed one
    pub overwritten: Vec<PathBuf>,
}

/// Rewrites the wheels in an [`ArtifactSet`] so every one is indexable under
/// the expected platform tag
pub struct ArtifactNormalizer<'a> {
    runner: &'a dyn ProcessRunner,
    auditwheel: Option<PathBuf>,
    platform_tag: String,
}

impl<'a> ArtifactNormalizer<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, platform_tag: impl Into<String>) -> Self {
        Self {
            runner,
            auditwheel: None,
            platform_tag: platform_tag.into(),
        }
    }

    /// Enable the repair pass with the given `auditwheel` executable
    pub fn repair_with(mut self, auditwheel: Option<PathBuf>) -> Self {
        self.auditwheel = auditwheel;
        self
    }

    /// Run the repair pass (if enabled) and then the file name fix-up
    #[instrument(skip_all, fields(platform_tag = %self.platform_tag))]
    pub fn normalize(&self, artifacts: &ArtifactSet) -> Result<NormalizeReport> {
        let mut report = NormalizeReport::default();
        if let Some(auditwheel) = &self.auditwheel {
            for wheel in artifacts.wheels()? {
                if let Some(repaired) = self.repair(auditwheel, &wheel, artifacts)? {
                    report.repaired.push(repaired);
                }
            }
        }
        for wheel in artifacts.wheels()? {
            match self.fix_name(&wheel)? {
                FixUp::Renamed { target, overwrote } => {
                    if overwrote {
                        report.overwritten.push(target.clone());
                    }
                    report.renamed.push((wheel, target));
                }
                FixUp::Unchanged => {}
                FixUp::Malformed => report.skipped.push(wheel),
            }
        }
        if !report.renamed.is_empty() {
            eprintln!(
                "🏷️  Retagged {} wheel(s) as {}",
                report.renamed.len(),
                self.platform_tag
            );
        }
        Ok(report)
    }

    fn repair_invocation(&self, auditwheel: &Path, wheel: &Path, wheel_dir: &Path) -> Invocation {
        let mut invocation = Invocation::new(auditwheel.to_string_lossy()).arg("repair");
        if is_policy_tag(&self.platform_tag) {
            invocation = invocation.arg("--plat").arg(&self.platform_tag);
        }
        invocation.arg("--wheel-dir").arg(wheel_dir).arg(wheel)
    }

    /// Repair one wheel into a scratch directory, then swap it into the set.
    ///
    /// A failing repair keeps the original wheel.
    fn repair(
        &self,
        auditwheel: &Path,
        wheel: &Path,
        artifacts: &ArtifactSet,
    ) -> Result<Option<PathBuf>> {
        let file_name = wheel_file_name(wheel);
        match file_name.parse::<WheelFilename>() {
            Ok(parsed) if parsed.is_pure() => {
                debug!("{} is pure python, no repair needed", file_name);
                return Ok(None);
            }
            Ok(_) => {}
            Err(err) => {
                warn!("{:#}", err);
                return Ok(None);
            }
        }

        let scratch = tempfile::Builder::new()
            .prefix("wheels-repair")
            .tempdir()
            .context("Failed to create a directory for the repaired wheels")?;
        let invocation = self.repair_invocation(auditwheel, wheel, scratch.path());
        match self.runner.run(&invocation) {
            Ok(ProcessOutcome::Completed(output)) if output.success() => {}
            Ok(ProcessOutcome::Completed(output)) => {
                eprintln!(
                    "⚠️  Warning: auditwheel failed to repair {file_name} (exit code {:?}), keeping it as is",
                    output.code
                );
                return Ok(None);
            }
            Ok(ProcessOutcome::TimedOut) => {
                eprintln!("⚠️  Warning: auditwheel timed out on {file_name}, keeping it as is");
                return Ok(None);
            }
            Err(err) => {
                eprintln!(
                    "⚠️  Warning: {:#}, keeping {file_name} as is",
                    anyhow::Error::new(err)
                );
                return Ok(None);
            }
        }

        let repaired = crate::artifacts::list_wheels(scratch.path())?;
        let Some(first) = repaired.first() else {
            warn!("auditwheel produced no wheel for {}", file_name);
            return Ok(None);
        };
        for path in &repaired {
            artifacts.import(path)?;
        }
        let replacement = artifacts.dir().join(wheel_file_name(first));
        if replacement != wheel {
            fs::remove_file(wheel)?;
        }
        debug!("repaired {} into {}", file_name, replacement.display());
        Ok(Some(replacement))
    }

    fn fix_name(&self, wheel: &Path) -> Result<FixUp> {
        let file_name = wheel_file_name(wheel);
        let parsed = match file_name.parse::<WheelFilename>() {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("Skipping {}: {:#}", wheel.display(), err);
                return Ok(FixUp::Malformed);
            }
        };
        if parsed.is_pure() || parsed.has_platform(&self.platform_tag) {
            return Ok(FixUp::Unchanged);
        }
        let target = wheel.with_file_name(parsed.with_platform(&self.platform_tag).to_string());
        let overwrote = target.exists();
        if overwrote {
            warn!(
                "Renaming {} overwrites the existing {}",
                file_name,
                target.display()
            );
        }
        fs::rename(wheel, &target)?;
        debug!("renamed {} to {}", file_name, target.display());
        Ok(FixUp::Renamed { target, overwrote })
    }
}

enum FixUp {
    Unchanged,
    Renamed { target: PathBuf, overwrote: bool },
    Malformed,
}

fn wheel_file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// auditwheel only accepts its own policy names for `--plat`
fn is_policy_tag(tag: &str) -> bool {
    tag.starts_with("manylinux") || tag.starts_with("musllinux")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessOutput, RunError};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::cell::RefCell;
    use std::str::FromStr;

    #[rstest]
    #[case("x86_64-unknown-linux-gnu", "linux_x86_64")]
    #[case("aarch64-unknown-linux-musl", "linux_aarch64")]
    #[case("armv7-unknown-linux-gnueabihf", "linux_armv7l")]
    #[case("i686-unknown-linux-gnu", "linux_i686")]
    #[case("x86_64-pc-windows-msvc", "win_amd64")]
    fn test_platform_tag_for(#[case] triple: &str, #[case] expected: &str) {
        let triple = Triple::from_str(triple).unwrap();
        assert_eq!(platform_tag_for(&triple).unwrap(), expected);
    }

    /// Pretends to be auditwheel: writes a manylinux wheel into `--wheel-dir`
    struct FakeAuditwheel {
        succeed: bool,
        calls: RefCell<Vec<String>>,
    }

    impl ProcessRunner for FakeAuditwheel {
        fn run(&self, invocation: &Invocation) -> std::result::Result<ProcessOutcome, RunError> {
            self.calls.borrow_mut().push(invocation.to_string());
            if self.succeed {
                let dir_pos = invocation
                    .args
                    .iter()
                    .position(|arg| arg == "--wheel-dir")
                    .unwrap();
                let dir = Path::new(&invocation.args[dir_pos + 1]);
                let wheel = invocation.args.last().unwrap();
                let parsed: WheelFilename = Path::new(wheel)
                    .file_name()
                    .unwrap()
                    .to_str()
                    .unwrap()
                    .parse()
                    .unwrap();
                let repaired = parsed.with_platform("musllinux_1_2_x86_64");
                fs::write(dir.join(repaired.to_string()), b"repaired").unwrap();
            }
            Ok(ProcessOutcome::Completed(ProcessOutput {
                code: Some(if self.succeed { 0 } else { 1 }),
                stdout: String::new(),
                stderr: String::new(),
            }))
        }
    }

    fn names(artifacts: &ArtifactSet) -> Vec<String> {
        artifacts
            .wheels()
            .unwrap()
            .iter()
            .map(|path| wheel_file_name(path))
            .collect()
    }

    #[test]
    fn test_fix_up_renames_foreign_tags() {
        let out = tempfile::tempdir().unwrap();
        let artifacts = ArtifactSet::create(out.path()).unwrap();
        for name in [
            "aiohttp-3.9.1-cp312-cp312-linux_x86_64.whl",
            "six-1.16.0-py2.py3-none-any.whl",
            "yarl-1.9.4-cp312-cp312-musllinux_1_2_x86_64.whl",
            "frozenlist-1.4.1-cp312-cp312-manylinux_2_17_x86_64.musllinux_1_2_x86_64.whl",
            "broken.whl",
        ] {
            fs::write(out.path().join(name), name).unwrap();
        }
        let runner = FakeAuditwheel {
            succeed: true,
            calls: RefCell::default(),
        };
        let normalizer = ArtifactNormalizer::new(&runner, "musllinux_1_2_x86_64");
        let report = normalizer.normalize(&artifacts).unwrap();

        assert_eq!(report.renamed.len(), 1);
        assert_eq!(report.skipped, vec![out.path().join("broken.whl")]);
        assert!(runner.calls.borrow().is_empty());
        assert_eq!(
            names(&artifacts),
            vec![
                "aiohttp-3.9.1-cp312-cp312-musllinux_1_2_x86_64.whl",
                "broken.whl",
                "frozenlist-1.4.1-cp312-cp312-manylinux_2_17_x86_64.musllinux_1_2_x86_64.whl",
                "six-1.16.0-py2.py3-none-any.whl",
                "yarl-1.9.4-cp312-cp312-musllinux_1_2_x86_64.whl",
            ]
        );
    }

    #[test]
    fn test_fix_up_reports_overwritten_wheels() {
        let out = tempfile::tempdir().unwrap();
        let artifacts = ArtifactSet::create(out.path()).unwrap();
        let fresh = "aiohttp-3.9.1-cp312-cp312-linux_x86_64.whl";
        let stale = "aiohttp-3.9.1-cp312-cp312-musllinux_1_2_x86_64.whl";
        fs::write(out.path().join(fresh), "fresh").unwrap();
        fs::write(out.path().join(stale), "stale").unwrap();
        let runner = FakeAuditwheel {
            succeed: true,
            calls: RefCell::default(),
        };

        let report = ArtifactNormalizer::new(&runner, "musllinux_1_2_x86_64")
            .normalize(&artifacts)
            .unwrap();

        assert_eq!(report.overwritten, vec![out.path().join(stale)]);
        assert_eq!(names(&artifacts), vec![stale]);
        assert_eq!(fs::read_to_string(out.path().join(stale)).unwrap(), "fresh");
    }

    #[test]
    fn test_repair_replaces_the_wheel() {
        let out = tempfile::tempdir().unwrap();
        let artifacts = ArtifactSet::create(out.path()).unwrap();
        fs::write(out.path().join("lxml-5.1.0-cp312-cp312-linux_x86_64.whl"), b"raw").unwrap();
        fs::write(out.path().join("six-1.16.0-py2.py3-none-any.whl"), b"pure").unwrap();

        let runner = FakeAuditwheel {
            succeed: true,
            calls: RefCell::default(),
        };
        let normalizer = ArtifactNormalizer::new(&runner, "musllinux_1_2_x86_64")
            .repair_with(Some(PathBuf::from("auditwheel")));
        let report = normalizer.normalize(&artifacts).unwrap();

        assert_eq!(runner.calls.borrow().len(), 1);
        assert!(runner.calls.borrow()[0].starts_with("auditwheel repair --plat musllinux_1_2_x86_64 --wheel-dir "));
        assert_eq!(report.repaired.len(), 1);
        assert!(report.renamed.is_empty());
        assert_eq!(
            names(&artifacts),
            vec![
                "lxml-5.1.0-cp312-cp312-musllinux_1_2_x86_64.whl",
                "six-1.16.0-py2.py3-none-any.whl",
            ]
        );
    }

    #[test]
    fn test_failed_repair_keeps_the_wheel_and_still_fixes_the_name() {
        let out = tempfile::tempdir().unwrap();
        let artifacts = ArtifactSet::create(out.path()).unwrap();
        fs::write(out.path().join("lxml-5.1.0-cp312-cp312-linux_x86_64.whl"), b"raw").unwrap();

        let runner = FakeAuditwheel {
            succeed: false,
            calls: RefCell::default(),
        };
        let normalizer = ArtifactNormalizer::new(&runner, "musllinux_1_2_x86_64")
            .repair_with(Some(PathBuf::from("auditwheel")));
        let report = normalizer.normalize(&artifacts).unwrap();

        assert!(report.repaired.is_empty());
        assert_eq!(
            names(&artifacts),
            vec!["lxml-5.1.0-cp312-cp312-musllinux_1_2_x86_64.whl"]
        );
    }
}
