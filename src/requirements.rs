//! Selective builds: which requirement lines need a fresh wheel.

use crate::build_options::ConfigError;
use crate::index::NormalizedName;
use fs_err as fs;
use once_cell::sync::Lazy;
use pep440_rs::VersionSpecifiers;
use pep508_rs::{Requirement, VerbatimUrl, VersionOrUrl};
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

static LEADING_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)").unwrap());

/// One line of a requirement listing, e.g. `aiohttp==3.9.1; python_version >= "3.11"`.
///
/// The raw line is its identity: diffing against a baseline is an exact string match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageSpec {
    raw: String,
}

impl PackageSpec {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    fn requirement(&self) -> Option<Requirement<VerbatimUrl>> {
        Requirement::<VerbatimUrl>::from_str(&self.raw).ok()
    }

    /// The normalized distribution name, if the line names one
    pub fn name(&self) -> Option<NormalizedName> {
        match self.requirement() {
            Some(requirement) => Some(NormalizedName::new(&requirement.name.to_string())),
            None => LEADING_NAME
                .captures(&self.raw)
                .map(|caps| NormalizedName::new(&caps[1])),
        }
    }

    /// The version specifiers of the requirement; `None` for bare names, urls or
    /// lines pep508 can't parse
    pub fn version_specifiers(&self) -> Option<VersionSpecifiers> {
        match self.requirement()?.version_or_url? {
            VersionOrUrl::VersionSpecifier(specifiers) => Some(specifiers),
            VersionOrUrl::Url(_) => None,
        }
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// The requirement lines selected for this run, in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSet {
    specs: Vec<PackageSpec>,
}

impl PackageSet {
    pub fn iter(&self) -> impl Iterator<Item = &PackageSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Write the set as a requirement file, one line per package
    pub fn write_requirement(&self, path: &Path) -> std::io::Result<()> {
        let mut content = String::new();
        for spec in &self.specs {
            content.push_str(spec.raw());
            content.push('\n');
        }
        fs::write(path, content)
    }
}

impl FromIterator<PackageSpec> for PackageSet {
    fn from_iter<T: IntoIterator<Item = PackageSpec>>(iter: T) -> Self {
        Self {
            specs: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a PackageSet {
    type Item = &'a PackageSpec;
    type IntoIter = std::slice::Iter<'a, PackageSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.specs.iter()
    }
}

/// Computes the packages to build from a requirement file and an optional
/// diff baseline.
///
/// A missing requirement file is a configuration error; a missing baseline
/// means every requirement is built.
pub fn resolve(requirement: &Path, baseline: Option<&Path>) -> Result<PackageSet, ConfigError> {
    let lines = read_requirement_lines(requirement)?;
    let baseline = match baseline {
        Some(path) if path.is_file() => read_requirement_lines(path)?,
        Some(path) => {
            warn!(
                "Diff baseline {} does not exist, building every requirement",
                path.display()
            );
            Vec::new()
        }
        None => Vec::new(),
    };
    let packages = resolve_lines(lines, &baseline);
    debug!("{} package(s) selected from {}", packages.len(), requirement.display());
    Ok(packages)
}

/// Every line of `lines` that does not appear verbatim in `baseline`, in order
pub fn resolve_lines(lines: Vec<String>, baseline: &[String]) -> PackageSet {
    let baseline = baseline.iter().map(String::as_str).collect::<HashSet<_>>();
    lines
        .into_iter()
        .filter(|line| !baseline.contains(line.as_str()))
        .map(PackageSpec::new)
        .collect()
}

/// Read the requirement lines of a file, following `-r`/`--requirement` includes.
///
/// Blank lines and comments are dropped and surrounding whitespace is trimmed.
pub fn read_requirement_lines(path: &Path) -> Result<Vec<String>, ConfigError> {
    let mut lines = Vec::new();
    let mut seen = HashSet::new();
    read_into(path, &mut lines, &mut seen)?;
    Ok(lines)
}

fn read_into(
    path: &Path,
    lines: &mut Vec<String>,
    seen: &mut HashSet<PathBuf>,
) -> Result<(), ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::MissingFile {
            kind: "requirement",
            path: path.to_path_buf(),
        });
    }
    let canonical = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());
    if !seen.insert(canonical) {
        warn!("Skipping recursive include of {}", path.display());
        return Ok(());
    }
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(include) = include_target(line) {
            let parent = path.parent().unwrap_or_else(|| Path::new("."));
            read_into(&parent.join(include), lines, seen)?;
            continue;
        }
        lines.push(line.to_string());
    }
    Ok(())
}

fn include_target(line: &str) -> Option<&str> {
    let rest = line
        .strip_prefix("--requirement")
        .or_else(|| line.strip_prefix("-r"))?;
    let rest = rest.strip_prefix('=').unwrap_or(rest).trim();
    (!rest.is_empty()).then_some(rest)
}
