//! The set of wheels a run produces.
//!
//! Every stage that writes or rewrites wheels (build, cache recovery, prebuilt copy,
//! normalization) gets an explicit [`ArtifactSet`] handle instead of reaching for a
//! well-known directory.

use crate::util::same_content;
use anyhow::{bail, Context, Result};
use fs_err as fs;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// A directory collecting the wheels of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    dir: PathBuf,
}

impl ArtifactSet {
    /// Open `dir` as the output directory, creating it if needed
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .context("Failed to create the output directory for the wheels")?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All wheel files directly inside the directory, sorted by file name
    pub fn wheels(&self) -> Result<Vec<PathBuf>> {
        list_wheels(&self.dir)
    }

    /// Copy `source` into the set under its own file name.
    ///
    /// Returns `false` when an identical file was already present.
    pub fn import(&self, source: &Path) -> Result<bool> {
        let file_name = source
            .file_name()
            .with_context(|| format!("{} has no file name", source.display()))?;
        let destination = self.dir.join(file_name);
        if same_content(source, &destination)? {
            debug!("{} is already present", destination.display());
            return Ok(false);
        }
        fs::copy(source, &destination)?;
        Ok(true)
    }
}

/// Non-recursive listing of `*.whl` files in `dir`, sorted
pub fn list_wheels(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut wheels = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "whl") {
            wheels.push(path);
        }
    }
    wheels.sort();
    Ok(wheels)
}

/// The parts of a wheel file name,
/// `{distribution}-{version}(-{build})?-{python}-{abi}-{platform}.whl`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelFilename {
    pub distribution: String,
    pub version: String,
    pub build: Option<String>,
    pub python_tag: String,
    pub abi_tag: String,
    /// May be a compressed tag set such as `manylinux_2_17_x86_64.manylinux2014_x86_64`
    pub platform_tag: String,
}

impl WheelFilename {
    /// Is this a pure python wheel
    pub fn is_pure(&self) -> bool {
        self.platform_tag == "any"
    }

    /// Whether `tag` is one of the (possibly compressed) platform tags
    pub fn has_platform(&self, tag: &str) -> bool {
        self.platform_tag.split('.').any(|part| part == tag)
    }

    pub fn with_platform(&self, tag: &str) -> Self {
        Self {
            platform_tag: tag.to_string(),
            ..self.clone()
        }
    }
}

impl FromStr for WheelFilename {
    type Err = anyhow::Error;

    fn from_str(filename: &str) -> Result<Self> {
        let Some(stem) = filename.strip_suffix(".whl") else {
            bail!("`{}` is not a wheel file name", filename);
        };
        let parts = stem.split('-').collect::<Vec<_>>();
        let (distribution, version, build, rest) = match parts.as_slice() {
            [distribution, version, python, abi, platform] => {
                (*distribution, *version, None, [*python, *abi, *platform])
            }
            [distribution, version, build, python, abi, platform] => (
                *distribution,
                *version,
                Some(build.to_string()),
                [*python, *abi, *platform],
            ),
            _ => bail!(
                "`{}` is not a valid wheel file name, expected 5 or 6 dash separated parts",
                filename
            ),
        };
        if parts.iter().any(|part| part.is_empty()) {
            bail!("`{}` has an empty component", filename);
        }
        Ok(Self {
            distribution: distribution.to_string(),
            version: version.to_string(),
            build,
            python_tag: rest[0].to_string(),
            abi_tag: rest[1].to_string(),
            platform_tag: rest[2].to_string(),
        })
    }
}

impl fmt::Display for WheelFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.distribution, self.version)?;
        if let Some(build) = &self.build {
            write!(f, "-{build}")?;
        }
        write!(
            f,
            "-{}-{}-{}.whl",
            self.python_tag, self.abi_tag, self.platform_tag
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_wheel_filename() {
        let name: WheelFilename = "numpy-1.26.4-cp311-cp311-musllinux_1_1_x86_64.whl"
            .parse()
            .unwrap();
        assert_eq!(
            name,
            WheelFilename {
                distribution: "numpy".to_string(),
                version: "1.26.4".to_string(),
                build: None,
                python_tag: "cp311".to_string(),
                abi_tag: "cp311".to_string(),
                platform_tag: "musllinux_1_1_x86_64".to_string(),
            }
        );
        assert_eq!(
            name.with_platform("linux_x86_64").to_string(),
            "numpy-1.26.4-cp311-cp311-linux_x86_64.whl"
        );
    }

    #[test]
    fn test_parse_wheel_filename_with_build_tag() {
        let name: WheelFilename = "pkg-2.0-1-py3-none-any.whl".parse().unwrap();
        assert_eq!(name.build.as_deref(), Some("1"));
        assert!(name.is_pure());
        assert_eq!(name.to_string(), "pkg-2.0-1-py3-none-any.whl");
    }

    #[test]
    fn test_compressed_platform_tags() {
        let name: WheelFilename =
            "cffi-1.16.0-cp312-cp312-manylinux_2_17_aarch64.manylinux2014_aarch64.whl"
                .parse()
                .unwrap();
        assert!(name.has_platform("manylinux2014_aarch64"));
        assert!(!name.has_platform("linux_aarch64"));
    }

    #[test]
    fn test_invalid_wheel_filenames() {
        for invalid in ["pkg-1.0.tar.gz", "pkg-1.0-py3.whl", "a-b-c-d-e-f-g.whl", "-1.0-py3-none-any.whl"] {
            assert!(invalid.parse::<WheelFilename>().is_err(), "{invalid}");
        }
    }

    #[test]
    fn test_import_is_idempotent() {
        let source_dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let artifacts = ArtifactSet::create(out.path().join("wheelhouse")).unwrap();
        let wheel = source_dir.path().join("pkg-1.0-py3-none-any.whl");
        fs::write(&wheel, b"content").unwrap();

        assert!(artifacts.import(&wheel).unwrap());
        assert!(!artifacts.import(&wheel).unwrap());
        assert_eq!(
            artifacts.wheels().unwrap(),
            vec![artifacts.dir().join("pkg-1.0-py3-none-any.whl")]
        );
    }
}
