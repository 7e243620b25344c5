use crate::artifacts::ArtifactSet;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// pip's local wheel cache, scavenged when a build times out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelCache {
    dir: PathBuf,
}

impl WheelCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// pip's default location: `$PIP_CACHE_DIR/wheels`, otherwise
    /// `<user cache dir>/pip/wheels`
    pub fn locate() -> Self {
        if let Some(dir) = env::var_os("PIP_CACHE_DIR") {
            return Self::new(PathBuf::from(dir).join("wheels"));
        }
        let cache_root = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("/root/.cache"));
        Self::new(cache_root.join("pip").join("wheels"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy every wheel found anywhere in the cache into `artifacts`.
    ///
    /// This is best effort: a missing cache or a file that can't be copied is
    /// logged, never an error. Returns the number of wheels now in `artifacts`
    /// that came from the cache.
    pub fn recover_into(&self, artifacts: &ArtifactSet) -> usize {
        if !self.dir.is_dir() {
            debug!("No wheel cache at {}", self.dir.display());
            return 0;
        }
        let pattern = format!(
            "{}/**/*.whl",
            glob::Pattern::escape(&self.dir.to_string_lossy())
        );
        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(err) => {
                warn!("Invalid wheel cache pattern {}: {}", pattern, err);
                return 0;
            }
        };
        let mut recovered = 0;
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(err) => {
                    warn!("Failed to read the wheel cache: {}", err);
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            match artifacts.import(&path) {
                Ok(copied) => {
                    debug!(copied, "recovered {}", path.display());
                    recovered += 1;
                }
                Err(err) => warn!("Failed to recover {}: {:#}", path.display(), err),
            }
        }
        recovered
    }
}
