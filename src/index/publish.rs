use super::metadata::check_version_gate;
use super::{IndexEntry, IndexPage, NormalizedName, PackageMetadata, PublishError};
use crate::artifacts::ArtifactSet;
use crate::git::{Signature, WorkingCopy};
use crate::process::ProcessRunner;
use fs_err as fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Where and as whom a release is published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    /// The index repository on GitHub, `owner/name`
    pub index_name: String,
    /// Token with push access to the index repository
    pub token: String,
    pub branch: String,
    /// Directory inside the index repository that is the index root
    pub target_dir: PathBuf,
    pub signature: Signature,
    /// Where the package officially lives, used in the link
    pub repo_url: String,
    /// The tag being published
    pub repo_tag: String,
    /// Render the page but don't write, commit or push it
    pub dry_run: bool,
}

impl PublishTarget {
    /// The authenticated clone url of the index repository
    pub fn remote_url(&self) -> String {
        format!("https://{}@github.com/{}.git", self.token, self.index_name)
    }

    fn page_path(&self, name: &NormalizedName) -> PathBuf {
        self.target_dir.join(name.as_str()).join("index.html")
    }
}

/// What publishing did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishResult {
    /// A new link was committed and pushed
    Published {
        package: NormalizedName,
        version: String,
        page: PathBuf,
    },
    /// The release was already listed, nothing was pushed
    AlreadyPublished {
        package: NormalizedName,
        version: String,
    },
    /// The page that would have been pushed
    DryRun {
        package: NormalizedName,
        version: String,
        content: String,
    },
}

/// Adds releases to the git-backed simple index
pub struct IndexPublisher<'a> {
    runner: &'a dyn ProcessRunner,
}

impl<'a> IndexPublisher<'a> {
    pub fn new(runner: &'a dyn ProcessRunner) -> Self {
        Self { runner }
    }

    /// Publish the release described by `metadata`.
    ///
    /// The tag/version gate and the metadata checks run before the index
    /// repository is touched. The page is always fully regenerated from its parsed
    /// entries, and a release that is already listed is not added twice.
    #[instrument(skip_all, fields(package = %metadata.name, version = %metadata.version))]
    pub fn publish(
        &self,
        artifacts: &ArtifactSet,
        metadata: &PackageMetadata,
        target: &PublishTarget,
    ) -> Result<PublishResult, PublishError> {
        let min_python = metadata.min_python_version()?;
        check_version_gate(&target.repo_tag, &metadata.version)?;

        let package = NormalizedName::new(&metadata.name);
        let version = metadata.version.clone();
        if let Ok(wheels) = artifacts.wheels() {
            debug!("{} wheel(s) in {}", wheels.len(), artifacts.dir().display());
        }

        let checkout_dir = tempfile::Builder::new()
            .prefix("wheels-index")
            .tempdir()
            .map_err(|source| PublishError::Io {
                path: std::env::temp_dir(),
                source,
            })?;
        let checkout = WorkingCopy::clone_branch(
            self.runner,
            &target.remote_url(),
            &target.branch,
            checkout_dir.path(),
            vec![target.token.clone()],
        )?;

        let page_path = checkout.path().join(target.page_path(&package));
        let mut page = read_page(&package, &page_path)?;
        let added = page.append(IndexEntry::from_git_tag(
            &metadata.name,
            &metadata.version,
            &target.repo_url,
            &target.repo_tag,
            &min_python.to_string(),
        ));
        let content = page.render(&metadata.name);

        if target.dry_run {
            return Ok(PublishResult::DryRun {
                package,
                version,
                content,
            });
        }
        if !added {
            eprintln!("⚠️  {package} {version} is already in the index, nothing to publish");
            return Ok(PublishResult::AlreadyPublished { package, version });
        }

        if let Some(parent) = page_path.parent() {
            fs::create_dir_all(parent).map_err(|source| PublishError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&page_path, &content).map_err(|source| PublishError::Io {
            path: page_path.clone(),
            source,
        })?;

        checkout.configure_identity(&target.signature)?;
        checkout.add_all()?;
        checkout.commit(&format!("Update index for {package}-{version}"))?;
        checkout.push(&target.branch)?;
        info!("published {}-{} to {}", package, version, target.index_name);
        eprintln!("🚀 Published {package} {version} to {}", target.index_name);

        Ok(PublishResult::Published {
            package: package.clone(),
            version,
            page: target.page_path(&package),
        })
    }
}

fn read_page(package: &NormalizedName, path: &Path) -> Result<IndexPage, PublishError> {
    if !path.is_file() {
        return Ok(IndexPage::new(package.clone()));
    }
    let html = fs::read_to_string(path).map_err(|source| PublishError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    IndexPage::parse(package.clone(), &html)
}
