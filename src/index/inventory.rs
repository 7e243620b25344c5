//! Read-only lookups of what the target index already serves.

use super::{IndexEntry, IndexPage, NormalizedName};
use crate::requirements::PackageSpec;
use anyhow::{Context, Result};
use fs_err as fs;
use pep440_rs::Version;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Where the published releases of a package can be looked up
pub trait Inventory {
    /// The entries published for `name`, empty if the package is unknown
    fn lookup(&self, name: &NormalizedName) -> Result<Vec<IndexEntry>>;
}

/// Whether the index already has a release satisfying `spec`.
///
/// Without version specifiers any published release counts.
pub fn is_available(inventory: &dyn Inventory, spec: &PackageSpec) -> Result<bool> {
    let Some(name) = spec.name() else {
        return Ok(false);
    };
    let entries = inventory.lookup(&name)?;
    let available = match spec.version_specifiers() {
        None => !entries.is_empty(),
        Some(specifiers) => entries
            .iter()
            .filter_map(|entry| entry.version.parse::<Version>().ok())
            .any(|version| specifiers.contains(&version)),
    };
    debug!(package = %name, available, "index lookup");
    Ok(available)
}

/// The index as served over http, e.g. from GitHub Pages
#[derive(Debug, Clone)]
pub struct HttpInventory {
    base: Url,
    agent: ureq::Agent,
}

impl HttpInventory {
    pub fn new(base: Url) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Self { base, agent }
    }

    fn page_url(&self, name: &NormalizedName) -> Result<Url> {
        let mut base = self.base.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        base.join(&format!("{name}/"))
            .with_context(|| format!("Invalid index url for {name}"))
    }
}

impl Inventory for HttpInventory {
    fn lookup(&self, name: &NormalizedName) -> Result<Vec<IndexEntry>> {
        let url = self.page_url(name)?;
        let body = match self.agent.get(url.as_str()).call() {
            Ok(response) => response
                .into_string()
                .with_context(|| format!("Failed to read {url}"))?,
            Err(ureq::Error::Status(404, _)) => return Ok(Vec::new()),
            Err(err) => return Err(err).with_context(|| format!("Failed to fetch {url}")),
        };
        let page = IndexPage::parse(name.clone(), &body)?;
        Ok(page.entries().to_vec())
    }
}

/// An index laid out on disk, e.g. a checkout of the index repository
#[derive(Debug, Clone)]
pub struct LocalInventory {
    root: PathBuf,
}

impl LocalInventory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Inventory for LocalInventory {
    fn lookup(&self, name: &NormalizedName) -> Result<Vec<IndexEntry>> {
        let path = self.root.join(name.as_str()).join("index.html");
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let html = fs::read_to_string(&path)?;
        let page = IndexPage::parse(name.clone(), &html)?;
        Ok(page.entries().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_index() -> (tempfile::TempDir, LocalInventory) {
        let dir = tempfile::tempdir().unwrap();
        let mut page = IndexPage::new(NormalizedName::new("aiohttp"));
        for version in ["3.8.6", "3.9.1"] {
            page.append(IndexEntry::from_git_tag(
                "aiohttp",
                version,
                "https://github.com/aio-libs/aiohttp",
                &format!("v{version}"),
                "3.8",
            ));
        }
        fs::create_dir_all(dir.path().join("aiohttp")).unwrap();
        fs::write(dir.path().join("aiohttp/index.html"), page.render("aiohttp")).unwrap();
        let inventory = LocalInventory::new(dir.path());
        (dir, inventory)
    }

    #[test]
    fn test_local_inventory_lookup() {
        let (_dir, inventory) = local_index();
        assert_eq!(inventory.lookup(&NormalizedName::new("AioHTTP")).unwrap().len(), 2);
        assert!(inventory.lookup(&NormalizedName::new("yarl")).unwrap().is_empty());
    }

    #[test]
    fn test_is_available_respects_specifiers() {
        let (_dir, inventory) = local_index();
        for (line, expected) in [
            ("aiohttp==3.9.1", true),
            ("aiohttp>=3.9,<4", true),
            ("aiohttp==3.9.2", false),
            ("aiohttp", true),
            ("yarl==1.9.4", false),
            ("yarl", false),
        ] {
            assert_eq!(
                is_available(&inventory, &PackageSpec::new(line)).unwrap(),
                expected,
                "{line}"
            );
        }
    }

    #[test]
    fn test_page_url() {
        let inventory =
            HttpInventory::new(Url::parse("https://acme.github.io/wheels").unwrap());
        assert_eq!(
            inventory
                .page_url(&NormalizedName::new("Py_YAML"))
                .unwrap()
                .as_str(),
            "https://acme.github.io/wheels/py-yaml/"
        );
    }
}
