use super::name::{normalize, NormalizedName};
use super::PublishError;
use crate::util::{escape_html, unescape_html};
use once_cell::sync::Lazy;
use regex::Regex;

static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<a\s([^>]*)>(.*?)</a\s*>").unwrap());
static LINK_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<a\s").unwrap());
static ATTRIBUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*"([^"]*)""#).unwrap());

/// One published version of a package in the simple index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// The raw package name as declared by the package
    pub name: String,
    pub version: String,
    /// Where installers fetch the package from, usually a `git+` url
    pub href: String,
    /// Unescaped python requirement such as `>=3.9`
    pub requires_python: Option<String>,
}

impl IndexEntry {
    /// Build the entry for a release published from a git tag
    pub fn from_git_tag(
        name: &str,
        version: &str,
        repo_url: &str,
        repo_tag: &str,
        min_python: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            href: format!("git+{repo_url}@{repo_tag}#egg={name}-{version}"),
            requires_python: Some(format!(">={min_python}")),
        }
    }

    pub fn normalized_name(&self) -> NormalizedName {
        NormalizedName::new(&self.name)
    }

    pub fn label(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// Same package and version, regardless of how the name is spelled
    pub fn same_release(&self, other: &IndexEntry) -> bool {
        self.normalized_name() == other.normalized_name() && self.version == other.version
    }

    fn render(&self) -> String {
        let requires_python = self
            .requires_python
            .as_deref()
            .map(|requires| format!(" data-requires-python=\"{}\"", escape_html(requires)))
            .unwrap_or_default();
        format!(
            "<a href=\"{}\"{}>{}</a><br/>",
            escape_html(&self.href),
            requires_python,
            escape_html(&self.label())
        )
    }
}

/// The `index.html` of one package: an ordered list of links
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPage {
    name: NormalizedName,
    entries: Vec<IndexEntry>,
}

impl IndexPage {
    pub fn new(name: NormalizedName) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &NormalizedName {
        &self.name
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Parse an existing page of the package `name`.
    ///
    /// Anything that isn't a well formed link with an `href` and a
    /// `<name>-<version>` label is an error, so that a page we don't understand is
    /// never silently replaced.
    pub fn parse(name: NormalizedName, html: &str) -> Result<Self, PublishError> {
        let parse_error = |reason: String| PublishError::Parse {
            package: name.to_string(),
            reason,
        };
        let mut entries = Vec::new();
        for caps in LINK.captures_iter(html) {
            let mut href = None;
            let mut requires_python = None;
            for attribute in ATTRIBUTE.captures_iter(&caps[1]) {
                let value = unescape_html(&attribute[2]);
                match attribute[1].to_ascii_lowercase().as_str() {
                    "href" => href = Some(value),
                    "data-requires-python" => requires_python = Some(value),
                    _ => {}
                }
            }
            let href = href.ok_or_else(|| parse_error(format!("link without href: {}", &caps[0])))?;
            let label = unescape_html(caps[2].trim());
            let (raw_name, version) = split_label(&name, &label)
                .ok_or_else(|| parse_error(format!("can't split `{label}` into name and version")))?;
            entries.push(IndexEntry {
                name: raw_name.to_string(),
                version: version.to_string(),
                href,
                requires_python,
            });
        }
        let opened = LINK_OPEN.find_iter(html).count();
        if opened != entries.len() {
            return Err(parse_error(format!(
                "found {} link(s) but only {} are well formed",
                opened,
                entries.len()
            )));
        }
        Ok(Self { name, entries })
    }

    /// Append `entry` unless the same release is already listed.
    ///
    /// Returns whether the page changed.
    pub fn append(&mut self, entry: IndexEntry) -> bool {
        if self.entries.iter().any(|existing| existing.same_release(&entry)) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Render the whole page. `title` is the package name shown to humans.
    pub fn render(&self, title: &str) -> String {
        let links = self
            .entries
            .iter()
            .map(IndexEntry::render)
            .collect::<Vec<_>>()
            .join("\n");
        let title = escape_html(title);
        format!(
            "<!DOCTYPE html>\n\
             <html>\n\
             <head>\n\
             <title>Links for {title}</title>\n\
             </head>\n\
             <body>\n\
             <h1>Links for {title}</h1>\n\
             {links}\n\
             </body>\n\
             </html>\n"
        )
    }
}

/// Split a `<name>-<version>` label, preferring the split whose name part
/// normalizes to the page's package name
fn split_label<'a>(name: &NormalizedName, label: &'a str) -> Option<(&'a str, &'a str)> {
    let matching = label
        .match_indices('-')
        .map(|(idx, _)| (&label[..idx], &label[idx + 1..]))
        .find(|(raw, version)| !version.is_empty() && normalize(raw) == name.as_str());
    matching.or_else(|| {
        label
            .rsplit_once('-')
            .filter(|(raw, version)| !raw.is_empty() && !version.is_empty())
    })
}
