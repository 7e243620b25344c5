use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

static SEPARATOR_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-_.]+").unwrap());

/// A package name normalized following
/// [PEP 503](https://peps.python.org/pep-0503/#normalized-names): runs of `-`, `_` and `.`
/// are collapsed into a single `-` and the result is lowercased.
///
/// This is the key under which a package lives in the simple index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct NormalizedName(String);

impl NormalizedName {
    /// Normalize a raw distribution name
    pub fn new(raw: &str) -> Self {
        Self(normalize(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// PEP 503 normalization of a raw package name
pub fn normalize(name: &str) -> String {
    SEPARATOR_RUNS
        .replace_all(name.trim(), "-")
        .to_ascii_lowercase()
}

impl Deref for NormalizedName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for NormalizedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NormalizedName {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<String> for NormalizedName {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<NormalizedName> for String {
    fn from(value: NormalizedName) -> Self {
        value.0
    }
}
