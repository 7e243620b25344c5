//! Which packages pip must build from source instead of taking a prebuilt wheel.

use crate::index::{is_available, Inventory, NormalizedName};
use crate::requirements::PackageSet;
use indexmap::IndexSet;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, instrument, warn};

/// pip's spelling of the empty set
pub const NONE: &str = ":none:";
/// pip's spelling of "every package"
pub const ALL: &str = ":all:";

/// Normalized names to pass to `--no-binary`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipBinarySet {
    all: bool,
    names: IndexSet<NormalizedName>,
}

impl SkipBinarySet {
    pub fn contains(&self, name: &NormalizedName) -> bool {
        self.all || self.names.contains(name)
    }

    /// Returns whether the name was newly added
    pub fn insert(&mut self, name: NormalizedName) -> bool {
        self.names.insert(name)
    }
}

impl FromStr for SkipBinarySet {
    type Err = std::convert::Infallible;

    /// Parse a comma separated list; `:none:` clears everything before it
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let mut set = Self::default();
        for item in spec.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            match item {
                NONE => set = Self::default(),
                ALL => set.all = true,
                name => {
                    set.insert(NormalizedName::new(name));
                }
            }
        }
        Ok(set)
    }
}

/// The `--no-binary` argument value
impl fmt::Display for SkipBinarySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.all {
            f.write_str(ALL)
        } else if self.names.is_empty() {
            f.write_str(NONE)
        } else {
            use itertools::Itertools;

            f.write_str(&self.names.iter().map(NormalizedName::as_str).join(","))
        }
    }
}

/// Extend `base` with every package of `packages` the target index can't serve yet.
///
/// A package that is missing from the index must produce a wheel in this run,
/// so pip isn't allowed to satisfy it with a wheel from another index. When the
/// index can't be queried the package is treated as missing.
#[instrument(skip_all)]
pub fn apply_policy(
    base: SkipBinarySet,
    packages: &PackageSet,
    inventory: &dyn Inventory,
) -> SkipBinarySet {
    let mut skip_binary = base;
    if skip_binary.all {
        return skip_binary;
    }
    for spec in packages {
        let Some(name) = spec.name() else {
            warn!("Can't determine the package name of `{}`", spec);
            continue;
        };
        if skip_binary.contains(&name) {
            continue;
        }
        let available = is_available(inventory, spec).unwrap_or_else(|err| {
            warn!("Failed to look up {} in the index: {:#}", name, err);
            false
        });
        if !available {
            debug!("{} is not in the index, building it from source", name);
            skip_binary.insert(name);
        }
    }
    skip_binary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexEntry;
    use crate::requirements::PackageSpec;
    use anyhow::{bail, Result};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    struct StaticInventory(HashMap<&'static str, Vec<&'static str>>);

    impl Inventory for StaticInventory {
        fn lookup(&self, name: &NormalizedName) -> Result<Vec<IndexEntry>> {
            if name.as_str() == "flaky" {
                bail!("connection reset");
            }
            Ok(self
                .0
                .get(name.as_str())
                .into_iter()
                .flatten()
                .map(|version| {
                    IndexEntry::from_git_tag(name, version, "https://example.com", version, "3.9")
                })
                .collect())
        }
    }

    fn packages(lines: &[&str]) -> PackageSet {
        lines.iter().copied().map(PackageSpec::new).collect()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(":none:".parse::<SkipBinarySet>().unwrap(), SkipBinarySet::default());
        assert_eq!(SkipBinarySet::default().to_string(), ":none:");
        let set: SkipBinarySet = "aiohttp, PyYAML,,".parse().unwrap();
        assert_eq!(set.to_string(), "aiohttp,pyyaml");
        assert_eq!("grpcio,:none:".parse::<SkipBinarySet>().unwrap(), SkipBinarySet::default());
        let set: SkipBinarySet = ":all:,:none:,yarl".parse().unwrap();
        assert_eq!(set.to_string(), "yarl");
        assert_eq!(":all:".parse::<SkipBinarySet>().unwrap().to_string(), ":all:");
    }

    #[test]
    fn test_policy_adds_missing_packages() {
        let inventory = StaticInventory(HashMap::from([
            ("aiohttp", vec!["3.9.1"]),
            ("pyyaml", vec!["6.0.1"]),
        ]));
        let base: SkipBinarySet = "grpcio".parse().unwrap();
        let result = apply_policy(
            base,
            &packages(&[
                "aiohttp==3.9.1",
                "PyYAML==6.0.2",
                "yarl==1.9.4",
                "grpcio==1.60.0",
                "flaky==1.0",
            ]),
            &inventory,
        );
        assert_eq!(result.to_string(), "grpcio,pyyaml,yarl,flaky");
    }

    #[test]
    fn test_policy_keeps_all() {
        let inventory = StaticInventory(HashMap::new());
        let result = apply_policy(":all:".parse().unwrap(), &packages(&["yarl"]), &inventory);
        assert_eq!(result.to_string(), ":all:");
    }
}
