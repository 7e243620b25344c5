//! The git operations publishing needs, run through a [`ProcessRunner`].

use crate::index::PublishError;
use crate::process::{redact, Invocation, ProcessOutcome, ProcessRunner};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

static SIGNATURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([^<>]*?)\s*<([^<>\s]+@[^<>\s]+)>\s*$").unwrap());

/// A git identity in the `Full Name <email@example.com>` format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl FromStr for Signature {
    type Err = String;

    fn from_str(signature: &str) -> Result<Self, Self::Err> {
        let caps = SIGNATURE.captures(signature).ok_or_else(|| {
            format!("`{signature}` is not a git signature like `Full Name <email@example.com>`")
        })?;
        if caps[1].is_empty() {
            return Err(format!("The signature `{signature}` has no name"));
        }
        Ok(Self {
            name: caps[1].to_string(),
            email: caps[2].to_string(),
        })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// A private checkout of the index repository
pub struct WorkingCopy<'a> {
    runner: &'a dyn ProcessRunner,
    dir: PathBuf,
    secrets: Vec<String>,
}

impl<'a> WorkingCopy<'a> {
    /// Shallow, single branch clone of `remote` into the (empty) directory `dest`
    pub fn clone_branch(
        runner: &'a dyn ProcessRunner,
        remote: &str,
        branch: &str,
        dest: &Path,
        secrets: Vec<String>,
    ) -> Result<Self, PublishError> {
        let invocation = Invocation::new("git")
            .arg("clone")
            .arg(format!("--branch={branch}"))
            .arg("--depth=1")
            .arg(remote)
            .arg(dest)
            .capture_output();
        run_git(runner, &invocation, &secrets)?;
        Ok(Self {
            runner,
            dir: dest.to_path_buf(),
            secrets,
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn configure_identity(&self, signature: &Signature) -> Result<(), PublishError> {
        self.git(&["config", "user.name", &signature.name])?;
        self.git(&["config", "user.email", &signature.email])
    }

    pub fn add_all(&self) -> Result<(), PublishError> {
        self.git(&["add", "-A"])
    }

    /// Signed-off commit of everything staged
    pub fn commit(&self, message: &str) -> Result<(), PublishError> {
        self.git(&["commit", "-sm", message])
    }

    pub fn push(&self, branch: &str) -> Result<(), PublishError> {
        self.git(&["push", "origin", &format!("{branch}:{branch}")])
    }

    fn git(&self, args: &[&str]) -> Result<(), PublishError> {
        let invocation = Invocation::new("git")
            .args(args)
            .current_dir(&self.dir)
            .capture_output();
        run_git(self.runner, &invocation, &self.secrets)
    }
}

fn run_git(
    runner: &dyn ProcessRunner,
    invocation: &Invocation,
    secrets: &[String],
) -> Result<(), PublishError> {
    let command = invocation.display_redacted(secrets);
    let transport_error = |reason: String| PublishError::Transport {
        command: command.clone(),
        reason: redact(&reason, secrets),
    };
    match runner.run(invocation) {
        Ok(ProcessOutcome::Completed(output)) if output.success() => {
            debug!("{} succeeded", command);
            Ok(())
        }
        Ok(ProcessOutcome::Completed(output)) => Err(transport_error(format!(
            "exit code {:?}: {}",
            output.code,
            output.stderr.trim()
        ))),
        Ok(ProcessOutcome::TimedOut) => Err(transport_error("timed out".to_string())),
        Err(err) => Err(transport_error(format!("{:#}", anyhow::Error::new(err)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_signature() {
        let signature: Signature = "Wheel Bot <wheels@example.com>".parse().unwrap();
        assert_eq!(
            signature,
            Signature {
                name: "Wheel Bot".to_string(),
                email: "wheels@example.com".to_string(),
            }
        );
        assert_eq!(signature.to_string(), "Wheel Bot <wheels@example.com>");
    }

    #[test]
    fn test_invalid_signatures() {
        for invalid in ["Wheel Bot", "<wheels@example.com>", "Bot <not an email>", ""] {
            assert!(invalid.parse::<Signature>().is_err(), "{invalid}");
        }
    }
}
