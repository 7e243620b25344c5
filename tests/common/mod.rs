#![allow(dead_code)]

use fs_err as fs;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use wheels_builder::{Invocation, ProcessOutcome, ProcessOutput, ProcessRunner, RunError};

type Handler = Box<dyn Fn(&Invocation) -> ProcessOutcome>;

/// Stands in for pip, auditwheel, python and git.
///
/// The index repository is a plain directory: `git clone` copies it into the
/// destination and `git push` copies the working copy back.
pub struct FakeRunner {
    pub calls: RefCell<Vec<Invocation>>,
    remote: Option<PathBuf>,
    metadata: String,
    pip: Handler,
    failing_git: Option<&'static str>,
}

pub fn completed(code: i32) -> ProcessOutcome {
    ProcessOutcome::Completed(ProcessOutput {
        code: Some(code),
        stdout: String::new(),
        stderr: String::new(),
    })
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            calls: RefCell::default(),
            remote: None,
            metadata: String::new(),
            pip: Box::new(|_| completed(0)),
            failing_git: None,
        }
    }

    pub fn remote(mut self, remote: &Path) -> Self {
        self.remote = Some(remote.to_path_buf());
        self
    }

    /// Output of `setup.py --name --version --classifiers`
    pub fn metadata(mut self, stdout: &str) -> Self {
        self.metadata = stdout.to_string();
        self
    }

    pub fn on_pip(mut self, handler: impl Fn(&Invocation) -> ProcessOutcome + 'static) -> Self {
        self.pip = Box::new(handler);
        self
    }

    /// Make the git subcommand fail, e.g. `push`
    pub fn fail_git(mut self, subcommand: &'static str) -> Self {
        self.failing_git = Some(subcommand);
        self
    }

    /// Every recorded command line
    pub fn command_lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(ToString::to_string).collect()
    }

    pub fn git_subcommands(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|invocation| invocation.program == "git")
            .map(|invocation| invocation.args[0].clone())
            .collect()
    }

    fn git(&self, invocation: &Invocation) -> ProcessOutcome {
        let subcommand = invocation.args[0].as_str();
        if self.failing_git == Some(subcommand) {
            return ProcessOutcome::Completed(ProcessOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: "! [rejected] main -> main (fetch first)".to_string(),
            });
        }
        match subcommand {
            "clone" => {
                let dest = PathBuf::from(invocation.args.last().unwrap());
                fs::create_dir_all(&dest).unwrap();
                if let Some(remote) = &self.remote {
                    copy_tree(remote, &dest);
                }
            }
            "push" => {
                if let (Some(remote), Some(cwd)) = (&self.remote, &invocation.cwd) {
                    copy_tree(cwd, remote);
                }
            }
            _ => {}
        }
        completed(0)
    }
}

impl ProcessRunner for FakeRunner {
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutcome, RunError> {
        self.calls.borrow_mut().push(invocation.clone());
        let outcome = match invocation.program.as_str() {
            "git" => self.git(invocation),
            "python3" if invocation.args.iter().any(|arg| arg == "--classifiers") => {
                ProcessOutcome::Completed(ProcessOutput {
                    code: Some(0),
                    stdout: self.metadata.clone(),
                    stderr: String::new(),
                })
            }
            "python3" if invocation.args.iter().any(|arg| arg == "wheel") => (self.pip)(invocation),
            _ => completed(0),
        };
        Ok(outcome)
    }
}

/// The value following `flag` in the invocation
pub fn flag_value<'a>(invocation: &'a Invocation, flag: &str) -> &'a str {
    let position = invocation.args.iter().position(|arg| arg == flag).unwrap();
    &invocation.args[position + 1]
}

/// Pretend to be `pip wheel` producing `file_name` in `--wheel-dir`
pub fn write_wheel(invocation: &Invocation, file_name: &str) {
    let wheel_dir = flag_value(invocation, "--wheel-dir");
    fs::write(Path::new(wheel_dir).join(file_name), file_name).unwrap();
}

pub fn copy_tree(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.path().is_dir() {
            copy_tree(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), target).unwrap();
        }
    }
}

pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    names.sort();
    names
}
