//! Environment provisioning for test processes.
//!
//! Each sequence gets its own virtualenv under the policy's env root,
//! populated from the local package cache (`--find-links`) and, only when the
//! policy allows it, from the configured indexes. `uv` is preferred when it
//! is on PATH; plain `venv` + `pip` otherwise.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::plan::PackagePolicy;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("environment i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to create virtualenv for '{sequence}': exit code {code}")]
    VenvFailed { sequence: String, code: i32 },
    #[error("package install for '{sequence}' failed: exit code {code}")]
    InstallFailed { sequence: String, code: i32 },
}

pub type Result<T> = std::result::Result<T, EnvError>;

#[cfg(windows)]
const PYTHON: &str = "python";
#[cfg(not(windows))]
const PYTHON: &str = "python3";

/// Provisions one interpreter per sequence name.
#[derive(Debug)]
pub struct EnvManager {
    root: PathBuf,
    policy: PackagePolicy,
    uv: Option<PathBuf>,
}

impl EnvManager {
    pub fn new(policy: PackagePolicy) -> Self {
        Self {
            root: policy.resolved_env_root(),
            policy,
            uv: find_in_path("uv"),
        }
    }

    /// Interpreter path for `sequence_name`, creating and populating the
    /// environment if needed. Serialised plan execution guarantees a single
    /// writer per environment directory.
    pub async fn ensure_env(&self, sequence_name: &str, requirements: &[String]) -> Result<PathBuf> {
        let env_dir = self.root.join(sequence_name);
        let interpreter = interpreter_path(&env_dir);

        if !interpreter.exists() {
            info!(sequence = sequence_name, dir = %env_dir.display(), "creating virtualenv");
            std::fs::create_dir_all(&self.root)?;
            let status = Command::new(PYTHON)
                .arg("-m")
                .arg("venv")
                .arg("--clear")
                .arg(&env_dir)
                .status()
                .await?;
            if !status.success() {
                return Err(EnvError::VenvFailed {
                    sequence: sequence_name.to_string(),
                    code: status.code().unwrap_or(-1),
                });
            }
        }

        if requirements.is_empty() {
            debug!(sequence = sequence_name, "no requirements to install");
            return Ok(interpreter);
        }

        let (program, args) = install_command(
            self.uv.as_deref(),
            &interpreter,
            &self.policy,
            requirements,
        );
        info!(
            sequence = sequence_name,
            program = %program.display(),
            packages = requirements.len(),
            "installing packages"
        );
        let status = Command::new(&program).args(&args).status().await?;
        if !status.success() {
            return Err(EnvError::InstallFailed {
                sequence: sequence_name.to_string(),
                code: status.code().unwrap_or(-1),
            });
        }
        Ok(interpreter)
    }
}

fn interpreter_path(env_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        env_dir.join("Scripts").join("python.exe")
    } else {
        env_dir.join("bin").join("python")
    }
}

/// Build the install invocation: `uv pip install` when available, else
/// `<interpreter> -m pip install`. Offline policies pin `--no-index`; local
/// package files in the cache are preferred over bare specs.
fn install_command(
    uv: Option<&Path>,
    interpreter: &Path,
    policy: &PackagePolicy,
    requirements: &[String],
) -> (PathBuf, Vec<OsString>) {
    let mut args: Vec<OsString> = Vec::new();
    let program = match uv {
        Some(uv) => {
            args.extend(["pip".into(), "install".into(), "--python".into()]);
            args.push(interpreter.into());
            uv.to_path_buf()
        }
        None => {
            args.extend(["-m".into(), "pip".into(), "install".into()]);
            interpreter.to_path_buf()
        }
    };

    if let Some(find_links) = &policy.find_links {
        args.push("--find-links".into());
        args.push(find_links.into());
    }
    if policy.allow_online {
        for url in &policy.extra_index_urls {
            args.push("--extra-index-url".into());
            args.push(url.into());
        }
    } else {
        args.push("--no-index".into());
    }

    for requirement in requirements {
        let cached = policy.find_links.as_ref().map(|d| d.join(requirement));
        match cached {
            Some(path) if path.exists() => args.push(path.into()),
            _ => args.push(requirement.into()),
        }
    }

    (program, args)
}

fn find_in_path(bin: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    let name = if cfg!(windows) {
        format!("{bin}.exe")
    } else {
        bin.to_string()
    };
    std::env::split_paths(&path)
        .map(|dir| dir.join(&name))
        .find(|candidate| candidate.is_file())
}
