//! Subprocess invocation for step actions and checks.
//!
//! Every external command goes through [`run`]: stdout and stderr are
//! captured, logged at debug level, and a non-zero exit becomes
//! [`BootError::CommandFailed`] carrying the tail of stderr so the failure
//! can be diagnosed from the run record alone.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{BootError, Result};

/// Number of trailing stderr lines kept in failure details.
pub const STDERR_TAIL_LINES: usize = 20;

/// Interpreter used for `shell`, `build` and `command` check strings.
pub const SHELL: &str = "bash";

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Build a `bash -c <script>` command rooted at `cwd`.
pub fn shell(script: &str, cwd: &Path, env: &BTreeMap<String, String>) -> Command {
    let mut cmd = Command::new(SHELL);
    cmd.arg("-c").arg(script).current_dir(cwd).envs(env);
    cmd
}

/// Run `cmd` to completion and fail on a non-zero exit.
pub fn run(cmd: &mut Command) -> Result<CommandOutput> {
    let output = capture(cmd)?;
    if !output.success() {
        return Err(BootError::CommandFailed {
            command: display(cmd),
            code: output.code,
            stderr_tail: tail(&output.stderr, STDERR_TAIL_LINES),
        });
    }
    Ok(output)
}

/// Run `cmd` and report whether it exited 0. Spawn failures still error.
pub fn probe(cmd: &mut Command) -> Result<bool> {
    Ok(capture(cmd)?.success())
}

fn capture(cmd: &mut Command) -> Result<CommandOutput> {
    let shown = display(cmd);
    debug!(command = %shown, "spawning");
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| BootError::SpawnFailed {
            command: shown.clone(),
            reason: e.to_string(),
        })?;

    let out = CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    debug!(command = %shown, code = ?out.code, stdout = %out.stdout.trim_end(), "finished");
    Ok(out)
}

/// Locate a binary on PATH.
pub fn require_binary(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| BootError::MissingBinary(name.to_string()))
}

/// Render a command line for logs and error messages.
pub fn display(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
