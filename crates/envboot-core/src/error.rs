use std::path::PathBuf;
use thiserror::Error;

/// Problems with the descriptor or with what the caller asked for.
///
/// Always raised before any step runs; the run record is never touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("manifest not found: {}", .0.display())]
    ManifestNotFound(PathBuf),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("unsupported manifest version {0} (expected 1)")]
    UnsupportedVersion(u32),

    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),

    #[error("unknown step '{step}' in environment '{env}'")]
    UnknownStep { env: String, step: String },

    #[error("duplicate step '{step}' in environment '{env}'")]
    DuplicateStep { env: String, step: String },

    #[error("step '{step}' in '{env}' depends on unknown step '{dependency}'")]
    UnknownDependency {
        env: String,
        step: String,
        dependency: String,
    },

    #[error(
        "step '{step}' in '{env}' depends on '{dependency}', which is not declared before it"
    )]
    ForwardDependency {
        env: String,
        step: String,
        dependency: String,
    },

    #[error("dependency cycle among steps: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("step '{step}' needs '{dependency}', which is outside the selected steps and has not succeeded")]
    UnsatisfiedDependency { step: String, dependency: String },

    #[error("invalid identifier '{0}': must be lowercase alphanumeric with hyphens or underscores")]
    InvalidId(String),

    #[error("undefined variable '${{{0}}}'")]
    UnknownVariable(String),

    #[error("invalid variable assignment '{0}': expected KEY=VALUE")]
    InvalidAssignment(String),

    #[error("invalid pattern in step '{step}': {reason}")]
    InvalidPattern { step: String, reason: String },
}

#[derive(Debug, Error)]
pub enum BootError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("step '{step}' (#{position}) failed: {cause}")]
    StepExecution {
        step: String,
        position: usize,
        cause: String,
    },

    #[error("rollback of step '{step}' failed: {cause}")]
    Rollback { step: String, cause: String },

    #[error(
        "environment '{env}' is locked by another run ({holder}); remove {} if no envboot process is running",
        .path.display()
    )]
    Locked {
        env: String,
        path: PathBuf,
        holder: String,
    },

    #[error("`{command}` exited with {}{}", exit_label(.code), format_tail(.stderr_tail))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("failed to spawn `{command}`: {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("required binary '{0}' not found in PATH")]
    MissingBinary(String),

    #[error("destination exists and is not empty: {} (choose an empty directory or remove it)", .0.display())]
    DestinationNotEmpty(PathBuf),

    #[error("pattern '{pattern}' not found in {}", .file.display())]
    PatchTargetMissing { file: PathBuf, pattern: String },

    #[error("download failed: {0}")]
    Download(String),

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BootError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, BootError::Config(_))
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "a signal".to_string(),
    }
}

fn format_tail(tail: &str) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!(":\n{tail}")
    }
}

pub type Result<T> = std::result::Result<T, BootError>;
