use crate::error::ConfigError;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const MANIFEST_FILE: &str = "envboot.yaml";
pub const STATE_DIR: &str = ".envboot";
pub const RECORDS_DIR: &str = "records";
pub const LOCKS_DIR: &str = "locks";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn manifest_path(root: &Path) -> PathBuf {
    root.join(MANIFEST_FILE)
}

pub fn records_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join(RECORDS_DIR)
}

pub fn record_path(records_dir: &Path, env: &str) -> PathBuf {
    records_dir.join(format!("{env}.yaml"))
}

pub fn locks_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join(LOCKS_DIR)
}

pub fn lock_path(locks_dir: &Path, env: &str) -> PathBuf {
    locks_dir.join(format!("{env}.lock"))
}

// ---------------------------------------------------------------------------
// Identifier validation
// ---------------------------------------------------------------------------

static ID_RE: OnceLock<Regex> = OnceLock::new();

fn id_re() -> &'static Regex {
    ID_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9_\-]*[a-z0-9]$|^[a-z0-9]$").expect("static regex")
    })
}

/// Environment names and step ids double as file names, so keep them tame.
pub fn validate_id(id: &str) -> Result<(), ConfigError> {
    if id.is_empty() || id.len() > 64 || !id_re().is_match(id) {
        return Err(ConfigError::InvalidId(id.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ids() {
        for id in ["rl-lab", "a", "clone_isaaclab", "mujoco-3"] {
            validate_id(id).unwrap_or_else(|_| panic!("expected valid: {id}"));
        }
    }

    #[test]
    fn invalid_ids() {
        for id in ["", "-dash", "trailing-", "has spaces", "UPPER", "../up"] {
            assert!(validate_id(id).is_err(), "expected invalid: {id}");
        }
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(manifest_path(root), PathBuf::from("/tmp/proj/envboot.yaml"));
        assert_eq!(
            record_path(&records_dir(root), "rl-lab"),
            PathBuf::from("/tmp/proj/.envboot/records/rl-lab.yaml")
        );
        assert_eq!(
            lock_path(&locks_dir(root), "mujoco"),
            PathBuf::from("/tmp/proj/.envboot/locks/mujoco.lock")
        );
    }
}
