use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BootError, Result};
use crate::io::ensure_dir;
use crate::paths;

#[derive(Debug, Serialize, Deserialize)]
struct LockHolder {
    pid: u32,
    acquired_at: String,
}

/// Exclusive claim on one environment, released when dropped.
///
/// Created with `create_new`, so a second orchestrator against the same
/// environment fails fast instead of interleaving record writes.
#[derive(Debug)]
pub struct EnvLock {
    path: PathBuf,
}

impl EnvLock {
    pub fn acquire(locks_dir: &Path, env: &str) -> Result<Self> {
        ensure_dir(locks_dir)?;
        let path = paths::lock_path(locks_dir, env);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                let holder = LockHolder {
                    pid: std::process::id(),
                    acquired_at: Utc::now().to_rfc3339(),
                };
                let payload = serde_json::to_string(&holder)?;
                file.write_all(payload.as_bytes())?;
                file.sync_all()?;
                debug!(lock = %path.display(), "acquired");
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)
                    .ok()
                    .and_then(|s| serde_json::from_str::<LockHolder>(&s).ok())
                    .map(|h| format!("pid {} since {}", h.pid, h.acquired_at))
                    .unwrap_or_else(|| "unknown holder".to_string());
                Err(BootError::Locked {
                    env: env.to_string(),
                    path,
                    holder,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EnvLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_fails_until_release() {
        let dir = TempDir::new().unwrap();
        let first = EnvLock::acquire(dir.path(), "rl-lab").unwrap();
        assert!(first.path().exists());

        let err = EnvLock::acquire(dir.path(), "rl-lab").unwrap_err();
        match err {
            BootError::Locked { env, holder, .. } => {
                assert_eq!(env, "rl-lab");
                assert!(holder.contains(&std::process::id().to_string()));
            }
            other => panic!("expected Locked, got {other:?}"),
        }

        drop(first);
        let again = EnvLock::acquire(dir.path(), "rl-lab").unwrap();
        drop(again);
        assert!(!dir.path().join("rl-lab.lock").exists());
    }

    #[test]
    fn environments_lock_independently() {
        let dir = TempDir::new().unwrap();
        let _a = EnvLock::acquire(dir.path(), "rl-lab").unwrap();
        let _b = EnvLock::acquire(dir.path(), "mujoco").unwrap();
    }
}
