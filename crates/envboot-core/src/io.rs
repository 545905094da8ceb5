use crate::error::Result;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Prevents partial writes from corrupting record files.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create a directory and all parents, idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// True when `path` is a directory with at least one entry.
pub fn dir_has_entries(path: &Path) -> Result<bool> {
    if !path.is_dir() {
        return Ok(false);
    }
    Ok(std::fs::read_dir(path)?.next().is_some())
}

/// True when `path` exists and holds something: a non-empty directory or any file.
pub fn is_populated(path: &Path) -> Result<bool> {
    if path.is_dir() {
        return dir_has_entries(path);
    }
    Ok(path.exists())
}

/// Move the directory `staged` to `dest`, replacing whatever is there.
///
/// The previous `dest` is moved aside first and deleted only after the swap;
/// if the final rename fails it is put back.
pub fn replace_dir(staged: &Path, dest: &Path) -> Result<()> {
    let parent = dest.parent().unwrap_or(Path::new("."));
    let retired = if dest.exists() {
        let aside = tempfile::Builder::new()
            .prefix(".envboot-replaced-")
            .tempdir_in(parent)?;
        std::fs::rename(dest, aside.path().join("previous"))?;
        Some(aside)
    } else {
        None
    };

    if let Err(e) = std::fs::rename(staged, dest) {
        if let Some(aside) = &retired {
            std::fs::rename(aside.path().join("previous"), dest)?;
        }
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("record.yaml");
        atomic_write(&path, b"steps: {}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "steps: {}");
    }

    #[test]
    fn atomic_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c/record.yaml");
        atomic_write(&path, b"data").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn atomic_write_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("record.yaml");
        atomic_write(&path, b"old").unwrap();
        atomic_write(&path, b"new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn populated_distinguishes_empty_dirs() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty");
        ensure_dir(&empty).unwrap();
        assert!(!is_populated(&empty).unwrap());
        assert!(!is_populated(&dir.path().join("missing")).unwrap());

        std::fs::write(empty.join("file"), b"x").unwrap();
        assert!(is_populated(&empty).unwrap());
        assert!(is_populated(&empty.join("file")).unwrap());
    }

    #[test]
    fn replace_dir_swaps_contents() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("mujoco");
        let staged = dir.path().join("staged");
        ensure_dir(&dest).unwrap();
        ensure_dir(&staged).unwrap();
        std::fs::write(dest.join("old"), b"2.3").unwrap();
        std::fs::write(staged.join("new"), b"3.4").unwrap();

        replace_dir(&staged, &dest).unwrap();

        assert!(dest.join("new").exists());
        assert!(!dest.join("old").exists());
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, ["mujoco"]);
    }

    #[test]
    fn replace_dir_restores_previous_on_failure() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("mujoco");
        ensure_dir(&dest).unwrap();
        std::fs::write(dest.join("old"), b"2.3").unwrap();

        assert!(replace_dir(&dir.path().join("never-staged"), &dest).is_err());
        assert_eq!(std::fs::read(dest.join("old")).unwrap(), b"2.3");
    }
}
