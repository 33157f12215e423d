//! Filesystem helpers.

use anyhow::{Context, Result, bail};
use std::path::Path;

/// Add execute permission for user, group and other (like `chmod +x`).
pub fn make_executable(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path).with_context(|| format!("cannot stat {}", path.display()))?;
    if !meta.is_file() {
        bail!("not a regular file: {}", path.display());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = meta.permissions();
        perms.set_mode(perms.mode() | 0o111);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("cannot chmod {}", path.display()))?;

        let mode = std::fs::metadata(path)?.permissions().mode();
        if mode & 0o100 == 0 {
            bail!("{} is still not executable (mode {:o})", path.display(), mode);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_make_executable_sets_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("patchelf");
        std::fs::write(&bin, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o644)).unwrap();

        make_executable(&bin).unwrap();

        let mode = std::fs::metadata(&bin).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_make_executable_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(make_executable(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn test_make_executable_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = make_executable(dir.path()).unwrap_err();
        assert!(err.to_string().contains("not a regular file"));
    }
}
