//! Private copies of validated artifacts
//!
//! Loaders never reopen the bundle. The bytes that passed trust validation
//! are written to a per-instance file under the host's data directory, and
//! that file is what a loader maps. Rewriting the bundle after validation
//! therefore cannot change the code that runs.

use crate::lifecycle::InstanceId;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Validated artifact bytes and the private file they were written to
pub struct StagedArtifact {
    bytes: Vec<u8>,
    path: PathBuf,
    guard: StagingGuard,
}

impl StagedArtifact {
    /// Write `bytes` to `<root>/instance-<n>/<file_name>`
    ///
    /// Anything left in that directory by an earlier run is removed first,
    /// and the file is created fresh so a planted file or link is never
    /// written through.
    pub fn stage(
        root: &Path,
        instance: InstanceId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> io::Result<Self> {
        let dir = root.join(format!("instance-{}", instance.0));
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::create_dir_all(&dir)?;

        let guard = StagingGuard { dir };
        let path = guard.dir.join(file_name);

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        tracing::debug!("Staged validated artifact at {}", path.display());
        Ok(Self { bytes, path, guard })
    }

    /// The bytes that passed validation
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Private file holding exactly [`bytes`](Self::bytes)
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Free the in-memory copy; the file lives as long as the guard
    pub fn into_guard(self) -> StagingGuard {
        self.guard
    }
}

/// Removes a staged copy when dropped
pub struct StagingGuard {
    dir: PathBuf,
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            if e.kind() != ErrorKind::NotFound {
                tracing::debug!("Could not remove staged artifact {}: {}", self.dir.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_writes_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let staged =
            StagedArtifact::stage(dir.path(), InstanceId(7), "libp.so", b"GOOD CODE".to_vec())
                .unwrap();

        assert_eq!(staged.bytes(), b"GOOD CODE");
        assert_eq!(staged.path(), dir.path().join("instance-7").join("libp.so"));
        assert_eq!(fs::read(staged.path()).unwrap(), b"GOOD CODE");
    }

    #[test]
    fn test_guard_removes_staged_copy() {
        let dir = tempfile::tempdir().unwrap();
        let staged =
            StagedArtifact::stage(dir.path(), InstanceId(1), "libp.so", b"code".to_vec()).unwrap();
        let path = staged.path().to_path_buf();

        let guard = staged.into_guard();
        assert!(path.exists());
        drop(guard);
        assert!(!path.exists());
        assert!(!dir.path().join("instance-1").exists());
    }

    #[test]
    fn test_leftover_files_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let leftover = dir.path().join("instance-3");
        fs::create_dir_all(&leftover).unwrap();
        fs::write(leftover.join("libp.so"), b"EVIL CODE").unwrap();
        fs::write(leftover.join("stray"), b"x").unwrap();

        let staged =
            StagedArtifact::stage(dir.path(), InstanceId(3), "libp.so", b"GOOD CODE".to_vec())
                .unwrap();
        assert_eq!(fs::read(staged.path()).unwrap(), b"GOOD CODE");
        assert!(!leftover.join("stray").exists());
    }
}
