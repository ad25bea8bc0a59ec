use canopy_core::Snapshot;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// File name of the persisted snapshot under the state directory.
const STATE_FILE: &str = "state.json";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("registry serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Last-written snapshot on disk, for out-of-process observers (menubar,
/// widgets) that never talk to the hub. Latest write wins; no history.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.canopy/state.json`, falling back to the working directory when no
    /// home directory exists.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".canopy")
            .join(STATE_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the file atomically (write-then-rename) so readers never see
    /// a torn snapshot.
    pub async fn write(&self, snapshot: &Snapshot) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &data).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub async fn read(&self) -> Result<Snapshot, RegistryError> {
        let data = fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::Worktree;

    fn snapshot() -> Snapshot {
        let mut alpha = Worktree::new("/repos/alpha", "/repos/alpha");
        alpha.name = "alpha".to_string();
        alpha.branch = "main".to_string();
        let mut beta = Worktree::new("/repos/beta", "/repos/alpha");
        beta.name = "beta".to_string();
        beta.branch = "feature/beta".to_string();
        beta.git_dirty = true;
        Snapshot::new(vec![beta, alpha])
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_the_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let file = SnapshotFile::new(tmp.path().join("state.json"));

        let written = snapshot();
        file.write(&written).await.expect("write");
        let read = file.read().await.expect("read");

        assert_eq!(read, written);
        let names: Vec<_> = read.workspaces.iter().map(|wt| wt.name.as_str()).collect();
        assert_eq!(names, ["alpha", "beta"]);
    }

    #[tokio::test]
    async fn write_creates_missing_parent_directories() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let file = SnapshotFile::new(tmp.path().join("nested").join("dir").join("state.json"));

        file.write(&snapshot()).await.expect("write");
        assert!(file.path().exists());
    }

    #[tokio::test]
    async fn rewrite_replaces_the_previous_snapshot_wholesale() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let file = SnapshotFile::new(tmp.path().join("state.json"));

        file.write(&snapshot()).await.expect("first write");
        let empty = Snapshot::empty();
        file.write(&empty).await.expect("second write");

        let read = file.read().await.expect("read");
        assert!(read.workspaces.is_empty());
    }

    #[test]
    fn default_path_ends_with_the_state_file() {
        assert!(SnapshotFile::default_path().ends_with(".canopy/state.json"));
    }
}
