use crate::error::{AnalysisError, AnalysisResult};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const RAW_MESSAGE_FILE: &str = "original.eml";
const ATTACHMENTS_DIR: &str = "attachments";
const SCREENSHOTS_DIR: &str = "screenshots";

/// Exclusively owned working directory for one request.
///
/// Dropping the handle removes the directory tree, so every exit path of the
/// request (including panics and cancelled futures) releases it.
#[derive(Debug)]
pub struct Sandbox {
    dir: Option<TempDir>,
    root: PathBuf,
    id: String,
}

impl Sandbox {
    pub fn create() -> AnalysisResult<Self> {
        Self::create_in(std::env::temp_dir())
    }

    pub fn create_in(parent: impl AsRef<Path>) -> AnalysisResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix("email-checker-")
            .tempdir_in(parent)
            .map_err(AnalysisError::Io)?;
        let root = dir.path().to_path_buf();
        let id = root
            .file_name()
            .map(|n| n.to_string_lossy().trim_start_matches("email-checker-").to_string())
            .unwrap_or_default();
        log::debug!("[{id}] sandbox created at {}", root.display());
        Ok(Self {
            dir: Some(dir),
            root,
            id,
        })
    }

    /// Short identifier used to tag log lines for this request.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_message_path(&self) -> PathBuf {
        self.root.join(RAW_MESSAGE_FILE)
    }

    /// Attachments subarea, created on first use.
    pub fn attachments_dir(&self) -> AnalysisResult<PathBuf> {
        self.ensure_subdir(ATTACHMENTS_DIR)
    }

    /// Screenshots subarea, created on first use.
    pub fn screenshots_dir(&self) -> AnalysisResult<PathBuf> {
        self.ensure_subdir(SCREENSHOTS_DIR)
    }

    fn ensure_subdir(&self, name: &str) -> AnalysisResult<PathBuf> {
        if self.dir.is_none() {
            return Err(AnalysisError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("sandbox {} already destroyed", self.id),
            )));
        }
        let path = self.root.join(name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    pub fn is_active(&self) -> bool {
        self.dir.is_some()
    }

    /// Removes the directory tree. Calling it again is a no-op.
    pub fn destroy(&mut self) {
        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => log::debug!("[{}] sandbox destroyed", self.id),
                Err(e) => log::warn!("[{}] failed to remove sandbox: {e}", self.id),
            }
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandboxes_are_unique_and_removed() {
        let parent = tempfile::tempdir().unwrap();
        let a = Sandbox::create_in(parent.path()).unwrap();
        let b = Sandbox::create_in(parent.path()).unwrap();
        assert_ne!(a.root(), b.root());

        let root = a.root().to_path_buf();
        std::fs::write(a.raw_message_path(), b"hello").unwrap();
        drop(a);
        assert!(!root.exists());
        assert!(b.root().exists());
    }

    #[test]
    fn test_subdirectories_are_lazy() {
        let parent = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::create_in(parent.path()).unwrap();
        assert!(!sandbox.root().join("screenshots").exists());

        let shots = sandbox.screenshots_dir().unwrap();
        assert!(shots.is_dir());
        assert!(shots.starts_with(sandbox.root()));
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let parent = tempfile::tempdir().unwrap();
        let mut sandbox = Sandbox::create_in(parent.path()).unwrap();
        let root = sandbox.root().to_path_buf();
        sandbox.attachments_dir().unwrap();

        sandbox.destroy();
        sandbox.destroy();
        assert!(!root.exists());
        assert!(!sandbox.is_active());
        assert!(sandbox.attachments_dir().is_err());
    }

    #[test]
    fn test_create_fails_on_missing_parent() {
        let result = Sandbox::create_in("/nonexistent/definitely/not/here");
        assert!(matches!(result, Err(AnalysisError::Io(_))));
    }
}
