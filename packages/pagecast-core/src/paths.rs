//! Working-tree layout and clean operations.
//!
//! Everything transient lives under one root: browser profile data,
//! preprocessor cache, synthesizer intermediates, and the local font
//! cache. Each subtree has a dedicated, idempotent clean operation.

use std::io;
use std::path::{Path, PathBuf};

/// Resolved working-tree layout.
#[derive(Debug, Clone)]
pub struct WorkDirs {
    root: PathBuf,
}

impl WorkDirs {
    /// Creates the layout rooted at `root`. Directories are created lazily
    /// by [`WorkDirs::ensure`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Browser user-data directory, shared across runs.
    pub fn browser(&self) -> PathBuf {
        self.root.join("browser")
    }

    /// Content-addressed media cache for the preprocessor.
    pub fn preprocessor(&self) -> PathBuf {
        self.root.join("preprocessor")
    }

    /// Chunk intermediates for multi-scene synthesis.
    pub fn synthesizer(&self) -> PathBuf {
        self.root.join("synthesizer")
    }

    /// Local font cache served under `/local_font/*`.
    pub fn local_font(&self) -> PathBuf {
        self.root.join("local_font")
    }

    /// Creates all subtrees.
    pub async fn ensure(&self) -> io::Result<()> {
        for dir in [
            self.browser(),
            self.preprocessor(),
            self.synthesizer(),
            self.local_font(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    /// Removes the browser user-data directory.
    pub async fn clean_browser(&self) -> io::Result<()> {
        remove_tree(&self.browser()).await
    }

    /// Removes the preprocessor cache.
    pub async fn clean_preprocessor(&self) -> io::Result<()> {
        remove_tree(&self.preprocessor()).await
    }

    /// Removes chunk intermediates.
    pub async fn clean_synthesizer(&self) -> io::Result<()> {
        remove_tree(&self.synthesizer()).await
    }

    /// Removes the font cache.
    pub async fn clean_local_font(&self) -> io::Result<()> {
        remove_tree(&self.local_font()).await
    }
}

/// Removes a directory tree, treating "already absent" as success.
async fn remove_tree(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_then_clean_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = WorkDirs::new(tmp.path().join("work"));

        dirs.ensure().await.unwrap();
        assert!(dirs.preprocessor().is_dir());

        dirs.clean_preprocessor().await.unwrap();
        assert!(!dirs.preprocessor().exists());
        // Second clean of an absent tree succeeds.
        dirs.clean_preprocessor().await.unwrap();

        dirs.clean_browser().await.unwrap();
        dirs.clean_synthesizer().await.unwrap();
        dirs.clean_local_font().await.unwrap();
    }
}
