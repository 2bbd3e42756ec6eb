//! File discovery in watched directories.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Lists candidate files directly inside a directory.
#[derive(Debug, Clone, Default)]
pub struct FileDiscovery {
    extensions: Vec<String>,
}

impl FileDiscovery {
    /// Create a discovery instance; an empty extension list accepts every file.
    pub fn new(extensions: &[String]) -> Self {
        Self {
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Regular files directly inside `dir` (no recursion), sorted by path.
    pub fn discover(&self, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        // Surface a missing or unreadable directory instead of an empty scan.
        std::fs::read_dir(dir)?;

        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| self.is_supported(p))
            .collect();

        files.sort();
        Ok(files)
    }

    /// Check if a file has an accepted extension.
    fn is_supported(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext_lower = ext.to_lowercase();
                self.extensions.iter().any(|e| *e == ext_lower)
            })
            .unwrap_or(false)
    }
}
