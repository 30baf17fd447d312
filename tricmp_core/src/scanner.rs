use ignore::gitignore::{Gitignore, GitignoreBuilder};
use jwalk::WalkDir;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use tracing::{debug, warn};
use tricmp_common::{AppConfig, FileEntry, TricmpError};

/// Walks one side's directory tree, yielding entries relative to its root
pub struct FolderScanner {
    follow_symlinks: bool,
    patterns: Option<Gitignore>,
    gitignore: Option<Gitignore>,
}

impl FolderScanner {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            follow_symlinks: config.follow_symlinks,
            patterns: Self::compile_patterns(&config.ignore_patterns),
            gitignore: None,
        }
    }

    fn compile_patterns(patterns: &[String]) -> Option<Gitignore> {
        if patterns.is_empty() {
            return None;
        }
        let mut builder = GitignoreBuilder::new("");
        for pattern in patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                warn!("Ignoring invalid pattern '{}': {}", pattern, e);
            }
        }
        match builder.build() {
            Ok(matcher) => Some(matcher),
            Err(e) => {
                warn!("Failed to build ignore matcher: {}", e);
                None
            }
        }
    }

    /// Honour every `.gitignore` found below `root`
    pub fn load_gitignore(&mut self, root: &Path) -> Result<(), TricmpError> {
        let mut builder = GitignoreBuilder::new(root);
        let mut found = 0usize;
        for entry in WalkDir::new(root).into_iter().flatten() {
            let path = entry.path();
            if path.file_name().map_or(true, |name| name != ".gitignore") {
                continue;
            }
            match builder.add(&path) {
                Some(e) => warn!("Skipping {}: {}", path.display(), e),
                None => found += 1,
            }
        }
        if found > 0 {
            let matcher = builder
                .build()
                .map_err(|e| TricmpError::Config(format!("Failed to build gitignore: {}", e)))?;
            self.gitignore = Some(matcher);
            debug!("Loaded {} .gitignore files under {}", found, root.display());
        }
        Ok(())
    }

    pub fn scan(&self, root: &Path) -> Result<Vec<FileEntry>, TricmpError> {
        self.scan_with_cancel(root, None)
    }

    /// Entries below `root` (the root itself excluded), skipping ignored
    /// paths. A raised `cancel` flag aborts with an error.
    pub fn scan_with_cancel(
        &self,
        root: &Path,
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<FileEntry>, TricmpError> {
        let walker = WalkDir::new(root)
            .follow_links(self.follow_symlinks)
            .skip_hidden(false)
            .sort(true);

        let mut entries = Vec::new();
        for entry in walker {
            if cancel.map_or(false, |flag| flag.load(Ordering::Relaxed)) {
                return Err(TricmpError::Comparison("Scan cancelled".to_string()));
            }
            let entry = entry.map_err(|e| TricmpError::Vfs(format!("Walk error: {}", e)))?;
            let path = entry.path();
            let relative = path
                .strip_prefix(root)
                .map_err(|e| TricmpError::Path(e.to_string()))?
                .to_path_buf();
            if relative.as_os_str().is_empty() {
                continue;
            }

            let is_dir = entry.file_type().is_dir();
            if self.is_ignored(&relative, is_dir) {
                continue;
            }

            let metadata = entry
                .metadata()
                .map_err(|e| TricmpError::Vfs(format!("Metadata error on {}: {}", path.display(), e)))?;
            entries.push(FileEntry {
                path: relative,
                size: if is_dir { 0 } else { metadata.len() },
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                is_dir,
            });
        }

        debug!("Scanned {} entries under {}", entries.len(), root.display());
        Ok(entries)
    }

    fn is_ignored(&self, relative: &Path, is_dir: bool) -> bool {
        [&self.patterns, &self.gitignore]
            .into_iter()
            .flatten()
            .any(|matcher| matches_with_parents(matcher, relative, is_dir))
    }
}

// A file is excluded if it or any ancestor directory matches.
fn matches_with_parents(matcher: &Gitignore, path: &Path, is_dir: bool) -> bool {
    if matcher.matched(path, is_dir).is_ignore() {
        return true;
    }
    let mut ancestor: Option<PathBuf> = path.parent().map(Path::to_path_buf);
    while let Some(dir) = ancestor {
        if dir.as_os_str().is_empty() {
            break;
        }
        if matcher.matched(&dir, true).is_ignore() {
            return true;
        }
        ancestor = dir.parent().map(Path::to_path_buf);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn scanner(patterns: &[&str]) -> FolderScanner {
        let config = AppConfig {
            ignore_patterns: patterns.iter().map(|p| p.to_string()).collect(),
            ..AppConfig::default()
        };
        FolderScanner::new(&config)
    }

    fn relative_paths(entries: &[FileEntry]) -> Vec<String> {
        entries
            .iter()
            .map(|e| e.path.to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_scan_excludes_root() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("sub/b.txt"), b"bb").unwrap();

        let entries = scanner(&[]).scan(temp.path()).unwrap();
        let paths = relative_paths(&entries);
        assert_eq!(entries.len(), 3);
        assert!(paths.contains(&"a.txt".to_string()));
        assert!(paths.contains(&"sub/b.txt".to_string()));
        assert!(entries.iter().all(|e| !e.path.as_os_str().is_empty()));

        let nested = entries.iter().find(|e| e.path.ends_with("b.txt")).unwrap();
        assert_eq!(nested.size, 2);
        assert!(!nested.is_dir);
    }

    #[test]
    fn test_ignore_patterns_cover_descendants() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("keep.txt"), b"k").unwrap();
        fs::write(temp.path().join("drop.log"), b"d").unwrap();
        fs::create_dir(temp.path().join("build")).unwrap();
        fs::write(temp.path().join("build/out.txt"), b"o").unwrap();

        let entries = scanner(&["*.log", "build/"]).scan(temp.path()).unwrap();
        assert_eq!(relative_paths(&entries), vec!["keep.txt".to_string()]);
    }

    #[test]
    fn test_root_anchored_pattern() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("config.toml"), b"x").unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("sub/config.toml"), b"x").unwrap();

        let entries = scanner(&["/config.toml"]).scan(temp.path()).unwrap();
        let paths = relative_paths(&entries);
        assert!(!paths.contains(&"config.toml".to_string()));
        assert!(paths.contains(&"sub/config.toml".to_string()));
    }

    #[test]
    fn test_gitignore_files_are_honoured() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".gitignore"), "*.tmp\n").unwrap();
        fs::write(temp.path().join("a.tmp"), b"t").unwrap();
        fs::write(temp.path().join("a.txt"), b"t").unwrap();

        let mut scanner = scanner(&[]);
        scanner.load_gitignore(temp.path()).unwrap();
        let paths = relative_paths(&scanner.scan(temp.path()).unwrap());
        assert!(paths.contains(&"a.txt".to_string()));
        assert!(!paths.contains(&"a.tmp".to_string()));
    }

    #[test]
    fn test_cancelled_scan_fails() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), b"a").unwrap();
        let cancel = AtomicBool::new(true);
        assert!(scanner(&[]).scan_with_cancel(temp.path(), Some(&cancel)).is_err());
    }
}
