//! # Fast Finder
//!
//! A bounded-depth, breadth-first filesystem walk that produces executable
//! candidates matching a name set. Directory reads at each level fan out on
//! the rayon pool, which bounds how many are in flight at once. Per-entry
//! filesystem errors skip the entry and the walk continues; a cancellation
//! request stops scheduling new levels. Every qualifying path is reported at
//! most once across all scans of the same finder.

use crate::CancellationToken;
use crate::constants::WINDOWS_EXECUTABLE_EXTENSIONS;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::Ordering;

#[derive(Debug, Clone)]
pub struct FinderOptions {
    /// Require executable permission (on Windows, inferred from the
    /// extension list).
    pub executable: bool,
    /// Extensions stripped from file names on Windows before the name check.
    pub executable_extensions: Vec<String>,
}

impl Default for FinderOptions {
    fn default() -> Self {
        Self {
            executable: true,
            executable_extensions: WINDOWS_EXECUTABLE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

pub struct Finder {
    names: HashSet<String>,
    options: FinderOptions,
    seen: Mutex<HashSet<PathBuf>>,
    cancellation_token: CancellationToken,
}

impl Finder {
    pub fn new(
        names: impl IntoIterator<Item = String>,
        options: FinderOptions,
        cancellation_token: CancellationToken,
    ) -> Self {
        let names = names
            .into_iter()
            .map(|name| {
                if cfg!(target_os = "windows") {
                    name.to_ascii_lowercase()
                } else {
                    name
                }
            })
            .collect();
        Self {
            names,
            options,
            seen: Mutex::new(HashSet::new()),
            cancellation_token,
        }
    }

    /// Walks each root breadth-first down to `depth` levels below it
    /// (`0` lists the root directory only) and returns the qualifying
    /// paths not already reported by an earlier scan.
    pub fn scan(&self, depth: usize, roots: &[PathBuf]) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut frontier: Vec<PathBuf> = roots.to_vec();
        frontier.dedup();

        for level in 0..=depth {
            if frontier.is_empty() || self.cancellation_token.load(Ordering::Relaxed) {
                break;
            }
            let descend = level < depth;
            let results: Vec<(Vec<PathBuf>, Vec<PathBuf>)> = frontier
                .par_iter()
                .map(|dir| self.scan_directory(dir, descend))
                .collect();

            frontier = Vec::new();
            for (hits, subdirectories) in results {
                found.extend(hits);
                frontier.extend(subdirectories);
            }
        }
        found
    }

    /// Reads one directory, returning `(qualifying files, subdirectories)`.
    /// Any error just yields nothing for that directory.
    fn scan_directory(&self, dir: &Path, collect_subdirectories: bool) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let mut hits = Vec::new();
        let mut subdirectories = Vec::new();

        let Ok(entries) = std::fs::read_dir(dir) else {
            return (hits, subdirectories);
        };

        for entry in entries {
            if self.cancellation_token.load(Ordering::Relaxed) {
                break;
            }
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            // Resolve through symlinks; broken links are skipped.
            let Ok(metadata) = std::fs::metadata(&path) else {
                continue;
            };

            if metadata.is_dir() {
                if collect_subdirectories {
                    subdirectories.push(path);
                }
            } else if metadata.is_file()
                && self.name_qualifies(&path)
                && self.executable_qualifies(&path, &metadata)
                && self.seen.lock().unwrap().insert(path.clone())
            {
                hits.push(path);
            }
        }
        (hits, subdirectories)
    }

    fn name_qualifies(&self, path: &Path) -> bool {
        let Some(file_name) = path.file_name() else {
            return false;
        };
        let file_name = file_name.to_string_lossy();

        if cfg!(target_os = "windows") {
            let lower = file_name.to_ascii_lowercase();
            for extension in &self.options.executable_extensions {
                if let Some(stem) = lower.strip_suffix(&extension.to_ascii_lowercase())
                    && self.names.contains(stem)
                {
                    return true;
                }
            }
            self.names.contains(&lower)
        } else {
            self.names.contains(file_name.as_ref())
        }
    }

    #[allow(unused_variables)]
    fn executable_qualifies(&self, path: &Path, metadata: &std::fs::Metadata) -> bool {
        if !self.options.executable {
            return true;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions().mode() & 0o111 != 0
        }
        #[cfg(not(unix))]
        {
            let lower = path
                .file_name()
                .map(|name| name.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            self.options
                .executable_extensions
                .iter()
                .any(|extension| lower.ends_with(&extension.to_ascii_lowercase()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn token() -> CancellationToken {
        Arc::new(AtomicBool::new(false))
    }

    #[cfg(unix)]
    fn place_binary(dir: &Path, name: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_depth_zero_lists_the_root_only() {
        let root = tempfile::tempdir().unwrap();
        let top = place_binary(root.path(), "gcc");
        std::fs::create_dir(root.path().join("bin")).unwrap();
        place_binary(&root.path().join("bin"), "gcc");

        let finder = Finder::new(
            vec!["gcc".to_string()],
            FinderOptions::default(),
            token(),
        );
        let found = finder.scan(0, &[root.path().to_path_buf()]);
        assert_eq!(found, vec![top]);
    }

    #[cfg(unix)]
    #[test]
    fn test_bounded_depth_reaches_nested_directories() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        let deep = place_binary(&nested, "clang");

        let finder = Finder::new(
            vec!["clang".to_string()],
            FinderOptions::default(),
            token(),
        );
        assert!(finder.scan(1, &[root.path().to_path_buf()]).is_empty());
        let found = finder.scan(2, &[root.path().to_path_buf()]);
        assert_eq!(found, vec![deep]);
    }

    #[cfg(unix)]
    #[test]
    fn test_each_path_is_emitted_once_across_scans() {
        let root = tempfile::tempdir().unwrap();
        place_binary(root.path(), "cc");

        let finder = Finder::new(vec!["cc".to_string()], FinderOptions::default(), token());
        assert_eq!(finder.scan(0, &[root.path().to_path_buf()]).len(), 1);
        assert!(finder.scan(0, &[root.path().to_path_buf()]).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_files_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("gcc"), b"not a binary").unwrap();

        let finder = Finder::new(vec!["gcc".to_string()], FinderOptions::default(), token());
        assert!(finder.scan(0, &[root.path().to_path_buf()]).is_empty());
    }

    #[test]
    fn test_missing_roots_are_skipped() {
        let finder = Finder::new(vec!["cl".to_string()], FinderOptions::default(), token());
        let found = finder.scan(3, &[PathBuf::from("/definitely/not/here")]);
        assert!(found.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_cancellation_stops_the_walk() {
        let root = tempfile::tempdir().unwrap();
        place_binary(root.path(), "gcc");

        let cancel = token();
        cancel.store(true, Ordering::Relaxed);
        let finder = Finder::new(vec!["gcc".to_string()], FinderOptions::default(), cancel);
        assert!(finder.scan(0, &[root.path().to_path_buf()]).is_empty());
    }
}
