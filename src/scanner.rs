//! Project scanner.
//!
//! Walks a project directory and returns the candidate source files the
//! extractor should look at.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::config::ScanConfig;

/// List files under `root` whose extension is in `scan.extensions`.
///
/// Directories named in `scan.ignore_dirs` are pruned, and paths matching
/// `scan.exclude_globs` (relative to `root`) are dropped. Returned paths are
/// absolute and sorted.
pub fn scan_project(root: &Path, scan: &ScanConfig) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        bail!("Project path does not exist: {}", root.display());
    }
    let root = std::fs::canonicalize(root)?;
    let exclude_set = build_globset(&scan.exclude_globs)?;

    let mut files = Vec::new();

    let walker = WalkDir::new(&root)
        .follow_links(scan.follow_symlinks)
        .into_iter()
        .filter_entry(|entry| !is_ignored_dir(entry, &scan.ignore_dirs));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        if !scan.extensions.iter().any(|e| e == &extension) {
            continue;
        }

        let relative = path.strip_prefix(&root).unwrap_or(path);
        if exclude_set.is_match(relative) {
            continue;
        }

        files.push(path.to_path_buf());
    }

    files.sort();
    tracing::debug!(root = %root.display(), count = files.len(), "scanned project");
    Ok(files)
}

fn is_ignored_dir(entry: &DirEntry, ignore_dirs: &[String]) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && ignore_dirs
            .iter()
            .any(|d| entry.file_name().to_string_lossy() == d.as_str())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
