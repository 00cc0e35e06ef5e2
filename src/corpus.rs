//! Corpus discovery.
//!
//! A corpus manifest lists one project directory per line, relative to the
//! manifest's own directory. Each project contributes the files carrying an
//! extension of one of the selected languages, minus the exclude globs
//! (matched against the path relative to the project).

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use stbench_core::Language;

/// A project directory and its selected source files, sorted.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub files: Vec<PathBuf>,
}

/// Project directories named by the manifest at `manifest`.
pub fn read_manifest(manifest: &Path) -> Result<Vec<PathBuf>> {
    let content = std::fs::read_to_string(manifest)
        .with_context(|| format!("Failed to read corpus manifest: {}", manifest.display()))?;
    let base = manifest.parent().unwrap_or(Path::new(""));

    let mut seen = BTreeSet::new();
    let mut projects = Vec::new();
    for line in content.lines() {
        let name = line.trim_end();
        if name.trim().is_empty() || name.starts_with('#') {
            continue;
        }
        let project = base.join(name);
        if seen.insert(project.clone()) {
            projects.push(project);
        }
    }
    Ok(projects)
}

/// Source files of `languages` under `root`, sorted.
pub fn find(root: &Path, languages: &BTreeSet<Language>, excludes: &GlobSet) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("Project directory does not exist: {}", root.display());
    }

    let exts: BTreeSet<&str> = languages
        .iter()
        .flat_map(|l| l.exts().iter().copied())
        .collect();

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !exts.contains(format!(".{}", ext).as_str()) {
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(path);
        if excludes.is_match(relative) {
            continue;
        }

        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

/// Every project of the manifest with its files.
pub fn discover(manifest: &Path, languages: &BTreeSet<Language>, exclude_globs: &[String]) -> Result<Vec<Project>> {
    let excludes = build_globset(exclude_globs)?;
    read_manifest(manifest)?
        .into_iter()
        .map(|root| {
            let files = find(&root, languages, &excludes)?;
            tracing::debug!("{}: {} files", root.display(), files.len());
            Ok(Project { root, files })
        })
        .collect()
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
