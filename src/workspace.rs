//! Reading a project tree into memory and writing generated files back.
//!
//! Every path that reaches the disk goes through [`codec::sanitize_path`], so
//! nothing can be written outside the project base.
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::Config;
use crate::indexer::relevance::has_extension;

/// What [`write_files`] did with each path.
#[derive(Debug, Default, Serialize)]
pub struct WriteReport {
    pub written: Vec<String>,
    /// Original path -> backup file name, relative to the base.
    pub backups: BTreeMap<String, String>,
    pub rejected: Vec<String>,
}

fn build_excludes(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern).with_context(|| format!("invalid exclude pattern: {pattern}"))?,
        );
    }
    builder.build().context("failed to build exclude set")
}

/// Collect readable project files as `relative/path -> content`.
///
/// Honors `.gitignore`, the extension allow-list and the exclude patterns.
/// Files that cannot be read as UTF-8 are logged and skipped.
pub fn read_project_files(base: &Path, config: &Config) -> Result<BTreeMap<String, String>> {
    anyhow::ensure!(base.is_dir(), "not a directory: {}", base.display());

    let excludes = build_excludes(&config.files.exclude_patterns)?;
    let mut files = BTreeMap::new();

    // Walk builder respects .gitignore by default
    let walker = WalkBuilder::new(base).hidden(false).build();

    for entry in walker.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            continue;
        }

        let Ok(relative) = path.strip_prefix(base) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");

        if relative.split('/').any(|s| s == ".git") || excludes.is_match(&relative) {
            debug!("Excluded {relative}");
            continue;
        }
        if !has_extension(&relative, &config.files.readable_extensions) {
            continue;
        }

        match fs::read_to_string(path) {
            Ok(content) => {
                files.insert(relative, content);
            }
            Err(e) => warn!("Skipping unreadable file {relative}: {e}"),
        }
    }

    info!("Read {} files from {}", files.len(), base.display());
    Ok(files)
}

/// Write `relative/path -> content` pairs under `base`.
///
/// Unsafe paths are skipped and listed in the report. An existing file is
/// copied to `<file>.bak.<UTC timestamp>` before it is overwritten.
pub fn write_files(base: &Path, files: &BTreeMap<String, String>) -> Result<WriteReport> {
    let mut report = WriteReport::default();

    for (raw_path, content) in files {
        let relative = match codec::sanitize_path(raw_path) {
            Ok(p) => p,
            Err(e) => {
                warn!("Refusing to write: {e}");
                report.rejected.push(raw_path.clone());
                continue;
            }
        };

        let target = base.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        if target.is_file() {
            let backup = backup_name(&relative);
            fs::copy(&target, base.join(&backup))
                .with_context(|| format!("failed to back up {relative}"))?;
            debug!("Backed up {relative} to {backup}");
            report.backups.insert(relative.clone(), backup);
        }

        fs::write(&target, content).with_context(|| format!("failed to write {relative}"))?;
        info!("Wrote {relative}");
        report.written.push(relative);
    }

    Ok(report)
}

fn backup_name(relative: &str) -> String {
    format!("{relative}.bak.{}", Utc::now().format("%Y%m%d%H%M%S%3f"))
}
