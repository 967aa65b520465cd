use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::HistoryError;
use crate::fetch::{PreviewSettings, fetch_revision_content};
use crate::history::{parse_history_record, read_history_file};
use crate::model::{Page, PageHistory, Revision, write_page_archive};
use crate::runtime::normalize_for_display;
use crate::session::WikiSession;

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub namespaces: BTreeSet<String>,
    pub ignored_names: BTreeSet<String>,
    /// Number of sorted directory entries to skip before filtering.
    pub start_offset: usize,
}

/// A regular file (or link to one) in the source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// File name for matching and display. Bytes that are not UTF-8 are replaced.
    pub file_name: String,
    /// On-disk path, kept byte-exact for reading.
    pub path: PathBuf,
}

/// A `wiki.d` file named `<namespace>.<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFile {
    pub file_name: String,
    pub namespace: String,
    pub name: String,
}

impl PageFile {
    /// Returns `None` unless the file is a live page in an eligible namespace.
    /// Names with a comma are deleted-page variants (`Main.Old,del-1200000000`).
    pub fn classify(file_name: &str, options: &ConvertOptions) -> Option<Self> {
        if file_name.contains(',') {
            return None;
        }
        let (namespace, name) = file_name.split_once('.')?;
        if !options.namespaces.contains(namespace) || options.ignored_names.contains(name) {
            return None;
        }
        Some(Self {
            file_name: file_name.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    pub fn output_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.namespace).join(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Pending,
    Converted,
}

#[derive(Debug, Clone)]
pub struct PlannedPage {
    pub page: PageFile,
    pub state: PageState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageAction {
    Converted,
    AlreadyConverted,
    MissingName,
}

impl PageAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Converted => "converted",
            Self::AlreadyConverted => "already_converted",
            Self::MissingName => "missing_name",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    pub file_name: String,
    pub action: PageAction,
    pub revisions: usize,
    pub recovered: usize,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConvertReport {
    pub scanned_entries: usize,
    pub eligible_pages: usize,
    pub converted: usize,
    pub already_converted: usize,
    pub skipped_missing_name: usize,
    pub revisions_total: usize,
    pub revisions_recovered: usize,
    pub revisions_missing: usize,
    pub pages: Vec<PageResult>,
    pub request_count: usize,
}

/// Files of the source directory sorted by name, with the first `start_offset` removed.
pub fn list_source_entries(options: &ConvertOptions) -> Result<Vec<SourceEntry>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(&options.source_dir)
        .min_depth(1)
        .max_depth(1)
    {
        let entry = entry.with_context(|| {
            format!(
                "failed to list {}",
                normalize_for_display(&options.source_dir)
            )
        })?;
        // `Path::is_file` follows symlinks; broken links are skipped.
        if !entry.path().is_file() {
            continue;
        }
        entries.push(SourceEntry {
            file_name: entry.file_name().to_string_lossy().into_owned(),
            path: entry.into_path(),
        });
    }
    entries.sort_by(|left, right| left.path.cmp(&right.path));
    Ok(entries.into_iter().skip(options.start_offset).collect())
}

/// Eligible pages in processing order together with their conversion state.
pub fn plan_pages(options: &ConvertOptions) -> Result<Vec<PlannedPage>> {
    let entries = list_source_entries(options)?;
    Ok(entries
        .iter()
        .filter_map(|entry| PageFile::classify(&entry.file_name, options))
        .map(|page| {
            let state = if page.output_path(&options.output_dir).exists() {
                PageState::Converted
            } else {
                PageState::Pending
            };
            PlannedPage { page, state }
        })
        .collect())
}

/// Replay every revision of a parsed history, in record order.
pub fn recover_page<S: WikiSession>(
    session: &mut S,
    settings: &PreviewSettings,
    history: PageHistory,
) -> Result<Page> {
    let PageHistory { name, descriptors } = history;
    let mut revisions = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let diff = descriptor.diff_id.to_string();
        let content = fetch_revision_content(session, settings, &name, &diff)?;
        revisions.push(Revision::from_descriptor(descriptor, content));
    }
    Ok(Page { name, revisions })
}

/// Convert every eligible page of `options.source_dir` that has no archive yet.
///
/// Pages whose record lacks a name are reported and left without output so a
/// later run retries them. Any error from the wiki aborts the run; pages
/// finished before the failure keep their archives.
pub fn convert_pages<S: WikiSession>(
    session: &mut S,
    settings: &PreviewSettings,
    options: &ConvertOptions,
) -> Result<ConvertReport> {
    ensure_output_layout(options)?;

    let entries = list_source_entries(options)?;
    let mut report = ConvertReport {
        scanned_entries: entries.len(),
        ..ConvertReport::default()
    };

    for entry in &entries {
        let file_name = &entry.file_name;
        let Some(page) = PageFile::classify(file_name, options) else {
            continue;
        };
        report.eligible_pages += 1;

        let output_path = page.output_path(&options.output_dir);
        if output_path.exists() {
            info!(
                "{} is already converted; remove it to convert the page again",
                normalize_for_display(&output_path)
            );
            report.already_converted += 1;
            report.pages.push(PageResult {
                file_name: file_name.clone(),
                action: PageAction::AlreadyConverted,
                revisions: 0,
                recovered: 0,
                detail: None,
            });
            continue;
        }

        let record = read_history_file(&entry.path)?;
        let history = match parse_history_record(&record) {
            Ok(history) => history,
            Err(HistoryError::MissingName) => {
                warn!(file = %file_name, "history record has no page name; skipping");
                report.skipped_missing_name += 1;
                report.pages.push(PageResult {
                    file_name: file_name.clone(),
                    action: PageAction::MissingName,
                    revisions: 0,
                    recovered: 0,
                    detail: Some(HistoryError::MissingName.to_string()),
                });
                continue;
            }
        };

        info!(
            page = %history.name,
            revisions = history.descriptors.len(),
            "converting"
        );
        let converted = recover_page(session, settings, history)
            .with_context(|| format!("conversion of {file_name} aborted"))?;
        let recovered = converted.recovered_count();
        let total = converted.revisions.len();

        if !write_page_archive(&output_path, &converted.revisions)? {
            warn!(
                "{} appeared during conversion; keeping the existing archive",
                normalize_for_display(&output_path)
            );
            report.already_converted += 1;
            report.pages.push(PageResult {
                file_name: file_name.clone(),
                action: PageAction::AlreadyConverted,
                revisions: 0,
                recovered: 0,
                detail: Some("archive written concurrently".to_string()),
            });
            continue;
        }

        report.converted += 1;
        report.revisions_total += total;
        report.revisions_recovered += recovered;
        report.revisions_missing += total - recovered;
        report.pages.push(PageResult {
            file_name: file_name.clone(),
            action: PageAction::Converted,
            revisions: total,
            recovered,
            detail: if recovered < total {
                Some(format!("{} revision(s) without content", total - recovered))
            } else {
                None
            },
        });
    }

    report.request_count = session.request_count();
    Ok(report)
}

fn ensure_output_layout(options: &ConvertOptions) -> Result<()> {
    let mut dirs = vec![options.output_dir.clone()];
    dirs.extend(
        options
            .namespaces
            .iter()
            .map(|namespace| options.output_dir.join(namespace)),
    );
    for dir in dirs {
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", normalize_for_display(&dir)))?;
    }
    Ok(())
}
