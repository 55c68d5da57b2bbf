// crates/core/src/collector.rs
//! Output collector: turns the analysis tool's output directory into a
//! document batch.
//!
//! Layout under `<repo_path>/.docwright/output/`:
//!   data/*.json            — ordered structured analysis files (kind=data)
//!   index.md               — optional table of contents (kind=index)
//!   chapters/raw/*.md      — ordered content files per stage
//!   chapters/reviewed/*.md
//!   chapters/final/*.md
//!
//! A missing directory contributes zero documents. Unreadable or malformed
//! files become warnings, never errors; partial output still completes the
//! job.

use std::path::Path;

use walkdir::WalkDir;

use crate::document::{normalize_slug, source_key, DocumentKind, NewDocument};

/// Output directory the analysis tool writes into, relative to the repo.
pub const OUTPUT_DIR: &str = ".docwright/output";

/// The three content stages, in pipeline order.
const CONTENT_STAGES: &[&str] = &["raw", "reviewed", "final"];

/// Result of scanning one run's output.
#[derive(Debug, Default)]
pub struct CollectedOutput {
    pub documents: Vec<NewDocument>,
    pub warnings: Vec<String>,
}

/// Scan the fixed output directory and build the document batch for
/// reconciliation. `repository` scopes every source key.
pub fn collect_output(repo_path: &Path, repository: &str) -> CollectedOutput {
    let output_root = repo_path.join(OUTPUT_DIR);
    let mut collected = CollectedOutput::default();

    collect_data_files(&output_root, repository, &mut collected);
    collect_index(&output_root, repository, &mut collected);
    for stage in CONTENT_STAGES {
        collect_stage(&output_root, stage, repository, &mut collected);
    }

    collected
}

/// Sorted, non-recursive listing of one directory. Missing directory = empty.
fn sorted_files(dir: &Path, extension: &str) -> Vec<walkdir::DirEntry> {
    if !dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_type().is_file()
                && e.path()
                    .extension()
                    .map(|ext| ext == extension)
                    .unwrap_or(false)
        })
        .collect()
}

fn collect_data_files(output_root: &Path, repository: &str, out: &mut CollectedOutput) {
    for entry in sorted_files(&output_root.join("data"), "json") {
        let path = entry.path();
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                out.warnings
                    .push(format!("unreadable data file {}: {e}", path.display()));
                continue;
            }
        };
        if serde_json::from_str::<serde_json::Value>(&content).is_err() {
            out.warnings
                .push(format!("malformed JSON in {}", path.display()));
            continue;
        }
        let stem = file_stem(path);
        let slug = format!("data/{}", normalize_slug(&stem));
        let title = humanize_stem(&stem);
        out.documents.push(NewDocument {
            source_key: source_key(repository, &slug, &title),
            slug,
            title,
            kind: DocumentKind::Data,
            content,
            chapter_index: None,
        });
    }
}

fn collect_index(output_root: &Path, repository: &str, out: &mut CollectedOutput) {
    let path = output_root.join("index.md");
    if !path.is_file() {
        return;
    }
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let title = heading_title(&content).unwrap_or_else(|| "Index".to_string());
            out.documents.push(NewDocument {
                source_key: source_key(repository, "index", &title),
                slug: "index".to_string(),
                title,
                kind: DocumentKind::Index,
                content,
                chapter_index: None,
            });
        }
        Err(e) => out
            .warnings
            .push(format!("unreadable index {}: {e}", path.display())),
    }
}

fn collect_stage(output_root: &Path, stage: &str, repository: &str, out: &mut CollectedOutput) {
    let dir = output_root.join("chapters").join(stage);
    for (position, entry) in sorted_files(&dir, "md").into_iter().enumerate() {
        let path = entry.path();
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                out.warnings
                    .push(format!("unreadable chapter {}: {e}", path.display()));
                continue;
            }
        };
        let stem = file_stem(path);
        let bare = strip_numeric_prefix(&stem);
        let kind = if bare.starts_with("tutorial") {
            DocumentKind::Tutorial
        } else {
            DocumentKind::Article
        };
        let slug = format!("{stage}/{}", normalize_slug(bare));
        let title = heading_title(&content).unwrap_or_else(|| humanize_stem(bare));
        out.documents.push(NewDocument {
            source_key: source_key(repository, &slug, &title),
            slug,
            title,
            kind,
            content,
            chapter_index: Some(position as u32),
        });
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// "01-getting-started" → "getting-started".
fn strip_numeric_prefix(stem: &str) -> &str {
    let rest = stem.trim_start_matches(|c: char| c.is_ascii_digit());
    let stripped = rest.trim_start_matches(['-', '_', '.']);
    if stripped.is_empty() {
        stem
    } else {
        stripped
    }
}

/// Title from the first markdown heading line, if any.
fn heading_title(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let line = line.trim();
        let stripped = line.trim_start_matches('#');
        if stripped.len() < line.len() {
            let title = stripped.trim();
            (!title.is_empty()).then(|| title.to_string())
        } else {
            None
        }
    })
}

/// Filename-derived fallback title: "getting-started" → "Getting started".
fn humanize_stem(stem: &str) -> String {
    let spaced = strip_numeric_prefix(stem).replace(['-', '_'], " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => spaced,
    }
}
