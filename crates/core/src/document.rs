// crates/core/src/document.rs
//! Document model and the source-key identity that survives regeneration.

use serde::{Deserialize, Serialize};

/// What kind of artifact a document is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Structured analysis output (serialized JSON).
    Data,
    /// A generated chapter.
    Article,
    /// A generated tutorial chapter.
    Tutorial,
    /// The table-of-contents / landing document.
    Index,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Data => "data",
            DocumentKind::Article => "article",
            DocumentKind::Tutorial => "tutorial",
            DocumentKind::Index => "index",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "article" => DocumentKind::Article,
            "tutorial" => DocumentKind::Tutorial,
            "index" => DocumentKind::Index,
            _ => DocumentKind::Data,
        }
    }

    /// Articles and tutorials must carry non-empty content; data and index
    /// documents may legitimately be thin.
    pub fn requires_content(self) -> bool {
        matches!(self, DocumentKind::Article | DocumentKind::Tutorial)
    }
}

/// A document produced by one run, before it is reconciled into the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    pub source_key: String,
    pub slug: String,
    pub title: String,
    pub kind: DocumentKind,
    pub content: String,
    pub chapter_index: Option<u32>,
}

/// Normalize a slug: lowercase, non-alphanumerics collapsed to single
/// hyphens, no leading/trailing hyphens. Path separators survive as
/// segment boundaries so stage prefixes stay distinct ("final/intro").
pub fn normalize_slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for segment in raw.split('/').filter(|s| !s.is_empty()) {
        if !out.is_empty() {
            out.push('/');
        }
        let mut prev_hyphen = true; // suppress leading hyphen
        for ch in segment.chars() {
            if ch.is_ascii_alphanumeric() {
                out.extend(ch.to_lowercase());
                prev_hyphen = false;
            } else if !prev_hyphen {
                out.push('-');
                prev_hyphen = true;
            }
        }
        while out.ends_with('-') {
            out.pop();
        }
    }
    out
}

/// Stable document identity: repository plus normalized slug, falling back
/// to a slug derived from the title when the slug is empty. Survives
/// regeneration because it carries no run- or job-specific parts.
pub fn source_key(repository: &str, slug: &str, title: &str) -> String {
    let normalized = normalize_slug(slug);
    let key = if normalized.is_empty() {
        normalize_slug(title)
    } else {
        normalized
    };
    format!("{repository}:{key}")
}
