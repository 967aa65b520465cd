use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;

/// One entry of a page's revision history as recorded in its `wiki.d` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevisionDescriptor {
    #[serde(rename = "diff")]
    pub diff_id: u64,
    pub author: String,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    #[serde(rename = "diff")]
    pub diff_id: u64,
    pub author: String,
    pub comment: Option<String>,
    pub content: Option<String>,
}

impl Revision {
    pub fn from_descriptor(descriptor: RevisionDescriptor, content: Option<String>) -> Self {
        Self {
            diff_id: descriptor.diff_id,
            author: descriptor.author,
            comment: descriptor.comment,
            content,
        }
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }
}

/// Parsed history record: the page name plus descriptors in appearance order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageHistory {
    pub name: String,
    pub descriptors: Vec<RevisionDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub name: String,
    pub revisions: Vec<Revision>,
}

impl Page {
    pub fn recovered_count(&self) -> usize {
        self.revisions
            .iter()
            .filter(|revision| revision.has_content())
            .count()
    }
}

/// Render revisions as a JSON array with sorted keys and 4-space indentation.
pub fn render_revisions_json(revisions: &[Revision]) -> Result<String> {
    // Going through `Value` sorts object keys (serde_json's map is a BTreeMap).
    let value = serde_json::to_value(revisions).context("failed to encode revisions")?;
    let mut buffer = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value
        .serialize(&mut serializer)
        .context("failed to serialize revisions")?;
    String::from_utf8(buffer).context("serialized revisions are not valid UTF-8")
}

/// Write a page archive to `path` unless something already exists there.
///
/// The document is staged in a temporary file next to `path` and moved into
/// place without clobbering, so `path` either holds a complete archive or does
/// not exist. Returns `false` when `path` was already taken.
pub fn write_page_archive(path: &Path, revisions: &[Revision]) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    let rendered = render_revisions_json(revisions)?;
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("archive path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let mut staged = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to stage archive in {}", parent.display()))?;
    staged
        .write_all(rendered.as_bytes())
        .with_context(|| format!("failed to write staged archive for {}", path.display()))?;
    match staged.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(error) if error.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(error) => {
            Err(error.error).with_context(|| format!("failed to persist {}", path.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn revision(diff_id: u64, content: Option<&str>) -> Revision {
        Revision {
            diff_id,
            author: "alice".to_string(),
            comment: None,
            content: content.map(ToString::to_string),
        }
    }

    #[test]
    fn has_content_tracks_the_optional_field() {
        assert!(revision(1, Some("")).has_content());
        assert!(!revision(1, None).has_content());
    }

    #[test]
    fn rendered_json_sorts_keys_and_indents_four_spaces() {
        let rendered = render_revisions_json(&[revision(1000000001, Some("<p>hi</p>"))])
            .expect("render");
        let expected = "[\n    {\n        \"author\": \"alice\",\n        \"comment\": null,\n        \"content\": \"<p>hi</p>\",\n        \"diff\": 1000000001\n    }\n]";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn empty_history_renders_empty_array() {
        assert_eq!(render_revisions_json(&[]).expect("render"), "[]");
    }

    #[test]
    fn write_page_archive_never_overwrites() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("Main").join("Test");

        assert!(write_page_archive(&path, &[revision(1, Some("first"))]).expect("first write"));
        assert!(!write_page_archive(&path, &[revision(2, Some("second"))]).expect("second write"));

        let stored: Vec<Revision> =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("decode");
        assert_eq!(stored, vec![revision(1, Some("first"))]);
        let leftovers = fs::read_dir(temp.path().join("Main"))
            .expect("read dir")
            .count();
        assert_eq!(leftovers, 1);
    }
}
