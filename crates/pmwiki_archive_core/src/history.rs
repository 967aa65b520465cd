//! Reader for PmWiki `wiki.d` page files.
//!
//! A page file is a flat list of `key=value` lines. The page name sits on a
//! `name=` line and every stored revision contributes an
//! `author:<diff>=<author>` line, optionally followed by a
//! `csum:<diff>=<summary>` line carrying the edit comment.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::error::HistoryError;
use crate::model::{PageHistory, RevisionDescriptor};

const NAME_PREFIX: &str = "name=";
const AUTHOR_MARKER: &str = "author:";
const CSUM_MARKER: &str = "csum:";
const DIFF_ID_DIGITS: usize = 10;

/// Read a page file from disk. Bytes that are not UTF-8 are replaced rather
/// than rejected, since older installs store pages as Latin-1.
pub fn read_history_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn parse_history_record(text: &str) -> Result<PageHistory, HistoryError> {
    let name = parse_page_name(text).ok_or(HistoryError::MissingName)?;
    Ok(PageHistory {
        name,
        descriptors: parse_descriptors(text),
    })
}

fn parse_page_name(text: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.strip_prefix(NAME_PREFIX))
        .map(|value| value.trim_end_matches('\r').to_string())
        .filter(|value| !value.is_empty())
}

/// Collect descriptors in the order their `author:` lines appear.
pub fn parse_descriptors(text: &str) -> Vec<RevisionDescriptor> {
    let mut descriptors = Vec::new();
    let mut consumed = 0usize;
    for (start, _) in text.match_indices(AUTHOR_MARKER) {
        if start < consumed {
            continue;
        }
        let body_start = start + AUTHOR_MARKER.len();
        if let Some((descriptor, length)) = descriptor_at(&text[body_start..]) {
            descriptors.push(descriptor);
            consumed = body_start + length;
        }
    }
    descriptors
}

/// Parse `<diff>=<author><ws>[csum:<diff>=<comment>]` at the start of `rest`,
/// returning the descriptor and the number of bytes it spans.
fn descriptor_at(rest: &str) -> Option<(RevisionDescriptor, usize)> {
    let (diff_id, after_diff) = diff_id_at(rest)?;
    let author_len = rest[after_diff..]
        .find(|ch: char| !is_author_char(ch))
        .unwrap_or(rest.len() - after_diff);
    let author = &rest[after_diff..after_diff + author_len];

    let mut cursor = after_diff + author_len;
    let separator = rest[cursor..].chars().next()?;
    if !separator.is_whitespace() {
        return None;
    }
    cursor += separator.len_utf8();

    let comment = rest[cursor..].strip_prefix(CSUM_MARKER).and_then(|csum| {
        let (_, after_csum_diff) = diff_id_at(csum)?;
        let line = &csum[after_csum_diff..];
        let line_len = line.find('\n').unwrap_or(line.len());
        let consumed = CSUM_MARKER.len() + after_csum_diff + line_len;
        Some((line[..line_len].trim_end_matches('\r').to_string(), consumed))
    });
    let comment = comment.map(|(value, consumed)| {
        cursor += consumed;
        value
    });

    Some((
        RevisionDescriptor {
            diff_id,
            author: author.to_string(),
            comment,
        },
        cursor,
    ))
}

/// Parse exactly ten ASCII digits followed by `=`.
fn diff_id_at(rest: &str) -> Option<(u64, usize)> {
    let digits = rest.get(..DIFF_ID_DIGITS)?;
    if !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    if rest.as_bytes().get(DIFF_ID_DIGITS) != Some(&b'=') {
        return None;
    }
    let diff_id = digits.parse::<u64>().ok()?;
    Some((diff_id, DIFF_ID_DIGITS + 1))
}

fn is_author_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '/'
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn descriptor(diff_id: u64, author: &str, comment: Option<&str>) -> RevisionDescriptor {
        RevisionDescriptor {
            diff_id,
            author: author.to_string(),
            comment: comment.map(ToString::to_string),
        }
    }

    #[test]
    fn parses_name_and_descriptors() {
        let record = "name=Main.Test\nauthor:1000000001=alice\ncsum:1000000001=fix typo\nauthor:1000000002=bob\n";
        let history = parse_history_record(record).expect("parse");
        assert_eq!(history.name, "Main.Test");
        assert_eq!(
            history.descriptors,
            vec![
                descriptor(1000000001, "alice", Some("fix typo")),
                descriptor(1000000002, "bob", None),
            ]
        );
    }

    #[test]
    fn keeps_appearance_order_over_numeric_order() {
        let record = "name=Main.Order\nauthor:1300000000=carol\nauthor:1100000000=alice\nauthor:1200000000=bob\n";
        let diffs = parse_history_record(record)
            .expect("parse")
            .descriptors
            .into_iter()
            .map(|item| item.diff_id)
            .collect::<Vec<_>>();
        assert_eq!(diffs, vec![1300000000, 1100000000, 1200000000]);
    }

    #[test]
    fn missing_name_is_an_error() {
        let record = "version=pmwiki-2.2.0\nauthor:1000000001=alice\n";
        assert_eq!(
            parse_history_record(record),
            Err(HistoryError::MissingName)
        );
        assert_eq!(
            parse_history_record("name=\nauthor:1000000001=alice\n"),
            Err(HistoryError::MissingName)
        );
    }

    #[test]
    fn record_without_revisions_is_empty() {
        let history = parse_history_record("name=Main.Empty\ntext=hello\n").expect("parse");
        assert_eq!(history.name, "Main.Empty");
        assert!(history.descriptors.is_empty());
    }

    #[test]
    fn realistic_page_file() {
        let record = concat!(
            "version=pmwiki-2.2.0 ordered=1 urlencoded=1\n",
            "author=bob\n",
            "charset=ISO-8859-1\n",
            "csum=latest\n",
            "name=Profiles.Bob\n",
            "rev=2\n",
            "targets=\n",
            "text=Hello\n",
            "time=1200000000\n",
            "author:1200000000=bob\n",
            "csum:1200000000=latest\n",
            "diff:1200000000:1100000000:=1c1%0a< Hi%0a---%0a> Hello%0a\n",
            "host:1200000000=127.0.0.1\n",
            "author:1100000000=Main/Alice\n",
            "diff:1100000000:1100000000:=1d0%0a< Hi%0a\n",
        );
        let history = parse_history_record(record).expect("parse");
        assert_eq!(history.name, "Profiles.Bob");
        assert_eq!(
            history.descriptors,
            vec![
                descriptor(1200000000, "bob", Some("latest")),
                descriptor(1100000000, "Main/Alice", None),
            ]
        );
    }

    #[test]
    fn author_followed_by_other_characters_is_not_a_descriptor() {
        let record = "name=Main.Dots\nauthor:1000000001=a.b\nauthor:1000000002=carl\n";
        let history = parse_history_record(record).expect("parse");
        assert_eq!(history.descriptors, vec![descriptor(1000000002, "carl", None)]);
    }

    #[test]
    fn last_author_line_needs_trailing_whitespace() {
        let history = parse_history_record("name=Main.Tail\nauthor:1000000001=alice").expect("parse");
        assert!(history.descriptors.is_empty());
    }

    #[test]
    fn empty_author_and_empty_comment_are_kept() {
        let record = "name=Main.Anon\nauthor:1000000001=\ncsum:1000000001=\n";
        let history = parse_history_record(record).expect("parse");
        assert_eq!(history.descriptors, vec![descriptor(1000000001, "", Some(""))]);
    }

    #[test]
    fn crlf_line_endings_are_tolerated() {
        let record = "name=Main.Win\r\nauthor:1000000001=alice csum:1000000001=inline\r\n";
        let history = parse_history_record(record).expect("parse");
        assert_eq!(history.name, "Main.Win");
        assert_eq!(
            history.descriptors,
            vec![descriptor(1000000001, "alice", Some("inline"))]
        );
    }

    #[test]
    fn short_diff_ids_are_ignored() {
        let history =
            parse_history_record("name=Main.Short\nauthor:12345=alice\n").expect("parse");
        assert!(history.descriptors.is_empty());
    }

    #[test]
    fn read_history_file_tolerates_latin1() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("Main.Latin");
        fs::write(&path, b"name=Main.Latin\nauthor:1000000001=alice\ncsum:1000000001=f\xf6rsta\n")
            .expect("write");
        let text = read_history_file(&path).expect("read");
        let history = parse_history_record(&text).expect("parse");
        assert_eq!(history.descriptors.len(), 1);
        assert_eq!(history.descriptors[0].comment.as_deref(), Some("f\u{fffd}rsta"));
    }
}
