//! Recovery of rendered content for historical revisions.
//!
//! PmWiki only renders arbitrary markup through its edit preview, so an old
//! revision is recovered in two requests: open the edit form with the page
//! restored to that diff, then submit the restored markup back as a preview.

use anyhow::{Context, Result};
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::config::WikiConfig;
use crate::extract::extract_content_fragment;
use crate::session::WikiSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewSettings {
    pub author: String,
    pub preview_label: String,
    pub content_element_id: String,
}

impl PreviewSettings {
    pub fn from_config(config: &WikiConfig) -> Self {
        Self {
            author: config.preview_author(),
            preview_label: config.preview_label().to_string(),
            content_element_id: config.content_element_id().to_string(),
        }
    }
}

/// Fields captured from an edit form opened at a past revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditForm {
    pub basetime: Option<String>,
    pub markup: Option<String>,
}

/// Recover the rendered content of `page_name` at revision `diff`.
///
/// Returns `Ok(None)` when the wiki has nothing to render for this revision.
/// Transport failures and responses without the content container are
/// returned as errors.
pub fn fetch_revision_content<S: WikiSession>(
    session: &mut S,
    settings: &PreviewSettings,
    page_name: &str,
    diff: &str,
) -> Result<Option<String>> {
    debug!(page = page_name, diff, "replaying revision");
    let restore = format!("diff:{diff}:{diff}");
    let edit_page = session
        .get_page(
            &page_path(page_name),
            &[
                ("action", "edit".to_string()),
                ("restore", restore),
                ("preview", "y".to_string()),
            ],
        )
        .with_context(|| format!("failed to open edit form for {page_name} at {diff}"))?;

    let form = parse_edit_form(&edit_page);
    let Some(basetime) = form.basetime else {
        warn!(page = page_name, diff, "invalid revision: edit form has no basetime");
        return Ok(None);
    };
    let Some(markup) = form.markup else {
        warn!(page = page_name, diff, "invalid revision: edit form carries no markup");
        return Ok(None);
    };

    let preview = session
        .post_form(
            page_name,
            &[("action", "edit".to_string())],
            &[
                ("action", "edit".to_string()),
                ("n", page_name.to_string()),
                ("basetime", basetime),
                ("text", markup),
                ("csum", String::new()),
                ("author", settings.author.clone()),
                ("preview", settings.preview_label.clone()),
            ],
        )
        .with_context(|| format!("failed to submit preview for {page_name} at {diff}"))?;

    let content = extract_content_fragment(&preview, &settings.content_element_id)
        .with_context(|| format!("preview of {page_name} at {diff} has no rendered content"))?;
    Ok(Some(content))
}

/// `Group.Name` addresses the page at `Group/Name` below the wiki base.
pub fn page_path(page_name: &str) -> String {
    page_name.replace('.', "/")
}

pub fn parse_edit_form(html: &str) -> EditForm {
    let document = Html::parse_document(html);
    let basetime = Selector::parse(r#"input[name="basetime"]"#)
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .map(|input| input.value().attr("value").unwrap_or_default().to_string())
        });
    let markup = Selector::parse("textarea#text").ok().and_then(|selector| {
        document
            .select(&selector)
            .next()
            .map(|textarea| textarea.text().collect::<String>())
            .filter(|text| !text.is_empty())
    });
    EditForm { basetime, markup }
}
