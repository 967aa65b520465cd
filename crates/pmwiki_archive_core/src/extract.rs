use scraper::node::Node;
use scraper::{ElementRef, Html};

use crate::error::ExtractError;

pub const DEFAULT_CONTENT_ELEMENT_ID: &str = "wikitext";

/// Serialize the children of the element with id `element_id`, one fragment
/// per child element, joined by newlines.
///
/// Text that follows a child element is kept with that element's fragment.
/// Text before the first child element belongs to no fragment and is dropped.
pub fn extract_content_fragment(html: &str, element_id: &str) -> Result<String, ExtractError> {
    let document = Html::parse_document(html);
    let container = find_by_id(&document, element_id).ok_or_else(|| {
        ExtractError::MissingContentContainer {
            element_id: element_id.to_string(),
        }
    })?;

    let mut fragments: Vec<String> = Vec::new();
    for child in container.children() {
        match child.value() {
            Node::Element(_) => {
                if let Some(element) = ElementRef::wrap(child) {
                    fragments.push(element.html());
                }
            }
            Node::Comment(comment) => fragments.push(format!("<!--{}-->", &*comment.comment)),
            Node::Text(text) => {
                if let Some(current) = fragments.last_mut() {
                    current.push_str(&escape_text(text));
                }
            }
            _ => {}
        }
    }
    Ok(fragments.join("\n"))
}

fn find_by_id<'a>(document: &'a Html, element_id: &str) -> Option<ElementRef<'a>> {
    document
        .tree
        .root()
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|element| element.value().id() == Some(element_id))
}

// Same escaping the HTML serializer applies to text nodes.
fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '\u{a0}' => escaped.push_str("&nbsp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preview_page(body: &str) -> String {
        format!(
            "<html><head><title>Main.Test</title></head><body><div id=\"wikihead\">search</div><div id=\"wikitext\">{body}</div><div id=\"wikifoot\">footer</div></body></html>"
        )
    }

    #[test]
    fn joins_child_elements_with_newlines() {
        let html = preview_page("<h2>Title</h2><p>First <a href=\"x\">link</a></p>");
        let fragment = extract_content_fragment(&html, DEFAULT_CONTENT_ELEMENT_ID).expect("extract");
        assert_eq!(fragment, "<h2>Title</h2>\n<p>First <a href=\"x\">link</a></p>");
    }

    #[test]
    fn trailing_text_stays_with_its_element() {
        let html = preview_page("lead <p>one</p> tail &amp; more<br>end");
        let fragment = extract_content_fragment(&html, DEFAULT_CONTENT_ELEMENT_ID).expect("extract");
        assert_eq!(fragment, "<p>one</p> tail &amp; more\n<br>end");
    }

    #[test]
    fn comments_are_kept_as_fragments() {
        let html = preview_page("<!--PageText--><p>body</p>");
        let fragment = extract_content_fragment(&html, DEFAULT_CONTENT_ELEMENT_ID).expect("extract");
        assert_eq!(fragment, "<!--PageText-->\n<p>body</p>");
    }

    #[test]
    fn empty_container_yields_empty_string() {
        let html = preview_page("");
        let fragment = extract_content_fragment(&html, DEFAULT_CONTENT_ELEMENT_ID).expect("extract");
        assert!(fragment.is_empty());
    }

    #[test]
    fn missing_container_is_reported() {
        let html = "<html><body><form action=\"?action=login\"><input name=\"authpw\"></form></body></html>";
        let error = extract_content_fragment(html, DEFAULT_CONTENT_ELEMENT_ID).expect_err("must fail");
        assert_eq!(
            error,
            ExtractError::MissingContentContainer {
                element_id: "wikitext".to_string()
            }
        );
    }

    #[test]
    fn custom_container_id() {
        let html = "<html><body><main id=\"content\"><p>x</p></main></body></html>";
        let fragment = extract_content_fragment(html, "content").expect("extract");
        assert_eq!(fragment, "<p>x</p>");
    }
}
