use anyhow::Result;
use ego_tree::NodeRef;
use scraper::{Html, Node, Selector};
use serde_json::Value;

use crate::error::ArchiverError;

/// The first post of a thread, extracted from the thread page.
#[derive(Debug, Clone)]
pub struct PostContent {
    /// Plain text of the post body.
    pub body: String,
    /// Sanitized HTML of the post body (ids and classes stripped).
    pub html: String,
    /// Every outbound URL found in the body, in document order.
    pub urls: Vec<String>,
}

/// Extract the thread-starter post from a thread page.
///
/// # Errors
///
/// Returns [`ArchiverError::Parse`] when the page has no starter post body.
pub fn parse_post_content(page: &str) -> Result<PostContent> {
    let document = Html::parse_document(page);
    let selector =
        Selector::parse(".message-threadStarterPost .message-content .bbWrapper")
            .expect("valid selector");
    let wrapper = document
        .select(&selector)
        .next()
        .ok_or_else(|| ArchiverError::parse("thread page", "no starter post body"))?;

    let body = wrapper.text().collect::<String>().trim().to_string();
    let html = sanitize_html(*wrapper);

    let mut urls = Vec::new();
    collect_urls(*wrapper, &mut urls);

    Ok(PostContent { body, html, urls })
}

/// Serialize an element subtree while dropping `id` and `class` attributes,
/// so stored HTML stays stable across forum theme changes.
fn sanitize_html(node: NodeRef<'_, Node>) -> String {
    let mut out = String::new();
    write_node(node, &mut out);
    out
}

fn write_node(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Element(el) => {
            out.push('<');
            out.push_str(el.name());
            for (key, value) in &el.attrs {
                let name = key.local.as_ref();
                if name == "id" || name == "class" {
                    continue;
                }
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&html_escape(value));
                out.push('"');
            }
            out.push('>');
            for child in node.children() {
                write_node(child, out);
            }
            out.push_str("</");
            out.push_str(el.name());
            out.push('>');
        }
        Node::Text(text) => out.push_str(&html_escape(text)),
        _ => {
            for child in node.children() {
                write_node(child, out);
            }
        }
    }
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Walk the body collecting link hrefs, iframe srcs, and media-embed srcs.
fn collect_urls(node: NodeRef<'_, Node>, urls: &mut Vec<String>) {
    if let Node::Element(el) = node.value() {
        match el.name() {
            "a" => {
                if let Some(href) = el.attr("href") {
                    push_url(urls, href);
                }
            }
            "iframe" => {
                if let Some(src) = el.attr("src") {
                    push_url(urls, src);
                }
            }
            _ => {}
        }
        if let Some(embed) = el.attr("data-s9e-mediaembed-iframe") {
            if let Some(src) = mediaembed_src(embed) {
                push_url(urls, &src);
            }
        }
    }
    for child in node.children() {
        collect_urls(child, urls);
    }
}

fn push_url(urls: &mut Vec<String>, url: &str) {
    let url = url.trim();
    if url.is_empty() || url.starts_with('#') {
        return;
    }
    urls.push(url.to_string());
}

/// The s9e media embed attribute is a flattened JSON array of alternating
/// attribute names and values; `src` carries the embedded player URL.
fn mediaembed_src(attr: &str) -> Option<String> {
    let values: Vec<Value> = serde_json::from_str(attr).ok()?;
    for pair in values.chunks(2) {
        if let [Value::String(key), Value::String(value)] = pair {
            if key == "src" {
                return Some(value.clone());
            }
        }
    }
    None
}
