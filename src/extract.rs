//! Visible-text extraction from dashboard HTML.
//!
//! Pages mark the region worth indexing with a `data-ai-content` attribute.
//! Without it the `<main>` element is used, then `<body>`. The returned
//! string is the root's text content in document order, skipping
//! non-rendered containers such as `<script>` and `<style>`.

use scraper::{ElementRef, Html, Node, Selector};
use std::sync::LazyLock;

static AI_CONTENT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[data-ai-content]").expect("valid selector"));
static MAIN: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("main").expect("valid selector"));
static BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("valid selector"));

/// Elements whose text never reaches the screen.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Extracts the text content of the page's content root.
pub fn extract_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let doc = Html::parse_document(html);
    let root = content_root(&doc);
    text_content(root)
}

fn content_root(doc: &Html) -> ElementRef<'_> {
    doc.select(&AI_CONTENT)
        .next()
        .or_else(|| doc.select(&MAIN).next())
        .or_else(|| doc.select(&BODY).next())
        .unwrap_or_else(|| doc.root_element())
}

fn text_content(root: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in root.descendants() {
        if let Node::Text(text) = node.value() {
            let hidden = node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|e| SKIPPED_ELEMENTS.contains(&e.name()))
            });
            if !hidden {
                out.push_str(text);
            }
        }
    }
    out
}

/// Trims every line and collapses runs of blank lines into one.
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = true;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !blank_run {
                out.push('\n');
                blank_run = true;
            }
            continue;
        }
        out.push_str(line);
        out.push('\n');
        blank_run = false;
    }
    out.trim_end().to_string()
}
