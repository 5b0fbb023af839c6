//! Per-site extractors: pure functions from markup to records.
//!
//! Nothing in here touches the network. Every extractor takes the detail
//! page's URL and markup and returns a best-effort record; fields the page
//! does not carry come back as `None` or empty.

pub mod ece_staff;
pub mod faculty;
pub mod jobposting;
pub mod nuxt;
pub mod offer;
pub mod sections;

use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use super::cleaner::collapse_whitespace;

/// What an extractor made of one page.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted<T> {
    Record(T),
    /// Deliberately not a record (e.g. filtered staff category).
    Skipped(String),
}

// ── Selector helpers ──────────────────────────────────────────────────────────

pub fn parse_selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(sel) => Some(sel),
        Err(e) => {
            debug!("bad selector {:?}: {:?}", css, e);
            None
        }
    }
}

pub fn select_one<'a>(scope: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let sel = parse_selector(css)?;
    scope.select(&sel).next()
}

pub fn select_all<'a>(scope: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    match parse_selector(css) {
        Some(sel) => scope.select(&sel).collect(),
        None => Vec::new(),
    }
}

// ── Text helpers ──────────────────────────────────────────────────────────────

/// Trimmed, non-empty text fragments of `el` joined by `sep`.
pub fn text_joined(el: ElementRef<'_>, sep: &str) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}

/// Element text with whitespace collapsed to single spaces.
pub fn text_of(el: ElementRef<'_>) -> String {
    collapse_whitespace(&text_joined(el, " "))
}

/// Element text fragments glued without separators.
pub fn text_tight(el: ElementRef<'_>) -> String {
    text_joined(el, "")
}

pub fn is_named(el: ElementRef<'_>, names: &[&str]) -> bool {
    names.contains(&el.value().name())
}

pub fn has_class(el: ElementRef<'_>, class: &str) -> bool {
    el.value().classes().any(|c| c == class)
}

pub fn child_elements<'a>(el: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    el.children().filter_map(ElementRef::wrap)
}

pub fn next_element_sibling<'a>(el: ElementRef<'a>) -> Option<ElementRef<'a>> {
    el.next_siblings().find_map(ElementRef::wrap)
}

/// Whitespace-only text and comments.
pub fn is_blank_text(node: &Node) -> bool {
    match node {
        Node::Text(t) => t.trim().is_empty(),
        Node::Comment(_) => true,
        _ => false,
    }
}

/// First element named `name` after `el` in document order, skipping `el`'s
/// own subtree.
pub fn next_in_document<'a>(doc: &'a Html, el: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    let target = el.id();
    doc.root_element()
        .descendants()
        .skip_while(|n| n.id() != target)
        .skip(1)
        .filter(|n| !n.ancestors().any(|a| a.id() == target))
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == name)
}

/// Element that follows `el` in document order, its own children excluded.
pub fn following_element<'a>(doc: &'a Html, el: ElementRef<'a>) -> Option<ElementRef<'a>> {
    let target = el.id();
    doc.root_element()
        .descendants()
        .skip_while(|n| n.id() != target)
        .skip(1)
        .filter(|n| !n.ancestors().any(|a| a.id() == target))
        .find_map(ElementRef::wrap)
}

/// Resolve `href` against `base`; `None` for unparseable input.
pub fn absolute_url(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(href.trim()).ok().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_helpers_collapse_whitespace() {
        let doc = Html::parse_fragment("<div><p> Hello\n   <b>world</b> </p></div>");
        let p = select_one(doc.root_element(), "p").unwrap();
        assert_eq!(text_of(p), "Hello world");
        assert_eq!(text_tight(p), "Helloworld");
    }

    #[test]
    fn next_in_document_skips_own_subtree() {
        let doc = Html::parse_document(
            "<div id='a'><ul><li>inner</li></ul></div><p>x</p><ul><li>outer</li></ul>",
        );
        let div = select_one(doc.root_element(), "div#a").unwrap();
        let ul = next_in_document(&doc, div, "ul").unwrap();
        assert_eq!(text_of(ul), "outer");
    }

    #[test]
    fn absolute_url_joins_relative() {
        assert_eq!(
            absolute_url("https://cde.nus.edu.sg/ece/", "/ece/staff/jane/").as_deref(),
            Some("https://cde.nus.edu.sg/ece/staff/jane/")
        );
    }
}
