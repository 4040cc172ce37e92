//! Text extraction from fetched markup.
//!
//! Two modes:
//! - With a CSS selector: text of the first 50 matches, labeled `Item N`
//! - Without: the first 20 common text-bearing tags, keeping only texts
//!   longer than 10 characters, labeled `Text N`
//!
//! `N` is the 1-based position of the match, so skipped matches leave gaps.
use scraper::{ElementRef, Html, Selector};

use crate::types::{ErrorCode, ExtractedField, WebFetchError};

pub const MAX_SELECTOR_MATCHES: usize = 50;
pub const MAX_DEFAULT_MATCHES: usize = 20;

/// Default-scan texts must be longer than this many characters.
pub const MIN_DEFAULT_TEXT_CHARS: usize = 10;

pub const DEFAULT_TAGS: &[&str] = &["p", "h1", "h2", "h3", "h4", "span", "div", "li"];

pub const PREVIEW_CHARS: usize = 500;
const PREVIEW_ELLIPSIS: &str = "...";

#[derive(Debug, Clone)]
pub struct Extraction {
    pub fields: Vec<ExtractedField>,
    pub preview: String,
}

/// Parse `html` and extract labeled text. An empty `selector` selects the
/// default tag scan.
pub fn extract(html: &str, selector: &str) -> Result<Extraction, WebFetchError> {
    let document = Html::parse_document(html);
    let selector = selector.trim();

    let fields = if selector.is_empty() {
        default_scan(&document)
    } else {
        let parsed = Selector::parse(selector).map_err(|e| {
            WebFetchError::new(
                ErrorCode::InvalidSelector,
                format!("invalid selector: {e}"),
                false,
            )
            .with_detail("selector", selector)
        })?;
        select_matches(&document, &parsed)
    };

    Ok(Extraction {
        fields,
        preview: preview(&document),
    })
}

fn select_matches(document: &Html, selector: &Selector) -> Vec<ExtractedField> {
    document
        .select(selector)
        .take(MAX_SELECTOR_MATCHES)
        .enumerate()
        .filter_map(|(i, element)| {
            let text = stripped_text(element);
            (!text.is_empty()).then(|| ExtractedField {
                field: format!("Item {}", i + 1),
                value: text,
            })
        })
        .collect()
}

fn default_scan(document: &Html) -> Vec<ExtractedField> {
    let Ok(selector) = Selector::parse(&DEFAULT_TAGS.join(", ")) else {
        return Vec::new();
    };

    document
        .select(&selector)
        .take(MAX_DEFAULT_MATCHES)
        .enumerate()
        .filter_map(|(i, element)| {
            let text = stripped_text(element);
            (text.chars().count() > MIN_DEFAULT_TEXT_CHARS).then(|| ExtractedField {
                field: format!("Text {}", i + 1),
                value: text,
            })
        })
        .collect()
}

/// Descendant text nodes, each trimmed, empty ones dropped, joined without
/// a separator.
fn stripped_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn preview(document: &Html) -> String {
    let mut preview: String = document.html().chars().take(PREVIEW_CHARS).collect();
    preview.push_str(PREVIEW_ELLIPSIS);
    preview
}
