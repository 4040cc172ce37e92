const INDEX_HTML: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/index.html"));

/// Landing page served at `/`.
pub fn index_html() -> &'static str {
    INDEX_HTML
}
