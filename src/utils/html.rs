// src/utils/html.rs

use ammonia;

/// Clean HTML content using the ammonia library.
///
/// Imported post and comment bodies arrive as pre-rendered HTML from the
/// upstream dump. Safe tags (like <b>, <p>, <a>) are preserved; scripts,
/// iframes and event-handler attributes are stripped before storage.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

/// Like [`clean_html`], passing `None` through.
pub fn clean_optional_html(input: Option<&str>) -> Option<String> {
    input.map(clean_html)
}
