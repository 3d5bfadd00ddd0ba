//! HTML to plain text for content previews.

use once_cell::sync::Lazy;
use regex::Regex;

static SCRIPT_OR_STYLE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").ok());

static BLOCK_TAG: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)</?(p|br|div|li|ul|ol|h[1-6]|tr|td|th|table|blockquote|pre|hr)\b[^>]*>").ok()
});

static ANY_TAG: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").ok());

static NUMERIC_ENTITY: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"&#(\d{1,7});").ok());

/// Removes markup from an HTML fragment and collapses whitespace.
///
/// Block-level tags become word breaks, inline tags disappear, and the
/// common named and decimal entities are decoded.
///
/// # Examples
///
/// ```
/// use lessonforge_codec::markup::strip_html;
///
/// assert_eq!(strip_html("<p>Hello <b>world</b></p>"), "Hello world");
/// assert_eq!(strip_html("a&lt;b"), "a<b");
/// ```
#[must_use]
pub fn strip_html(html: &str) -> String {
    let mut text = html.to_string();

    if let Some(re) = SCRIPT_OR_STYLE.as_ref() {
        text = re.replace_all(&text, " ").into_owned();
    }
    if let Some(re) = BLOCK_TAG.as_ref() {
        text = re.replace_all(&text, " ").into_owned();
    }
    if let Some(re) = ANY_TAG.as_ref() {
        text = re.replace_all(&text, "").into_owned();
    }
    if let Some(re) = NUMERIC_ENTITY.as_ref() {
        text = re
            .replace_all(&text, |caps: &regex::Captures<'_>| {
                caps[1]
                    .parse::<u32>()
                    .ok()
                    .and_then(char::from_u32)
                    .map_or_else(String::new, |c| c.to_string())
            })
            .into_owned();
    }

    // &amp; last so "&amp;lt;" stays "&lt;"
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&");

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_inline_and_block_tags() {
        insta::assert_snapshot!(
            strip_html("<h1>Intro</h1><p>Rust is <em>fast</em>&nbsp;and <a href=\"x\">safe</a>.</p>"),
            @"Intro Rust is fast and safe."
        );
    }

    #[test]
    fn test_strip_removes_scripts() {
        assert_eq!(
            strip_html("<p>before</p><script>alert('x')</script><p>after</p>"),
            "before after"
        );
        assert_eq!(strip_html("<STYLE>p { color: red }</STYLE>ok"), "ok");
    }

    #[test]
    fn test_strip_decodes_entities() {
        assert_eq!(strip_html("&quot;1 &lt; 2&quot; &amp; &#65;"), "\"1 < 2\" & A");
        assert_eq!(strip_html("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_strip_plain_text_is_unchanged() {
        assert_eq!(strip_html("no markup here"), "no markup here");
        assert_eq!(strip_html("   "), "");
    }

    #[test]
    fn test_line_breaks_become_spaces() {
        assert_eq!(strip_html("one<br>two<br/>three"), "one two three");
    }
}
