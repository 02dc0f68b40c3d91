use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;

/// Marker appended to any field cut short by [`truncate_chars`].
pub const ELLIPSIS: &str = "...";

static NEWLINE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n+").expect("newline pattern is valid"));

/// Truncates a string to at most `max_chars` Unicode code points.
///
/// When truncation happens the first `max_chars` code points are kept and
/// [`ELLIPSIS`] is appended, so the result is `max_chars + 3` characters long.
/// Strings that already fit are returned borrowed.
///
/// # Examples
///
/// ```
/// use feedwatch::util::truncate_chars;
///
/// assert_eq!(truncate_chars("Short", 10), "Short");
/// assert_eq!(truncate_chars("Hello World", 5), "Hello...");
/// assert_eq!(truncate_chars("你好世界", 2), "你好...");
/// ```
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        // Cut before the (max_chars + 1)-th code point
        Some((cut, _)) => Cow::Owned(format!("{}{}", &s[..cut], ELLIPSIS)),
        None => Cow::Borrowed(s),
    }
}

/// Removes every markup tag and returns the concatenated text nodes.
///
/// Entities are decoded by the HTML parser, so `&amp;` becomes `&`.
/// Plain text without markup passes through unchanged.
pub fn strip_markup(html: &str) -> String {
    if !html.contains('<') && !html.contains('&') {
        return html.to_string();
    }
    let fragment = Html::parse_fragment(html);
    fragment.root_element().text().collect()
}

/// Collapses each run of consecutive `\n` characters into a single `\n`.
pub fn collapse_newlines(s: &str) -> Cow<'_, str> {
    NEWLINE_RUNS.replace_all(s, "\n")
}

/// Full description pipeline: strip markup, collapse newline runs, truncate.
pub fn clean_description(html: &str, max_chars: usize) -> String {
    let text = strip_markup(html);
    let text = collapse_newlines(&text);
    truncate_chars(&text, max_chars).into_owned()
}

/// Removes terminal control characters and ANSI escape sequences.
///
/// Tab, newline and carriage return are kept. CSI (`ESC [ ... final`) and
/// OSC (`ESC ] ... BEL` or `ESC ] ... ESC \\`) sequences are dropped whole.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    fn is_unsafe(c: char) -> bool {
        c.is_control() && !matches!(c, '\t' | '\n' | '\r')
    }

    if !s.chars().any(is_unsafe) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\x1b' {
            if !is_unsafe(c) {
                out.push(c);
            }
            continue;
        }
        match chars.peek() {
            Some('[') => {
                chars.next();
                // Parameters run until a final byte in @..~
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            Some(']') => {
                chars.next();
                while let Some(c) = chars.next() {
                    if c == '\x07' {
                        break;
                    }
                    if c == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    Cow::Owned(out)
}
