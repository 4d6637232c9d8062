use once_cell::sync::Lazy;
use regex::Regex;

static MULTI_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").expect("space regex"));

/// First `max_chars` characters of the trimmed text, with `...` appended when cut.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    let mut chars = text.char_indices();
    match chars.nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

pub fn collapse_spaces(text: &str) -> String {
    MULTI_SPACE_RE.replace_all(text, " ").into_owned()
}

/// Strips leading/trailing whitespace from every line, keeping the line breaks (`\n` or `\r\n`).
pub fn trim_lines(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let last = lines.len() - 1;
    let mut out = String::with_capacity(text.len());
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line.trim());
        if i < last && line.ends_with('\r') {
            out.push('\r');
        }
    }
    out
}

/// Removes one pair of matching quotes wrapping the whole string (model replies often quote).
pub fn strip_wrapping_quotes(text: &str) -> &str {
    let t = text.trim();
    for (open, close) in [('"', '"'), ('\'', '\''), ('“', '”'), ('«', '»')] {
        if t.len() >= open.len_utf8() + close.len_utf8() && t.starts_with(open) && t.ends_with(close) {
            return t[open.len_utf8()..t.len() - close.len_utf8()].trim();
        }
    }
    t
}
