//! Normalization of scraped console output.
//!
//! Node consoles colour their output and wrap long binaries over several
//! lines, so every token comparison goes through [`normalize`] first.

use once_cell::sync::Lazy;
use regex::Regex;

/// CSI sequences: `ESC [`, parameter bytes, intermediate bytes, final byte.
static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\x1B\[[0-?]*[ -/]*[@-~]").expect("static ANSI pattern")
});

/// Opening delimiter of a printed binary.
pub const BINARY_OPEN: &str = "<<";
/// Closing delimiter of a printed binary.
pub const BINARY_CLOSE: &str = ">>";

/// Removes terminal escape sequences.
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Strips escape sequences and removes every whitespace character.
pub fn normalize(text: &str) -> String {
    strip_ansi(text)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Returns the first `<<...>>` region of `text`, delimiters included.
pub fn extract_binary(text: &str) -> Option<&str> {
    let start = text.find(BINARY_OPEN)?;
    let body = start + BINARY_OPEN.len();
    let end = text[body..].find(BINARY_CLOSE)? + body + BINARY_CLOSE.len();
    Some(&text[start..end])
}

/// Removes a leading console prompt (`iex(3)>`, `4>`) that shares a line
/// with the value being read.
pub fn strip_prompt<'a>(normalized: &'a str, prompt: &Regex) -> &'a str {
    match prompt.find(normalized) {
        Some(m) if m.start() == 0 => &normalized[m.end()..],
        _ => normalized,
    }
}
