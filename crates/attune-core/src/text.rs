//! Input/output sanitization helpers.
//!
//! Orchestration strips control characters from untrusted text before any
//! other processing: NUL and the remaining C0 range (except `\t`, `\n`,
//! `\r`), plus the C1 range (U+0080–U+009F). Blank detection runs on the
//! sanitized form, so control-only input counts as empty.

/// True for characters that must never survive sanitization.
///
/// C0 controls other than tab/newline/carriage-return, DEL, and the C1
/// block are stripped. Ordinary whitespace is preserved.
#[inline]
fn is_stripped_control(c: char) -> bool {
    match c {
        '\t' | '\n' | '\r' => false,
        '\u{00}'..='\u{1F}' | '\u{7F}' | '\u{80}'..='\u{9F}' => true,
        _ => false,
    }
}

/// Remove NUL and other C0/C1 control characters from `s`.
///
/// Intended whitespace (`\t`, `\n`, `\r`) is preserved. Returns the input
/// unchanged (no allocation beyond the copy) when nothing needs stripping.
#[must_use]
pub fn sanitize(s: &str) -> String {
    s.chars().filter(|c| !is_stripped_control(*c)).collect()
}

/// Whether `s` is empty or whitespace-only.
///
/// Callers sanitize first; a string of control characters therefore reads
/// as blank.
#[must_use]
pub fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── sanitize ─────────────────────────────────────────────────────────

    #[test]
    fn plain_text_unchanged() {
        assert_eq!(sanitize("hello world"), "hello world");
    }

    #[test]
    fn strips_nul() {
        assert_eq!(sanitize("he\0llo"), "hello");
    }

    #[test]
    fn strips_c0_controls() {
        assert_eq!(sanitize("a\u{01}b\u{08}c\u{1B}d"), "abcd");
    }

    #[test]
    fn strips_del_and_c1() {
        assert_eq!(sanitize("a\u{7F}b\u{85}c\u{9F}d"), "abcd");
    }

    #[test]
    fn preserves_intended_whitespace() {
        assert_eq!(sanitize("line1\nline2\tend\r\n"), "line1\nline2\tend\r\n");
    }

    #[test]
    fn preserves_unicode_text() {
        assert_eq!(sanitize("café — 🦀"), "café — 🦀");
    }

    #[test]
    fn control_only_becomes_empty() {
        assert_eq!(sanitize("\0\u{01}\u{02}\u{9C}"), "");
    }

    // ── is_blank ─────────────────────────────────────────────────────────

    #[test]
    fn empty_is_blank() {
        assert!(is_blank(""));
    }

    #[test]
    fn whitespace_only_is_blank() {
        assert!(is_blank("   \t\n  "));
    }

    #[test]
    fn text_is_not_blank() {
        assert!(!is_blank("  x  "));
    }

    #[test]
    fn sanitized_control_input_is_blank() {
        assert!(is_blank(&sanitize("\0\u{07}\u{1B}")));
    }
}
