//! String literal escaping as `mysql_real_escape_string` does it.

/// Escape `text` for use between single quotes.
///
/// With `no_backslash_escapes` (the session's `NO_BACKSLASH_ESCAPES` mode)
/// a backslash is an ordinary character, so only `'` is doubled.
pub fn escape_string(text: &str, no_backslash_escapes: bool) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    if no_backslash_escapes {
        for c in text.chars() {
            if c == '\'' {
                out.push('\'');
            }
            out.push(c);
        }
        return out;
    }
    for c in text.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            '\\' | '\'' | '"' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}
