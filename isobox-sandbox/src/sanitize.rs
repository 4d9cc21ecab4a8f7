//! Escaping for code embedded inside a generated template literal

/// Escape `code` so it can sit between backticks in generated source.
///
/// Every backtick becomes `` \` `` and every `${` becomes `\${`. Nothing else
/// is touched. Apply once: running it over its own output escapes again.
pub fn sanitize_for_embedding(code: &str) -> String {
    let mut out = String::with_capacity(code.len() + 8);
    let mut chars = code.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '`' => out.push_str("\\`"),
            '$' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push_str("\\${");
            }
            other => out.push(other),
        }
    }

    out
}
