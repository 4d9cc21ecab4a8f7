//! Heuristic detection of a top-level `return` in caller code.
//!
//! This is not a parser. Comments and literal contents are blanked, nested
//! function bodies are dropped, and whatever remains is searched for a
//! `return` keyword. Regex literals, class methods and object-literal method
//! shorthand are not recognised, so crafted input can fool it in either
//! direction.

use regex::Regex;
use std::sync::OnceLock;

fn return_keyword() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\breturn\b").expect("static regex is valid"))
}

fn statement_keyword() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:throw|const|let|var|if|for|while|do|switch|try|function|class|import|export)\b",
        )
        .expect("static regex is valid")
    })
}

/// True when `code` opens with a statement keyword and so cannot be
/// wrapped in `return (...)`.
pub fn starts_with_statement(code: &str) -> bool {
    let blanked = strip_comments_and_literals(code);
    statement_keyword().is_match(blanked.trim_start())
}

/// Decide whether `code` already returns a value at its top level.
pub fn has_top_level_return(code: &str) -> bool {
    let blanked = strip_comments_and_literals(code);
    let flattened = strip_nested_functions(&blanked);
    return_keyword().is_match(&flattened)
}

/// Byte offset of a `//` comment that runs to the end of `code`, ignoring
/// trailing whitespace.
pub fn trailing_line_comment(code: &str) -> Option<usize> {
    let chars: Vec<char> = code.chars().collect();
    let offsets: Vec<usize> = code.char_indices().map(|(offset, _)| offset).collect();
    let mut i = 0;

    while i < chars.len() {
        match (chars[i], chars.get(i + 1).copied()) {
            ('/', Some('/')) => {
                let start = i;
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                if chars[i..].iter().all(|c| c.is_whitespace()) {
                    return Some(offsets[start]);
                }
            }
            ('/', Some('*')) => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            ('"', _) | ('\'', _) | ('`', _) => i = skip_literal(&chars, i),
            _ => i += 1,
        }
    }

    None
}

/// Remove comments and replace string/template literal contents with
/// empty placeholders, keeping the delimiters.
fn strip_comments_and_literals(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match (c, next) {
            ('/', Some('/')) => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ('/', Some('*')) => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
                out.push(' ');
            }
            ('"', _) | ('\'', _) | ('`', _) => {
                i = skip_literal(&chars, i);
                out.push(c);
                out.push(c);
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// Return the index just past the literal that opens at `start`.
fn skip_literal(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return i + 1,
            // Plain strings cannot span lines; stop so one stray quote does
            // not swallow the rest of the program.
            '\n' if quote != '`' => return i,
            _ => i += 1,
        }
    }
    chars.len()
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn is_keyword_at(chars: &[char], i: usize, keyword: &str) -> bool {
    let len = keyword.chars().count();
    if i + len > chars.len() {
        return false;
    }
    if !chars[i..i + len].iter().copied().eq(keyword.chars()) {
        return false;
    }
    let before_ok = i == 0 || !is_ident_char(chars[i - 1]);
    let after_ok = chars.get(i + len).map_or(true, |c| !is_ident_char(*c));
    before_ok && after_ok
}

/// Bracket pairs and paren positions resolved in one pass, so the
/// function scan never rescans the input.
struct Brackets {
    /// For each opening bracket, the index of its closing bracket
    close: Vec<Option<usize>>,

    /// For each index, the first `(` at or after it
    next_paren: Vec<Option<usize>>,
}

impl Brackets {
    fn scan(chars: &[char]) -> Self {
        let mut close = vec![None; chars.len()];
        // Each bracket kind nests independently.
        let mut open: [Vec<usize>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        for (i, &c) in chars.iter().enumerate() {
            match c {
                '(' => open[0].push(i),
                '[' => open[1].push(i),
                '{' => open[2].push(i),
                ')' | ']' | '}' => {
                    let kind = match c {
                        ')' => 0,
                        ']' => 1,
                        _ => 2,
                    };
                    if let Some(o) = open[kind].pop() {
                        close[o] = Some(i);
                    }
                }
                _ => {}
            }
        }

        let mut next_paren = vec![None; chars.len() + 1];
        for i in (0..chars.len()).rev() {
            next_paren[i] = if chars[i] == '(' { Some(i) } else { next_paren[i + 1] };
        }

        Self { close, next_paren }
    }

    fn matching_close(&self, open: usize) -> Option<usize> {
        self.close.get(open).copied().flatten()
    }

    fn next_paren(&self, from: usize) -> Option<usize> {
        self.next_paren.get(from).copied().flatten()
    }
}

fn skip_whitespace(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

/// End of a single-expression arrow body starting at `start`.
fn expression_end(chars: &[char], brackets: &Brackets, start: usize) -> usize {
    let mut i = start;
    while i < chars.len() {
        match chars[i] {
            '(' | '[' | '{' => match brackets.matching_close(i) {
                Some(close) => i = close + 1,
                None => return chars.len(),
            },
            ';' | ',' | ')' | ']' | '}' | '\n' => return i,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Drop the bodies of `function` definitions and arrow functions.
///
/// Runs in linear time: every position is visited once and bracket lookups
/// are precomputed.
fn strip_nested_functions(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let brackets = Brackets::scan(&chars);
    let mut out = String::with_capacity(code.len());
    let mut i = 0;

    while i < chars.len() {
        if is_keyword_at(&chars, i, "function") {
            out.push_str("function");
            i += "function".len();

            let Some(paren) = brackets.next_paren(i) else {
                continue;
            };
            let Some(params_end) = brackets.matching_close(paren) else {
                continue;
            };
            let body = skip_whitespace(&chars, params_end + 1);
            if chars.get(body) == Some(&'{') {
                out.push_str("(){}");
                match brackets.matching_close(body) {
                    Some(close) => i = close + 1,
                    // Unterminated body swallows the rest of the input.
                    None => break,
                }
            }
            continue;
        }

        if chars[i] == '=' && chars.get(i + 1) == Some(&'>') {
            let body = skip_whitespace(&chars, i + 2);
            if chars.get(body) == Some(&'{') {
                out.push_str("=>{}");
                match brackets.matching_close(body) {
                    Some(close) => i = close + 1,
                    None => break,
                }
            } else {
                i = expression_end(&chars, &brackets, body);
            }
            continue;
        }

        out.push(chars[i]);
        i += 1;
    }

    out
}
