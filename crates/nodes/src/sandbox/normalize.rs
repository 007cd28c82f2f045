//! Turns the three accepted code shapes into one executable script.
//!
//! Transform code may be written as
//! - a bare statement block (`return { x: input.n * 2 };`),
//! - a single named function declaration (`function main(input) { ... }`),
//! - an arrow function (`(input) => ({ x: input.n })` or `input => { ... }`).
//!
//! Every shape is rewritten into a script that stores the result in
//! [`RESULT_BINDING`], which is the only thing the sandbox reads back.

/// Global the normalized script assigns its result to.
pub const RESULT_BINDING: &str = "__result";

/// Name of the input binding visible to user code.
pub const INPUT_BINDING: &str = "input";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeShape {
    Block,
    NamedFunction,
    Arrow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedCode {
    pub shape: CodeShape,
    pub script: String,
}

/// Skip a quoted literal starting at `start`; returns the index after the
/// closing quote.
fn skip_quoted(src: &[u8], start: usize) -> Option<usize> {
    let quote = src[start];
    let mut i = start + 1;
    while i < src.len() {
        match src[i] {
            b'\\' => i += 2,
            b if b == quote => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

/// Index of the delimiter closing the one at `open`, skipping strings and
/// comments.
fn matching_close(src: &[u8], open: usize) -> Option<usize> {
    let (open_ch, close_ch) = match src.get(open)? {
        b'(' => (b'(', b')'),
        b'{' => (b'{', b'}'),
        b'[' => (b'[', b']'),
        _ => return None,
    };

    let mut depth = 0usize;
    let mut i = open;
    while i < src.len() {
        let b = src[i];
        if b == b'"' || b == b'\'' || b == b'`' {
            i = skip_quoted(src, i)?;
            continue;
        }
        if b == b'/' && src.get(i + 1) == Some(&b'/') {
            while i < src.len() && src[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if b == b'/' && src.get(i + 1) == Some(&b'*') {
            i += 2;
            while i + 1 < src.len() && !(src[i] == b'*' && src[i + 1] == b'/') {
                i += 1;
            }
            i += 2;
            continue;
        }
        if b == open_ch {
            depth += 1;
        } else if b == close_ch {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

fn skip_ws(src: &[u8], mut i: usize) -> usize {
    while i < src.len() && src[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

fn ident_end(src: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < src.len() && (src[i].is_ascii_alphanumeric() || src[i] == b'_' || src[i] == b'$') {
        i += 1;
    }
    i
}

fn only_terminators_after(src: &[u8], i: usize) -> bool {
    src[i..].iter().all(|b| b.is_ascii_whitespace() || *b == b';')
}

/// Name of the function when `code` is exactly one named function
/// declaration.
fn named_function(code: &str) -> Option<&str> {
    let src = code.as_bytes();
    let rest = code.strip_prefix("function")?;
    let mut i = code.len() - rest.len();
    if !src.get(i).is_some_and(|b| b.is_ascii_whitespace()) {
        return None;
    }
    i = skip_ws(src, i);
    if src.get(i) == Some(&b'*') {
        return None;
    }
    let name_start = i;
    let name_end = ident_end(src, name_start);
    if name_end == name_start || src[name_start].is_ascii_digit() {
        return None;
    }

    let params_open = skip_ws(src, name_end);
    let params_close = matching_close(src, params_open)?;
    let body_open = skip_ws(src, params_close + 1);
    let body_close = matching_close(src, body_open)?;

    only_terminators_after(src, body_close + 1).then(|| &code[name_start..name_end])
}

/// True when `code` starts with an arrow function head.
fn is_arrow(code: &str) -> bool {
    let src = code.as_bytes();
    let head_end = match src.first() {
        Some(b'(') => match matching_close(src, 0) {
            Some(close) => close + 1,
            None => return false,
        },
        Some(b) if b.is_ascii_alphabetic() || *b == b'_' || *b == b'$' => ident_end(src, 0),
        _ => return false,
    };
    let arrow = skip_ws(src, head_end);
    src[arrow..].starts_with(b"=>")
}

pub fn detect(code: &str) -> CodeShape {
    let trimmed = code.trim();
    if named_function(trimmed).is_some() {
        CodeShape::NamedFunction
    } else if is_arrow(trimmed) {
        CodeShape::Arrow
    } else {
        CodeShape::Block
    }
}

pub fn normalize(code: &str) -> NormalizedCode {
    let trimmed = code.trim();

    if let Some(name) = named_function(trimmed) {
        return NormalizedCode {
            shape: CodeShape::NamedFunction,
            script: format!("{trimmed}\nvar {RESULT_BINDING} = {name}({INPUT_BINDING});"),
        };
    }

    if is_arrow(trimmed) {
        let body = trimmed.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
        return NormalizedCode {
            shape: CodeShape::Arrow,
            script: format!("var {RESULT_BINDING} = ({body})({INPUT_BINDING});"),
        };
    }

    NormalizedCode {
        shape: CodeShape::Block,
        script: format!(
            "var {RESULT_BINDING} = (function ({INPUT_BINDING}) {{\n{code}\n}}).call(undefined, {INPUT_BINDING});"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_bare_block() {
        assert_eq!(detect("return input;"), CodeShape::Block);
        assert_eq!(detect("const y = input.n;\nreturn { y };"), CodeShape::Block);
    }

    #[test]
    fn helper_function_followed_by_statements_is_a_block() {
        let code = "function helper(v) { return v * 2; }\nreturn { x: helper(input.n) };";
        assert_eq!(detect(code), CodeShape::Block);
    }

    #[test]
    fn detects_named_function() {
        let code = "function main(input) {\n  return { ok: '}' };\n}";
        assert_eq!(detect(code), CodeShape::NamedFunction);
        let normalized = normalize(code);
        assert!(normalized.script.ends_with("var __result = main(input);"));
    }

    #[test]
    fn detects_arrow_forms() {
        assert_eq!(detect("(input) => ({ x: input.n })"), CodeShape::Arrow);
        assert_eq!(detect("input => { return input; }"), CodeShape::Arrow);
        assert_eq!(detect("(a, b) => a"), CodeShape::Arrow);
    }

    #[test]
    fn arrow_trailing_semicolon_is_dropped() {
        let normalized = normalize("x => x.n;  ");
        assert_eq!(normalized.script, "var __result = (x => x.n)(input);");
    }

    #[test]
    fn block_is_wrapped_in_a_function() {
        let normalized = normalize("return input;");
        assert_eq!(normalized.shape, CodeShape::Block);
        assert!(normalized.script.starts_with("var __result = (function (input) {"));
    }

    #[test]
    fn comments_and_strings_do_not_confuse_brace_matching() {
        let code = "function main(input) {\n  // }\n  /* } */\n  return \"}\";\n}";
        assert_eq!(detect(code), CodeShape::NamedFunction);
    }
}
