// Embedded script data: pull `var name = {...};` assignments out of rendered
// markup and turn the JS object literal into something serde_json accepts.

use regex::Regex;
use serde_json::Value;

/// Find the object or array literal assigned to `var_name` in any script block.
///
/// Matches `var name = {...}`, `name = {...}` and the array forms. The literal
/// runs to its balanced closing bracket; brackets and `;` inside strings and
/// comments do not count.
pub fn extract_js_var<'a>(html: &'a str, var_name: &str) -> Option<&'a str> {
    let name = regex::escape(var_name);
    let re = Regex::new(&format!(r"(?:\bvar\s+)?\b{name}\s*=\s*[\{{\[]")).ok()?;
    let found = re.find_iter(html).find_map(|m| {
        let open = m.end() - 1;
        balanced_end(html.as_bytes(), open).map(|end| &html[open..end])
    });
    found
}

/// Index just past the bracket closing the one at `open`.
fn balanced_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
                continue;
            }
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Index just past the closing quote of the string starting at `start`.
fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    i
}

/// Extract `var_name` and parse it as JSON. `None` when absent or unparseable.
pub fn js_var_json(html: &str, var_name: &str) -> Option<Value> {
    let raw = extract_js_var(html, var_name)?;
    serde_json::from_str(&js_to_json(raw)).ok()
}

/// Convert a JS object literal into JSON text.
///
/// Handles single-quoted strings, line and block comments, `undefined`,
/// unquoted keys and trailing commas. String contents pass through untouched,
/// so URLs containing `//` survive.
pub fn js_to_json(js: &str) -> String {
    let chars: Vec<char> = js.chars().collect();
    let mut out = String::with_capacity(js.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                i = copy_string(&chars, i, &mut out);
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i += 2;
                continue;
            }
            '}' | ']' => {
                drop_trailing_comma(&mut out);
                out.push(c);
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_part(chars[i]) {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                if is_key_position(&out) && next_non_space(&chars, i) == Some(':') {
                    out.push('"');
                    out.push_str(&ident);
                    out.push('"');
                } else if ident == "undefined" {
                    out.push_str("null");
                } else {
                    out.push_str(&ident);
                }
                continue;
            }
            _ => out.push(c),
        }
        i += 1;
    }

    out
}

/// Copy a quoted string starting at `start` as a double-quoted JSON string.
/// Returns the index just past the closing quote.
fn copy_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    out.push('"');
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            let next = chars[i + 1];
            // \' is not a valid JSON escape
            if next == '\'' {
                out.push('\'');
            } else {
                out.push('\\');
                out.push(next);
            }
            i += 2;
            continue;
        }
        if c == quote {
            i += 1;
            break;
        }
        if c == '"' {
            out.push_str("\\\"");
        } else if c == '\n' {
            out.push_str("\\n");
        } else {
            out.push(c);
        }
        i += 1;
    }
    out.push('"');
    i
}

fn drop_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    if out[..trimmed_len].ends_with(',') {
        out.truncate(trimmed_len - 1);
    }
}

fn is_key_position(out: &str) -> bool {
    matches!(out.trim_end().chars().last(), Some('{') | Some(','))
}

fn next_non_space(chars: &[char], from: usize) -> Option<char> {
    chars[from..].iter().copied().find(|c| !c.is_whitespace())
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}
