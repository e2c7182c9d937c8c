//! Style fragment scoping.
//!
//! Rewrites every selector of a style fragment so it only applies inside one
//! render instance. This is a brace-level rewrite, not a full CSS parser:
//! comments are dropped, grouping at-rules are rewritten recursively and every
//! other at-rule is copied through unchanged.

use once_cell::sync::Lazy;
use regex::Regex;

static COMMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)/\*.*?\*/").expect("comment pattern is valid")
});

/// At-rules whose block holds ordinary style rules.
const GROUPING_AT_RULES: &[&str] = &["media", "supports", "container", "layer", "document"];

/// Selectors that address the document root and map to the scope element.
const ROOT_SELECTORS: &[&str] = &["body", "html", ":root"];

/// Prefixes every selector in `css` with `scope`.
pub fn scope_css(css: &str, scope: &str) -> String {
    let stripped = COMMENT.replace_all(css, "");
    let mut out = String::with_capacity(stripped.len() + 64);
    scope_rules(&stripped, scope, &mut out);
    out
}

fn scope_rules(css: &str, scope: &str, out: &mut String) {
    let mut rest = css;
    loop {
        let trimmed = rest.trim_start();
        if trimmed.is_empty() {
            return;
        }
        let Some((stop, delimiter)) = find_top_level(trimmed, &['{', ';']) else {
            out.push_str(trimmed.trim());
            out.push('\n');
            return;
        };
        let prelude = trimmed[..stop].trim();

        if delimiter == ';' {
            out.push_str(prelude);
            out.push_str(";\n");
            rest = &trimmed[stop + 1..];
            continue;
        }

        let body_start = stop + 1;
        let body_end = matching_brace(trimmed, body_start).unwrap_or(trimmed.len());
        let body = &trimmed[body_start..body_end];
        rest = trimmed.get(body_end + 1..).unwrap_or("");

        if let Some(at_rule) = prelude.strip_prefix('@') {
            let name: String = at_rule
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
                .collect::<String>()
                .to_ascii_lowercase();
            out.push_str(prelude);
            out.push_str(" {\n");
            if GROUPING_AT_RULES.contains(&name.as_str()) {
                scope_rules(body, scope, out);
            } else {
                out.push_str(body.trim());
                out.push('\n');
            }
            out.push_str("}\n");
            continue;
        }

        let selectors: Vec<String> = split_top_level(prelude, ',')
            .into_iter()
            .map(str::trim)
            .filter(|selector| !selector.is_empty())
            .map(|selector| scope_selector(selector, scope))
            .collect();
        out.push_str(&selectors.join(", "));
        out.push_str(" {");
        out.push_str(body);
        out.push_str("}\n");
    }
}

fn scope_selector(selector: &str, scope: &str) -> String {
    for root in ROOT_SELECTORS {
        if let Some(tail) = selector.strip_prefix(root) {
            let boundary = tail
                .chars()
                .next()
                .map_or(true, |c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'));
            if boundary {
                return format!("{scope}{tail}");
            }
        }
    }
    format!("{scope} {selector}")
}

/// Finds the first of `targets` outside strings, parentheses and brackets.
fn find_top_level(css: &str, targets: &[char]) -> Option<(usize, char)> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (index, c) in css.char_indices() {
        match (quote, c) {
            (Some(open), c) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(' | '[') => depth += 1,
            (None, ')' | ']') => depth = depth.saturating_sub(1),
            (None, c) if depth == 0 && targets.contains(&c) => return Some((index, c)),
            _ => {}
        }
    }
    None
}

/// Returns the index of the `}` closing a block whose body starts at `start`.
fn matching_brace(css: &str, start: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    for (offset, c) in css[start..].char_indices() {
        match (quote, c) {
            (Some(open), c) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '{') => depth += 1,
            (None, '}') => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_top_level(value: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = value;
    while let Some((index, _)) = find_top_level(rest, &[separator]) {
        parts.push(&rest[..index]);
        rest = &rest[index + separator.len_utf8()..];
    }
    parts.push(rest);
    parts
}
