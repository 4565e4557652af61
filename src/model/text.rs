//! INI-style model text.
//!
//! ```text
//! [request_definition]
//! r = sub, obj, act
//!
//! [policy_definition]
//! p = sub, obj, act
//!
//! [role_definition]
//! g = _, _
//!
//! [policy_effect]
//! e = some(where (p.eft == allow))
//!
//! [matchers]
//! m = g(r.sub, p.sub) && r.obj == p.obj \
//!     && r.act == p.act
//! ```
//!
//! `#` and `;` start comments. A trailing `\` continues a line. A value
//! opening with `{` runs until its braces balance, so block matchers may
//! span several lines.

use indexmap::IndexMap;

use crate::errors::AuthzError;

/// Section header -> short section name used throughout the model.
pub const SECTIONS: [(&str, &str); 6] = [
    ("request_definition", "r"),
    ("policy_definition", "p"),
    ("role_definition", "g"),
    ("policy_effect", "e"),
    ("matchers", "m"),
    ("constraint_definition", "c"),
];

pub fn section_name(short: &str) -> &str {
    SECTIONS
        .iter()
        .find(|(_, s)| *s == short)
        .map(|(long, _)| *long)
        .unwrap_or(short)
}

/// Parse model text into `section -> [(key, value)]` in file order.
pub fn parse_model_text(text: &str) -> Result<IndexMap<String, Vec<(String, String)>>, AuthzError> {
    let mut sections: IndexMap<String, Vec<(String, String)>> = IndexMap::new();
    let mut current: Option<String> = None;
    let mut lines = text.lines().enumerate();

    while let Some((lineno, raw)) = lines.next() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let name = header.strip_suffix(']').ok_or_else(|| {
                AuthzError::InvalidModel(format!("line {}: unterminated section header", lineno + 1))
            })?;
            current = Some(name.trim().to_string());
            continue;
        }

        let Some(section) = current.as_ref() else {
            return Err(AuthzError::InvalidModel(format!(
                "line {}: `{line}` appears before any section header",
                lineno + 1
            )));
        };

        let (key, first) = line.split_once('=').ok_or_else(|| {
            AuthzError::InvalidModel(format!("line {}: expected `key = value`", lineno + 1))
        })?;
        let key = key.trim().to_string();
        let mut value = first.trim().to_string();

        if value.starts_with('{') {
            while brace_depth(&value) > 0 {
                let Some((_, next)) = lines.next() else {
                    return Err(AuthzError::InvalidModel(format!(
                        "block for `{key}` is missing a closing `}}`"
                    )));
                };
                let next = strip_comment(next).trim();
                if !next.is_empty() {
                    value.push('\n');
                    value.push_str(next);
                }
            }
        } else {
            while let Some(head) = value.strip_suffix('\\') {
                let mut joined = head.trim_end().to_string();
                let Some((_, next)) = lines.next() else {
                    value = joined;
                    break;
                };
                joined.push(' ');
                joined.push_str(strip_comment(next).trim());
                value = joined;
            }
        }

        sections
            .entry(section.clone())
            .or_default()
            .push((key, value));
    }

    Ok(sections)
}

/// Drop a `#` or `;` comment that starts outside a quoted string.
pub(crate) fn strip_comment(line: &str) -> &str {
    let mut quote = None;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (None, '"' | '\'') => quote = Some(c),
            (None, '#') => return &line[..i],
            (None, ';') if line[..i].trim().is_empty() => return "",
            _ => {}
        }
    }
    line
}

fn brace_depth(value: &str) -> i32 {
    value.chars().fold(0, |depth, c| match c {
        '{' => depth + 1,
        '}' => depth - 1,
        _ => depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_model() {
        let sections = parse_model_text(
            "# comment\n[request_definition]\nr = sub, obj, act\n\n[matchers]\nm = r.sub == p.sub # trailing\n",
        )
        .unwrap();
        assert_eq!(
            sections["request_definition"],
            vec![("r".to_string(), "sub, obj, act".to_string())]
        );
        assert_eq!(sections["matchers"][0].1, "r.sub == p.sub");
    }

    #[test]
    fn test_line_continuation() {
        let sections =
            parse_model_text("[matchers]\nm = r.sub == p.sub \\\n  && r.obj == p.obj\n").unwrap();
        assert_eq!(sections["matchers"][0].1, "r.sub == p.sub && r.obj == p.obj");
    }

    #[test]
    fn test_multiline_block() {
        let sections = parse_model_text(
            "[matchers]\nm = {\n  let a = r.sub == p.sub\n  return a\n}\n[policy_effect]\ne = x\n",
        )
        .unwrap();
        assert_eq!(
            sections["matchers"][0].1,
            "{\nlet a = r.sub == p.sub\nreturn a\n}"
        );
        assert_eq!(sections["policy_effect"][0].1, "x");
    }

    #[test]
    fn test_hash_inside_string_is_kept() {
        assert_eq!(strip_comment(r#"m = r.obj == "a#b" # c"#), r#"m = r.obj == "a#b" "#);
    }

    #[test]
    fn test_key_before_section_is_error() {
        assert!(parse_model_text("r = sub\n").is_err());
    }

    #[test]
    fn test_unclosed_block_is_error() {
        assert!(parse_model_text("[matchers]\nm = {\n return true\n").is_err());
    }
}
