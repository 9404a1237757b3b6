//! Layered recovery of a JSON object from raw oracle text.
//!
//! Each repair is a total function from text to an optional candidate; the
//! pipeline tries them in order and keeps the first candidate that parses as a
//! JSON object.

use serde_json::Value;
use tracing::debug;

type Repair = fn(&str) -> Option<String>;

const REPAIRS: [(&str, Repair); 3] = [
    ("as_is", as_is),
    ("outermost_braces", outermost_braces),
    ("escape_content", escape_content_values),
];

/// Parse `raw` into a JSON object, returning the last parse error on failure.
pub fn parse_json_object(raw: &str) -> Result<Value, String> {
    let mut last_error = "response is empty".to_string();
    for (name, repair) in REPAIRS {
        let Some(candidate) = repair(raw) else {
            continue;
        };
        match serde_json::from_str::<Value>(&candidate) {
            Ok(value) if value.is_object() => {
                debug!(repair = name, "parsed oracle response");
                return Ok(value);
            }
            Ok(_) => last_error = "response is not a JSON object".to_string(),
            Err(err) => last_error = err.to_string(),
        }
    }
    Err(last_error)
}

/// Trimmed input, minus a leading byte-order mark.
pub fn as_is(raw: &str) -> Option<String> {
    let text = raw.trim().trim_start_matches('\u{feff}');
    (!text.is_empty()).then(|| text.to_string())
}

/// Substring from the first `{` to the last `}`.
pub fn outermost_braces(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| raw[start..=end].to_string())
}

/// Re-escape quotes and raw control characters inside `"content"` values.
///
/// A quote ends the value only when the brackets opened inside the value are
/// balanced and the next non-blank character closes the member (`,` `}` `]`)
/// or the input ends.
pub fn escape_content_values(raw: &str) -> Option<String> {
    let text = outermost_braces(raw).unwrap_or_else(|| raw.trim().to_string());
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut i = 0;
    let mut changed = false;

    while i < chars.len() {
        match content_value_start(&chars, i) {
            Some(value_start) => {
                out.extend(&chars[i..value_start]);
                let (escaped, next, did_change) = escape_value(&chars, value_start);
                out.push_str(&escaped);
                changed |= did_change;
                i = next;
            }
            None => {
                out.push(chars[i]);
                i += 1;
            }
        }
    }
    changed.then_some(out)
}

/// If `"content"` followed by `:` and an opening quote starts at `i`, return
/// the index just past that opening quote.
fn content_value_start(chars: &[char], i: usize) -> Option<usize> {
    const KEY: [char; 9] = ['"', 'c', 'o', 'n', 't', 'e', 'n', 't', '"'];
    if chars.get(i..i + KEY.len())? != &KEY[..] {
        return None;
    }
    let mut j = skip_blank(chars, i + KEY.len());
    if chars.get(j) != Some(&':') {
        return None;
    }
    j = skip_blank(chars, j + 1);
    (chars.get(j) == Some(&'"')).then_some(j + 1)
}

fn skip_blank(chars: &[char], mut i: usize) -> usize {
    while chars.get(i).is_some_and(|c| c.is_whitespace()) {
        i += 1;
    }
    i
}

/// Escape one value body starting after its opening quote. Returns the escaped
/// text including the closing quote, the index after it, and whether anything
/// was rewritten.
fn escape_value(chars: &[char], start: usize) -> (String, usize, bool) {
    let mut out = String::new();
    let mut depth: i32 = 0;
    let mut changed = false;
    let mut i = start;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                out.push(c);
                if let Some(next) = chars.get(i + 1) {
                    out.push(*next);
                }
                i += 2;
                continue;
            }
            '{' | '[' | '(' => depth += 1,
            '}' | ']' | ')' => depth -= 1,
            '"' => {
                let after = skip_blank(chars, i + 1);
                let closes = matches!(chars.get(after), None | Some(',' | '}' | ']'));
                if depth <= 0 && closes {
                    out.push('"');
                    return (out, i + 1, changed);
                }
                out.push_str("\\\"");
                changed = true;
                i += 1;
                continue;
            }
            '\n' => {
                out.push_str("\\n");
                changed = true;
                i += 1;
                continue;
            }
            '\r' => {
                out.push_str("\\r");
                changed = true;
                i += 1;
                continue;
            }
            '\t' => {
                out.push_str("\\t");
                changed = true;
                i += 1;
                continue;
            }
            c if c.is_control() => {
                out.push_str(&format!("\\u{:04x}", c as u32));
                changed = true;
                i += 1;
                continue;
            }
            _ => {}
        }
        out.push(c);
        i += 1;
    }
    (out, i, changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_json_parses_as_is() {
        let value = parse_json_object(r#"{"phases": []}"#).expect("parse");
        assert!(value["phases"].is_array());
    }

    #[test]
    fn fenced_json_with_prose_is_extracted() {
        let raw = "Sure! Here is the plan:\n```json\n{\"phases\": [{\"name\": \"A\"}]}\n```\nGood luck.";
        let value = parse_json_object(raw).expect("parse");
        assert_eq!(value["phases"][0]["name"], "A");
    }

    #[test]
    fn unescaped_quotes_in_content_are_repaired() {
        let raw = r#"{"actions": [{"type": "file_write", "path": "src/app.ts", "content": "import { Component } from "@angular/core";
@Component({selector: "app-root"})
export class App {}"}]}"#;
        let value = parse_json_object(raw).expect("parse");
        let content = value["actions"][0]["content"].as_str().expect("content");
        assert!(content.starts_with("import { Component } from \"@angular/core\";\n"));
        assert!(content.ends_with("export class App {}"));
        assert_eq!(value["actions"][0]["path"], "src/app.ts");
    }

    #[test]
    fn call_arguments_in_content_do_not_end_value_early() {
        let raw = r#"{"actions": [{"type": "file_write", "path": "src/main.ts", "content": "console.log("a", 1);"}]}"#;
        let value = parse_json_object(raw).expect("parse");
        assert_eq!(value["actions"][0]["content"], "console.log(\"a\", 1);");
        assert_eq!(value["actions"][0]["path"], "src/main.ts");
    }

    #[test]
    fn json_inside_content_does_not_end_value_early() {
        let raw = r#"{"actions": [{"type": "file_write", "path": "cfg.json", "content": "{"a": "b", "c": ["d"]}"}]}"#;
        let value = parse_json_object(raw).expect("parse");
        assert_eq!(
            value["actions"][0]["content"],
            r#"{"a": "b", "c": ["d"]}"#
        );
    }

    #[test]
    fn already_escaped_content_is_left_alone() {
        assert_eq!(escape_content_values(r#"{"content": "say \"hi\""}"#), None);
    }

    #[test]
    fn garbage_reports_error_without_panicking() {
        let err = parse_json_object("I could not produce a plan").expect_err("garbage");
        assert!(!err.is_empty());
        parse_json_object("").expect_err("empty");
        parse_json_object("[1, 2]").expect_err("array");
        parse_json_object("{\"content\": \"unterminated").expect_err("unterminated");
    }
}
