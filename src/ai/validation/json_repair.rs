//! JSON Extraction and Repair
//!
//! One parser for every model answer that is supposed to be JSON.
//!
//! Handles common model output issues:
//! - Markdown code fences, including fences preceded by prose
//! - Trailing commas
//! - Missing closing braces/brackets and truncated strings
//! - Control characters in strings
//! - JSON embedded in explanatory text
//!
//! Failure is always a `BackendFailure` of kind `InvalidResponse`, so the
//! router can treat "unparseable" uniformly regardless of the calling agent.

use serde_json::Value;
use tracing::debug;

use crate::types::{BackendFailure, preview};

/// Number of increasingly aggressive repair passes
const REPAIR_LEVELS: usize = 3;

/// Parsed JSON plus whether repair was needed to get it
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedJson {
    pub value: Value,
    pub repaired: bool,
}

/// Parse a model answer into a JSON value
pub fn parse_json_response(raw: &str) -> Result<ParsedJson, BackendFailure> {
    let cleaned = preprocess(raw);
    if cleaned.is_empty() {
        return Err(BackendFailure::invalid_response("Empty response"));
    }

    if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
        return Ok(ParsedJson {
            value,
            repaired: false,
        });
    }

    debug!("Initial JSON parse failed, attempting repair");

    // Prose around the payload is the most common case; try it before
    // mutating the text.
    if let Some(extracted) = extract_json_from_mixed(&cleaned)
        && let Ok(value) = serde_json::from_str::<Value>(&extracted)
    {
        debug!("JSON extracted from mixed content");
        return Ok(ParsedJson {
            value,
            repaired: true,
        });
    }

    let candidate = extract_json_from_mixed(&cleaned)
        .or_else(|| cleaned.find(['{', '[']).map(|start| cleaned[start..].to_string()))
        .unwrap_or_else(|| cleaned.clone());

    for level in 1..=REPAIR_LEVELS {
        let repaired = repair_attempt(&candidate, level);
        if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
            debug!(level, "JSON repaired");
            return Ok(ParsedJson {
                value,
                repaired: true,
            });
        }
    }

    Err(BackendFailure::invalid_response(format!(
        "Failed to parse JSON from response: {}",
        preview(&cleaned, 200)
    )))
}

/// Parse a model answer that must be a JSON object
pub fn parse_json_object(raw: &str) -> Result<ParsedJson, BackendFailure> {
    let parsed = parse_json_response(raw)?;
    if !parsed.value.is_object() {
        return Err(BackendFailure::invalid_response(
            "LLM response is not a JSON object",
        ));
    }
    Ok(parsed)
}

fn preprocess(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('\u{feff}').trim();
    strip_code_fences(trimmed)
}

/// Strip a markdown fence, whether it opens the text or follows some prose
fn strip_code_fences(s: &str) -> String {
    let Some(open) = s.find("```") else {
        return s.to_string();
    };

    let after_open = &s[open + 3..];
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];

    match body.find("```") {
        Some(close) => body[..close].trim().to_string(),
        None => body.trim().to_string(),
    }
}

fn repair_attempt(s: &str, level: usize) -> String {
    let mut result = fix_trailing_commas(s);
    if level >= 2 {
        result = fix_truncated_strings(&result);
    }
    if level >= 3 {
        result = remove_control_chars(&result);
        result = truncate_to_valid(&result);
    }
    balance_brackets(&result)
}

/// Drop commas that directly precede `]` or `}`
fn fix_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut result = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escape = false;

    for (i, &ch) in chars.iter().enumerate() {
        if escape {
            escape = false;
            result.push(ch);
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            ',' if !in_string => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if matches!(next, Some(']') | Some('}')) {
                    continue;
                }
            }
            _ => {}
        }
        result.push(ch);
    }

    result
}

/// Close unterminated strings and append missing closers in nesting order
fn balance_brackets(s: &str) -> String {
    let mut result = s.to_string();
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape = false;

    for ch in s.chars() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }

    if in_string {
        result.push('"');
    }
    while let Some(closer) = stack.pop() {
        result.push(closer);
    }
    result
}

/// Close strings left open at a line break
fn fix_truncated_strings(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 10);
    let mut in_string = false;
    let mut escape = false;

    for ch in s.chars() {
        if escape {
            escape = false;
            result.push(ch);
            continue;
        }
        match ch {
            '\\' if in_string => {
                escape = true;
                result.push(ch);
            }
            '"' => {
                in_string = !in_string;
                result.push(ch);
            }
            '\n' | '\r' if in_string => {
                result.push('"');
                in_string = false;
                result.push(ch);
            }
            _ => result.push(ch),
        }
    }

    if in_string {
        result.push('"');
    }
    result
}

fn remove_control_chars(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

/// Cut everything after the last complete top-level value
fn truncate_to_valid(s: &str) -> String {
    let mut last_valid = 0;
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape = false;

    for (i, ch) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    last_valid = i + 1;
                }
            }
            _ => {}
        }
    }

    if last_valid > 0 && last_valid < s.len() {
        s[..last_valid].to_string()
    } else {
        s.to_string()
    }
}

/// First balanced `{...}` or `[...]` span inside surrounding prose
fn extract_json_from_mixed(s: &str) -> Option<String> {
    let start = s.find(['{', '['])?;
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape = false;

    for (i, ch) in s[start..].char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(s[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureKind;

    #[test]
    fn test_parse_valid_json() {
        let parsed = parse_json_response(r#"{"key": "value"}"#).unwrap();
        assert!(!parsed.repaired);
        assert_eq!(parsed.value["key"], "value");
    }

    #[test]
    fn test_strip_code_fences() {
        let parsed = parse_json_response("```json\n{\"key\": \"value\"}\n```").unwrap();
        assert_eq!(parsed.value["key"], "value");
    }

    #[test]
    fn test_fence_after_prose() {
        let input = "Sure, here is the result:\n```json\n{\"action\": \"WAIT\"}\n```\nThanks";
        let parsed = parse_json_response(input).unwrap();
        assert_eq!(parsed.value["action"], "WAIT");
    }

    #[test]
    fn test_fix_trailing_comma() {
        let parsed = parse_json_response(r#"{"evidence": ["a", "b",],}"#).unwrap();
        assert!(parsed.repaired);
        assert_eq!(parsed.value["evidence"][1], "b");
    }

    #[test]
    fn test_trailing_comma_inside_string_is_kept() {
        let parsed = parse_json_response(r#"{"brief": "a, }", "x": 1,}"#).unwrap();
        assert_eq!(parsed.value["brief"], "a, }");
    }

    #[test]
    fn test_balance_brackets_in_nesting_order() {
        let parsed = parse_json_response(r#"{"issues": [{"code": "x""#).unwrap();
        assert!(parsed.repaired);
        assert_eq!(parsed.value["issues"][0]["code"], "x");
    }

    #[test]
    fn test_extract_from_mixed() {
        let input = "Analysis follows.\n{\"bias\": \"BULLISH\", \"confidence\": 0.7}\nHope this helps!";
        let parsed = parse_json_response(input).unwrap();
        assert!(parsed.repaired);
        assert_eq!(parsed.value["bias"], "BULLISH");
    }

    #[test]
    fn test_truncated_string() {
        let input = "{\"name\": \"unterminated\n, \"other\": \"value\"}";
        assert!(parse_json_response(input).is_ok());
    }

    #[test]
    fn test_plain_prose_is_invalid_response() {
        let err = parse_json_response("I cannot help with that.").unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidResponse);
        let err = parse_json_response("   ").unwrap_err();
        assert_eq!(err.message, "Empty response");
    }

    #[test]
    fn test_object_required() {
        let err = parse_json_object("[1, 2, 3]").unwrap_err();
        assert_eq!(err.message, "LLM response is not a JSON object");
        assert!(parse_json_object(r#"{"passed": true}"#).is_ok());
    }
}
