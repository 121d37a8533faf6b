//! Response Format Validation
//!
//! Checks the router applies to every answer before accepting it:
//! - Free text must be non-empty
//! - JSON must parse to an object and carry every required top-level key
//! - Optional field rules constrain values (allowed strings, numeric ranges)
//!
//! A rejected answer is an `InvalidResponse`, so it feeds the router's
//! same-candidate retry and fallback like any other malformed output.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::json_repair::parse_json_object;
use crate::types::BackendFailure;

/// Value constraint on one top-level JSON field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum FieldRule {
    /// String field matching one of `values`, ignoring case and padding
    OneOf { key: String, values: Vec<String> },
    /// Number (or numeric string) within `min..=max`
    Range { key: String, min: f64, max: f64 },
}

impl FieldRule {
    fn check(&self, object: &Value) -> Result<(), BackendFailure> {
        match self {
            Self::OneOf { key, values } => {
                let field = object.get(key.as_str());
                let Some(text) = field.and_then(Value::as_str) else {
                    return Err(BackendFailure::invalid_response(format!(
                        "Field '{}' must be a string",
                        key
                    )));
                };
                let normalized = text.trim().to_uppercase();
                if values.iter().any(|v| v.to_uppercase() == normalized) {
                    Ok(())
                } else {
                    Err(BackendFailure::invalid_response(format!(
                        "Invalid {}: {}. Valid values: {}",
                        key,
                        text,
                        values.join(", ")
                    )))
                }
            }
            Self::Range { key, min, max } => {
                let field = object.get(key.as_str());
                let number = field.and_then(|f| {
                    f.as_f64()
                        .or_else(|| f.as_str().and_then(|s| s.trim().parse().ok()))
                });
                match number {
                    Some(n) if (*min..=*max).contains(&n) => Ok(()),
                    Some(n) => Err(BackendFailure::invalid_response(format!(
                        "Invalid {}: {}. Must be between {:?} and {:?}",
                        key, n, min, max
                    ))),
                    None => Err(BackendFailure::invalid_response(format!(
                        "Field '{}' must be a number",
                        key
                    ))),
                }
            }
        }
    }
}

/// What a caller expects the model to return
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpectedFormat {
    #[default]
    Text,
    JsonObject {
        required_keys: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        rules: Vec<FieldRule>,
    },
}

impl ExpectedFormat {
    pub fn json(required_keys: &[&str]) -> Self {
        Self::JsonObject {
            required_keys: required_keys.iter().map(|k| k.to_string()).collect(),
            rules: Vec::new(),
        }
    }

    /// Restrict a string field to `values`; no effect on text formats
    pub fn one_of(self, key: &str, values: &[&str]) -> Self {
        self.with_rule(FieldRule::OneOf {
            key: key.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        })
    }

    /// Restrict a numeric field to `min..=max`; no effect on text formats
    pub fn within(self, key: &str, min: f64, max: f64) -> Self {
        self.with_rule(FieldRule::Range {
            key: key.to_string(),
            min,
            max,
        })
    }

    fn with_rule(mut self, rule: FieldRule) -> Self {
        if let Self::JsonObject { rules, .. } = &mut self {
            rules.push(rule);
        }
        self
    }

    pub fn is_json(&self) -> bool {
        matches!(self, Self::JsonObject { .. })
    }

    /// Validate raw model text; JSON formats return the parsed object
    pub fn check(&self, raw: &str) -> Result<Option<Value>, BackendFailure> {
        match self {
            Self::Text => {
                if raw.trim().is_empty() {
                    Err(BackendFailure::invalid_response("Empty response"))
                } else {
                    Ok(None)
                }
            }
            Self::JsonObject { required_keys, rules } => {
                let parsed = parse_json_object(raw)?;
                let missing: Vec<&str> = required_keys
                    .iter()
                    .filter(|key| parsed.value.get(key.as_str()).is_none_or(Value::is_null))
                    .map(String::as_str)
                    .collect();

                if !missing.is_empty() {
                    return Err(BackendFailure::invalid_response(format!(
                        "Missing required keys: {}",
                        missing.join(", ")
                    )));
                }
                for rule in rules {
                    rule.check(&parsed.value)?;
                }
                Ok(Some(parsed.value))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureKind;

    #[test]
    fn test_text_format_rejects_blank() {
        assert!(ExpectedFormat::Text.check("hello").unwrap().is_none());
        assert_eq!(
            ExpectedFormat::Text.check(" \n").unwrap_err().kind,
            FailureKind::InvalidResponse
        );
    }

    #[test]
    fn test_json_format_requires_keys() {
        let format = ExpectedFormat::json(&["action", "confidence", "brief"]);
        let value = format
            .check(r#"{"action": "CALL", "confidence": 0.6, "brief": "x"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(value["action"], "CALL");

        let err = format
            .check(r#"{"action": "CALL", "confidence": null}"#)
            .unwrap_err();
        assert_eq!(err.message, "Missing required keys: confidence, brief");
    }

    #[test]
    fn test_json_format_rejects_arrays() {
        let format = ExpectedFormat::json(&[]);
        assert!(format.check("[1]").is_err());
    }

    #[test]
    fn test_format_serializes_tagged() {
        let json = serde_json::to_value(ExpectedFormat::json(&["a"])).unwrap();
        assert_eq!(json["type"], "json_object");
        assert_eq!(json["required_keys"][0], "a");
        assert!(json.get("rules").is_none());

        let json = serde_json::to_value(ExpectedFormat::json(&["a"]).within("a", 0.0, 1.0)).unwrap();
        assert_eq!(json["rules"][0]["rule"], "range");
    }

    fn recommendation_format() -> ExpectedFormat {
        ExpectedFormat::json(&["action", "confidence", "brief"])
            .one_of("action", &["CALL", "PUT", "WAIT"])
            .within("confidence", 0.0, 1.0)
    }

    #[test]
    fn test_rules_reject_out_of_vocabulary_values() {
        let format = recommendation_format();

        let err = format
            .check(r#"{"action": "BUY", "confidence": 0.5, "brief": "x"}"#)
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidResponse);
        assert_eq!(err.message, "Invalid action: BUY. Valid values: CALL, PUT, WAIT");

        let err = format
            .check(r#"{"action": "CALL", "confidence": 1.4, "brief": "x"}"#)
            .unwrap_err();
        assert_eq!(err.message, "Invalid confidence: 1.4. Must be between 0.0 and 1.0");

        let err = format
            .check(r#"{"action": 3, "confidence": 0.5, "brief": "x"}"#)
            .unwrap_err();
        assert_eq!(err.message, "Field 'action' must be a string");
    }

    #[test]
    fn test_rules_accept_loose_but_valid_values() {
        let value = recommendation_format()
            .check(r#"{"action": " wait ", "confidence": "0.35", "brief": "x"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(value["confidence"], "0.35");
    }

    #[test]
    fn test_rules_ignored_for_text() {
        let format = ExpectedFormat::Text.one_of("action", &["CALL"]);
        assert_eq!(format, ExpectedFormat::Text);
    }
}
