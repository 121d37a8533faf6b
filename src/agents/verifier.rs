//! Verifier
//!
//! Reviews an author output against its input summary. The verifier never
//! fails: a broken answer or a routing failure becomes a failed report so the
//! repair loop and persistence see one shape.

use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::prompt::PromptTemplates;
use super::{AgentContext, AgentRun};
use crate::ai::{ExpectedFormat, Task};
use crate::constants::verification as verify_constants;
use crate::types::{
    FailureKind, Severity, VerificationIssue, VerificationReport, json_bool, json_string,
    json_string_or, truncate_chars,
};

pub struct Verifier {
    ctx: AgentContext,
}

impl Verifier {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, inputs_summary, author_output), fields(task = task_name))]
    pub async fn verify(
        &self,
        task_name: &str,
        inputs_summary: &str,
        author_output: &str,
    ) -> AgentRun<VerificationReport> {
        let request = self.ctx.router.prepare(
            Task::Verification,
            PromptTemplates::verifier(),
            user_prompt(task_name, inputs_summary, author_output),
            ExpectedFormat::json(&[]),
        );
        let exchange = self.ctx.router.exchange(self.ctx.branch, request).await;
        let response = &exchange.response;

        let report = match (&response.error, &response.json) {
            (Some(err), _) if err.last_failure().kind == FailureKind::InvalidResponse => {
                warn!(error = %err, "Verifier returned unusable output");
                let last = err.last_failure();
                VerificationReport::failed(
                    VerificationIssue {
                        code: "invalid_json".to_string(),
                        message: last.message.clone(),
                        severity: Severity::High,
                        evidence: Some(truncate_chars(&response.text, 200)).filter(|t| !t.is_empty()),
                    },
                    Some("Verifier returned invalid JSON. Check verifier prompts and model capabilities.".to_string()),
                )
                .served_by(&last.backend, &last.model)
            }
            (Some(err), _) => {
                warn!(error = %err, "Verifier call failed");
                let last = err.last_failure();
                VerificationReport::failed(
                    VerificationIssue {
                        code: "verifier_error".to_string(),
                        message: err.to_string(),
                        severity: Severity::High,
                        evidence: None,
                    },
                    None,
                )
                .served_by(&last.backend, &last.model)
            }
            (None, Some(json)) => parse_report(json).served_by(&response.backend, &response.model),
            (None, None) => VerificationReport::failed(
                VerificationIssue {
                    code: "invalid_json".to_string(),
                    message: "LLM response is not a JSON object".to_string(),
                    severity: Severity::High,
                    evidence: None,
                },
                Some("Verifier must return a JSON object".to_string()),
            )
            .served_by(&response.backend, &response.model),
        };

        debug!(passed = report.passed, issues = report.issues.len(), "Verification done");
        AgentRun::routed(report, exchange)
    }
}

fn user_prompt(task_name: &str, inputs_summary: &str, author_output: &str) -> String {
    format!(
        "Verify the following agent output for task: {}\n\n\
         INPUT DATA SUMMARY:\n{}\n\n\
         AUTHOR OUTPUT:\n{}\n\n\
         Return ONLY a single JSON object: no markdown fences, no text before or after it.",
        task_name, inputs_summary, author_output
    )
}

/// Missing `passed` is a fail; malformed issues are skipped
fn parse_report(json: &Value) -> VerificationReport {
    let issues = json
        .get("issues")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.is_object())
                .map(|item| VerificationIssue {
                    code: json_string_or(item, "code", "unknown"),
                    message: json_string_or(item, "message", ""),
                    severity: json_string(item, "severity")
                        .map(|s| Severity::parse_lenient(&s))
                        .unwrap_or(Severity::Low),
                    evidence: json_string(item, "evidence"),
                })
                .collect()
        })
        .unwrap_or_default();

    VerificationReport {
        passed: json_bool(json, "passed", false),
        issues,
        suggested_fix: json_string(json, "suggested_fix").filter(|s| !s.trim().is_empty()),
        policy_version: json_string_or(json, "policy_version", verify_constants::POLICY_VERSION),
        backend: None,
        model: None,
    }
}
