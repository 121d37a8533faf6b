//! Prompt Builder
//!
//! Standardized prompt construction shared by every agent.
//!
//! ## Layout
//!
//! 1. **Role**: who the model is acting as
//! 2. **Objectives**: numbered goals
//! 3. **Context**: ordered key/value facts
//! 4. **Rules**: hard constraints (grounding, forbidden content)
//! 5. **Output**: the exact JSON shape expected back

use crate::constants::safety as safety_constants;

#[derive(Debug, Clone)]
pub enum PromptSection {
    Role { expertise: String, task: String },
    Objectives(Vec<String>),
    /// Ordered key/value pairs; order is kept so prompts are reproducible
    Context(Vec<(String, String)>),
    Text {
        header: Option<String>,
        content: String,
    },
    Rules { title: String, rules: Vec<String> },
    /// JSON template the answer must follow
    Output(String),
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    sections: Vec<PromptSection>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, expertise: &str, task: &str) -> Self {
        self.sections.push(PromptSection::Role {
            expertise: expertise.to_string(),
            task: task.to_string(),
        });
        self
    }

    pub fn objectives(mut self, objectives: Vec<&str>) -> Self {
        self.sections.push(PromptSection::Objectives(
            objectives.into_iter().map(String::from).collect(),
        ));
        self
    }

    /// Add a context item, appending to the existing context section
    pub fn context_item(mut self, key: &str, value: impl Into<String>) -> Self {
        let item = (key.to_string(), value.into());
        let existing = self
            .sections
            .iter()
            .position(|s| matches!(s, PromptSection::Context(_)));
        match existing {
            Some(idx) => {
                if let PromptSection::Context(items) = &mut self.sections[idx] {
                    items.push(item);
                }
            }
            None => self.sections.push(PromptSection::Context(vec![item])),
        }
        self
    }

    pub fn text(mut self, content: &str) -> Self {
        self.sections.push(PromptSection::Text {
            header: None,
            content: content.to_string(),
        });
        self
    }

    pub fn section(mut self, header: &str, content: &str) -> Self {
        self.sections.push(PromptSection::Text {
            header: Some(header.to_string()),
            content: content.to_string(),
        });
        self
    }

    pub fn rules(mut self, title: &str, rules: Vec<&str>) -> Self {
        self.sections.push(PromptSection::Rules {
            title: title.to_string(),
            rules: rules.into_iter().map(String::from).collect(),
        });
        self
    }

    pub fn output_json(mut self, template: &str) -> Self {
        self.sections.push(PromptSection::Output(template.to_string()));
        self
    }

    pub fn build(self) -> String {
        let mut prompt = String::new();

        for section in self.sections {
            match section {
                PromptSection::Role { expertise, task } => {
                    prompt.push_str("<ROLE>\n");
                    prompt.push_str(&format!("You are a professional {} responsible for {}.\n", expertise, task));
                    prompt.push_str("</ROLE>\n\n");
                }
                PromptSection::Objectives(objectives) => {
                    prompt.push_str("<OBJECTIVES>\n");
                    for (i, obj) in objectives.iter().enumerate() {
                        prompt.push_str(&format!("{}. {}\n", i + 1, obj));
                    }
                    prompt.push_str("</OBJECTIVES>\n\n");
                }
                PromptSection::Context(items) => {
                    prompt.push_str("# Context\n\n");
                    for (key, value) in items {
                        prompt.push_str(&format!("**{}**: {}\n", key, value));
                    }
                    prompt.push('\n');
                }
                PromptSection::Text { header, content } => {
                    if let Some(h) = header {
                        prompt.push_str(&format!("# {}\n\n", h));
                    }
                    prompt.push_str(&content);
                    prompt.push_str("\n\n");
                }
                PromptSection::Rules { title, rules } => {
                    prompt.push_str(&format!("<{}>\n", title));
                    for rule in rules {
                        prompt.push_str(&format!("- {}\n", rule));
                    }
                    prompt.push_str(&format!("</{}>\n\n", title));
                }
                PromptSection::Output(template) => {
                    prompt.push_str("<OUTPUT>\n");
                    prompt.push_str("Respond with a single JSON object and nothing else. ");
                    prompt.push_str("No markdown, no code fences, no text before or after the JSON.\n");
                    prompt.push_str(&template);
                    prompt.push_str("\n</OUTPUT>\n\n");
                }
            }
        }

        prompt.trim_end().to_string()
    }
}

/// System prompts for the four agents
pub struct PromptTemplates;

impl PromptTemplates {
    pub fn technical(symbol: &str, timeframe: &str) -> String {
        PromptBuilder::new()
            .role("Forex technical analyst", "interpreting indicator snapshots")
            .objectives(vec![
                "Read the provided indicators (RSI, SMA, EMA, ATR, trend)",
                "Decide the directional bias and how confident the data allows you to be",
                "List the concrete evidence and any contradicting signals",
                "Flag conditions under which no trade should be taken",
            ])
            .context_item("Instrument", symbol)
            .context_item("Timeframe", timeframe)
            .rules(
                "RULES",
                vec![
                    "Analyze ONLY the instrument named above; never mention other currency pairs",
                    "Use ONLY the numbers provided; do not invent levels or indicators",
                    "confidence is a number between 0.0 and 1.0",
                    "Write in English",
                ],
            )
            .output_json(
                r#"{"bias":"BULLISH|BEARISH|NEUTRAL","confidence":0.0,"evidence":["..."],"contradictions":["..."],"setup_type":"... or null","no_trade_flags":["..."]}"#,
            )
            .build()
    }

    pub fn news() -> String {
        PromptBuilder::new()
            .role("Forex news analyst", "grounded headline assessment")
            .objectives(vec![
                "Summarize the news context in 2-3 sentences",
                "Judge sentiment for the currency pair: POS (bullish), NEG (bearish) or NEU",
                "Score the likely market impact from 0.0 (none) to 1.0 (high)",
            ])
            .rules(
                "CRITICAL_RULES",
                vec![
                    "Use ONLY the headlines provided; do NOT invent or assume information",
                    "If the headlines are insufficient or unclear, say so in the summary",
                    "evidence_titles must repeat EXACT headlines from the provided list",
                    "If sentiment cannot be determined, use NEU and impact_score 0.0",
                ],
            )
            .output_json(
                r#"{"summary":"...","sentiment":"POS|NEG|NEU","impact_score":0.0,"evidence_titles":["Exact title"]}"#,
            )
            .build()
    }

    pub fn synthesis() -> String {
        PromptBuilder::new()
            .role(
                "Forex research advisor",
                "combining technical and news analysis into one recommendation",
            )
            .objectives(vec![
                "Copy the decided action (CALL, PUT or WAIT) and decided confidence exactly",
                "Explain in a 2-3 sentence brief on a single line why the decided action fits the scores, reason codes, technical view and news",
            ])
            .rules(
                "NEWS_HANDLING",
                vec![
                    "News Quality LOW: ignore the news and rely on technical analysis only",
                    "News Quality MEDIUM: weigh news moderately; it must not override strong technical signals",
                    "News Quality HIGH: weigh news heavily; strong opposing news (impact >= 0.7) calls for WAIT or lower confidence",
                ],
            )
            .rules(
                "RULES",
                vec![
                    "The action and confidence are decided upstream; never change them",
                    "The brief is plain text: no newlines, no curly braces, no nested JSON",
                    "Never promise profits or certainty",
                    "Be objective and risk-aware; write in English",
                ],
            )
            .output_json(r#"{"action":"CALL|PUT|WAIT","confidence":0.0,"brief":"..."}"#)
            .build()
    }

    /// Re-ask used when a synthesis answer could not be used
    pub fn strict_json() -> String {
        PromptBuilder::new()
            .text("Return ONLY valid JSON. No markdown. No explanations. JSON must start with '{' and end with '}'.")
            .output_json(r#"{"action":"CALL|PUT|WAIT","confidence":0.0,"brief":"..."}"#)
            .build()
    }

    pub fn verifier() -> String {
        let forbidden = format!(
            "Forbidden phrases: {}",
            safety_constants::FORBIDDEN_PHRASES
                .iter()
                .map(|p| format!("\"{}\"", p))
                .collect::<Vec<_>>()
                .join(", ")
        );

        PromptBuilder::new()
            .role("compliance reviewer", "verifying research recommendations")
            .objectives(vec![
                "Find claims in the author output not supported by the input summary",
                "Find policy violations",
                "Find inconsistencies between the action, confidence and brief",
                "Find missing or malformed fields",
            ])
            .rules(
                "POLICY",
                vec![
                    forbidden.as_str(),
                    "No promises of profit or certainty of outcome",
                    "Output is research only; it must not read as an instruction to execute a trade",
                ],
            )
            .rules(
                "SEVERITY",
                vec![
                    "high: policy violation or action contradicting the evidence",
                    "medium: unsupported claim",
                    "low: wording or minor inconsistency",
                ],
            )
            .output_json(
                r#"{"passed":true,"issues":[{"code":"...","message":"...","severity":"low|medium|high","evidence":"... or null"}],"suggested_fix":"... or null","policy_version":"1.0"}"#,
            )
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_prompt() {
        let prompt = PromptBuilder::new()
            .role("analyst", "testing")
            .objectives(vec!["First", "Second"])
            .build();

        assert!(prompt.contains("<ROLE>"));
        assert!(prompt.contains("1. First"));
        assert!(prompt.contains("2. Second"));
    }

    #[test]
    fn test_context_items_keep_order() {
        let prompt = PromptBuilder::new()
            .context_item("Instrument", "EUR/USD")
            .context_item("Timeframe", "1h")
            .build();

        let instrument = prompt.find("**Instrument**: EUR/USD").unwrap();
        let timeframe = prompt.find("**Timeframe**: 1h").unwrap();
        assert!(instrument < timeframe);
        assert_eq!(prompt.matches("# Context").count(), 1);
    }

    #[test]
    fn test_rules_and_output() {
        let prompt = PromptBuilder::new()
            .rules("RULES", vec!["Be terse"])
            .output_json(r#"{"a":1}"#)
            .build();
        assert!(prompt.contains("<RULES>\n- Be terse\n</RULES>"));
        assert!(prompt.contains("<OUTPUT>"));
        assert!(prompt.ends_with("</OUTPUT>"));
    }

    #[test]
    fn test_templates_name_their_schema() {
        assert!(PromptTemplates::technical("EUR/USD", "1h").contains("**Instrument**: EUR/USD"));
        assert!(PromptTemplates::news().contains("evidence_titles"));
        assert!(PromptTemplates::synthesis().contains(r#""action":"CALL|PUT|WAIT""#));
        assert!(PromptTemplates::synthesis().contains("never change them"));
        assert!(PromptTemplates::strict_json().starts_with("Return ONLY valid JSON"));
        assert!(PromptTemplates::verifier().contains("\"guaranteed profit\""));
    }
}
