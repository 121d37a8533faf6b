//! News Analyst

use tracing::{debug, instrument, warn};

use super::prompt::PromptTemplates;
use super::{AgentContext, AgentRun};
use crate::ai::{ExpectedFormat, Task};
use crate::types::{NewsDigest, NewsView, Sentiment, json_f64, json_string, json_string_array};

const REQUIRED_KEYS: &[&str] = &["summary", "sentiment", "impact_score"];
const NOT_ENOUGH_NEWS: &str = "Not enough relevant news";
const PARSE_FAILED: &str = "Failed to parse LLM output";

pub struct NewsAnalyst {
    ctx: AgentContext,
}

impl NewsAnalyst {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }

    /// Assess a digest; never fails, only degrades to a neutral view
    #[instrument(skip(self, digest), fields(symbol = %digest.symbol, quality = %digest.quality))]
    pub async fn analyze(&self, digest: &NewsDigest) -> AgentRun<NewsView> {
        if digest.is_low() || digest.articles.is_empty() {
            debug!("Skipping news analysis");
            return AgentRun::offline(NewsView::neutral(NOT_ENOUGH_NEWS));
        }

        let request = self.ctx.router.prepare(
            Task::NewsAnalysis,
            PromptTemplates::news(),
            user_prompt(digest),
            ExpectedFormat::json(REQUIRED_KEYS),
        );
        let exchange = self.ctx.router.exchange(self.ctx.branch, request).await;

        let view = match exchange.response.json_or_error() {
            Ok(json) => parse_view(json, &digest.titles()),
            Err(e) => {
                warn!(error = %e, "News analysis failed, using neutral view");
                NewsView::neutral(PARSE_FAILED)
            }
        };

        AgentRun::routed(view, exchange)
    }
}

fn user_prompt(digest: &NewsDigest) -> String {
    let headlines: Vec<String> = digest
        .articles
        .iter()
        .map(|a| {
            if a.source.is_empty() {
                format!("- {}", a.title)
            } else {
                format!("- {} (Source: {})", a.title, a.source)
            }
        })
        .collect();

    format!(
        "Analyze the following news headlines for {}:\n\n{}\n\nProvide your analysis as JSON.",
        digest.symbol,
        headlines.join("\n")
    )
}

fn parse_view(json: &serde_json::Value, available: &[&str]) -> NewsView {
    let Some(summary) = json_string(json, "summary") else {
        return NewsView::neutral(PARSE_FAILED);
    };

    let sentiment = json_string(json, "sentiment")
        .map(|s| Sentiment::parse_lenient(&s))
        .unwrap_or_default();
    let impact_score = json_f64(json, "impact_score")
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    let evidence_titles = json_string_array(json, "evidence_titles")
        .into_iter()
        .filter(|t| available.contains(&t.as_str()))
        .collect();

    NewsView {
        summary,
        sentiment,
        impact_score,
        evidence_titles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{context, failing_context};
    use crate::types::{NewsArticle, NewsQuality};
    use serde_json::json;

    fn digest(titles: &[&str], quality: NewsQuality) -> NewsDigest {
        NewsDigest {
            symbol: "EURUSD".to_string(),
            window_hours: 24,
            articles: titles
                .iter()
                .map(|t| NewsArticle {
                    title: t.to_string(),
                    source: "Reuters".to_string(),
                    url: None,
                    published_at: None,
                })
                .collect(),
            quality,
            quality_reason: "test".to_string(),
        }
    }

    #[test]
    fn test_parse_view_normalizes() {
        let view = parse_view(
            &json!({
                "summary": "ECB hawkish",
                "sentiment": "bullish",
                "impact_score": 1.7,
                "evidence_titles": ["ECB holds rates", "Invented headline"]
            }),
            &["ECB holds rates", "Dollar slips"],
        );
        assert_eq!(view.sentiment, Sentiment::Neutral);
        assert_eq!(view.impact_score, 1.0);
        assert_eq!(view.evidence_titles, vec!["ECB holds rates"]);
    }

    #[test]
    fn test_user_prompt_lists_sources() {
        let prompt = user_prompt(&digest(&["ECB holds rates"], NewsQuality::Medium));
        assert!(prompt.contains("- ECB holds rates (Source: Reuters)"));
        assert!(prompt.starts_with("Analyze the following news headlines for EURUSD"));
    }

    #[tokio::test]
    async fn test_low_quality_skips_model() {
        let (ctx, backend) = context(&["{}"]);
        let run = NewsAnalyst::new(ctx)
            .analyze(&digest(&["ECB holds rates"], NewsQuality::Low))
            .await;
        assert_eq!(run.output.summary, NOT_ENOUGH_NEWS);
        assert!(run.exchange.is_none());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_digest_skips_model() {
        let (ctx, backend) = context(&["{}"]);
        let run = NewsAnalyst::new(ctx).analyze(&digest(&[], NewsQuality::High)).await;
        assert_eq!(run.output.sentiment, Sentiment::Neutral);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_analyze_success() {
        let (ctx, _) = context(&[
            r#"{"summary":"Dollar weakens","sentiment":"POS","impact_score":0.4,"evidence_titles":["Dollar slips"]}"#,
        ]);
        let run = NewsAnalyst::new(ctx)
            .analyze(&digest(&["Dollar slips", "ECB holds rates"], NewsQuality::Medium))
            .await;
        assert_eq!(run.output.sentiment, Sentiment::Positive);
        assert_eq!(run.output.impact_score, 0.4);
        assert!(run.exchange.is_some());
    }

    #[tokio::test]
    async fn test_failure_degrades() {
        let run = NewsAnalyst::new(failing_context())
            .analyze(&digest(&["Dollar slips", "ECB holds rates"], NewsQuality::High))
            .await;
        assert_eq!(run.output, NewsView::neutral(PARSE_FAILED));
        assert!(run.exchange.unwrap().error().is_some());
    }
}
