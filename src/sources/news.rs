//! News Sources
//!
//! [`NewsApiSource`] queries NewsAPI twice per symbol (pair terms and
//! central-bank/macro terms), then filters, de-duplicates and ranks the
//! headlines before grading the digest.
//!
//! ## Quality grading
//!
//! | Quality | Condition |
//! |---------|-----------|
//! | HIGH | at least 5 headlines scoring >= 0.55 |
//! | MEDIUM | at least 2 highly relevant, or 2 kept headlines in total |
//! | LOW | anything less |

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::ai::backend::validate_endpoint;
use crate::constants::{network as net_constants, sources as source_constants};
use crate::types::{FxError, NewsArticle, NewsDigest, NewsQuality, Result};

#[async_trait]
pub trait NewsSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_digest(&self, symbol: &str, window_hours: u32) -> Result<NewsDigest>;
}

// =============================================================================
// Disabled
// =============================================================================

/// Always yields an empty LOW digest
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledNewsSource;

#[async_trait]
impl NewsSource for DisabledNewsSource {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn fetch_digest(&self, symbol: &str, window_hours: u32) -> Result<NewsDigest> {
        Ok(NewsDigest::degraded(symbol, window_hours, "News source disabled"))
    }
}

// =============================================================================
// Currency vocabulary
// =============================================================================

struct Currency {
    code: &'static str,
    names: &'static [&'static str],
    banks: &'static [&'static str],
}

const CURRENCIES: &[Currency] = &[
    Currency { code: "EUR", names: &["euro", "eur"], banks: &["ecb", "european central bank"] },
    Currency { code: "USD", names: &["dollar", "usd"], banks: &["fed", "federal reserve"] },
    Currency { code: "GBP", names: &["pound", "gbp", "sterling"], banks: &["boe", "bank of england"] },
    Currency { code: "JPY", names: &["yen", "jpy"], banks: &["boj", "bank of japan"] },
    Currency { code: "AUD", names: &["australian dollar", "aud"], banks: &["rba", "reserve bank of australia"] },
    Currency { code: "CAD", names: &["canadian dollar", "cad"], banks: &["boc", "bank of canada"] },
    Currency { code: "CHF", names: &["swiss franc", "chf"], banks: &["snb", "swiss national bank"] },
    Currency { code: "NZD", names: &["new zealand dollar", "nzd"], banks: &["rbnz", "reserve bank of new zealand"] },
];

const FX_ANCHORS: &[&str] = &["forex", "fx", "currency", "exchange rate", "foreign exchange"];
const MACRO_KEYWORDS: &[&str] = &[
    "cpi", "inflation", "rates", "yields", "jobs", "nfp", "gdp", "pmi", "employment",
];
const BLACKLIST: &[&str] = &[
    "exchange rates today",
    "currency converter",
    "live rates",
    "today's rates",
    "current exchange rate",
];

/// Base and quote vocabulary for a pair such as `EUR/USD` or `eurusd`
struct PairTerms {
    base: String,
    quote: String,
    names: (Vec<String>, Vec<String>),
    banks: Vec<String>,
}

impl PairTerms {
    fn new(symbol: &str) -> Self {
        let compact: String = symbol
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_uppercase();
        let base = compact.get(..3).unwrap_or("").to_string();
        let quote = compact.get(3..6).unwrap_or("").to_string();

        let lookup = |code: &str| CURRENCIES.iter().find(|c| c.code == code);
        let names_for = |code: &str| -> Vec<String> {
            match lookup(code) {
                Some(c) => c.names.iter().map(|n| n.to_string()).collect(),
                None if code.is_empty() => Vec::new(),
                None => vec![code.to_lowercase()],
            }
        };
        let banks: Vec<String> = [base.as_str(), quote.as_str()]
            .into_iter()
            .filter_map(lookup)
            .flat_map(|c| c.banks.iter().map(|b| b.to_string()))
            .collect();

        Self {
            names: (names_for(&base), names_for(&quote)),
            base,
            quote,
            banks,
        }
    }

    /// NewsAPI query strings tagged by purpose
    fn queries(&self) -> Vec<(&'static str, String)> {
        let anchors = r#"forex OR fx OR currency OR "exchange rate""#;
        let mut queries = Vec::new();

        if !self.base.is_empty() && !self.quote.is_empty() {
            let base_name = self.names.0.first().cloned().unwrap_or_default();
            let quote_name = self.names.1.first().cloned().unwrap_or_default();
            queries.push((
                "pair",
                format!(
                    r#"({}{} OR "{}/{}" OR ({} AND {})) AND ({})"#,
                    self.base, self.quote, self.base, self.quote, base_name, quote_name, anchors
                ),
            ));
        }

        if !self.banks.is_empty() {
            let banks: Vec<String> = self
                .banks
                .iter()
                .map(|b| if b.contains(' ') { format!("\"{}\"", b) } else { b.to_uppercase() })
                .collect();
            queries.push((
                "macro",
                format!(
                    r#"({} OR CPI OR inflation OR "interest rate" OR yields OR NFP OR GDP OR PMI) AND ({})"#,
                    banks.join(" OR "),
                    anchors
                ),
            ));
        }

        queries
    }
}

// =============================================================================
// Ranking
// =============================================================================

#[derive(Debug, Clone)]
struct ScoredArticle {
    article: NewsArticle,
    score: f64,
}

fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop noise and duplicates, then score what remains; best first
fn rank_articles(
    articles: Vec<NewsArticle>,
    terms: &PairTerms,
    now: DateTime<Utc>,
    window_hours: u32,
) -> Vec<ScoredArticle> {
    let mut seen = HashSet::new();
    let mut dropped = 0usize;
    let mut ranked = Vec::new();
    let cutoff = now - chrono::Duration::hours(i64::from(window_hours));

    for article in articles {
        let lower = article.title.to_lowercase();
        let normalized = normalize_title(&article.title);

        let stale = article.published_at.is_some_and(|t| t < cutoff);
        if stale
            || normalized.chars().count() < source_constants::MIN_TITLE_CHARS
            || BLACKLIST.iter().any(|p| lower.contains(p))
            || !seen.insert(normalized)
        {
            dropped += 1;
            continue;
        }

        let mentions = |words: &[String]| words.iter().any(|w| lower.contains(w.as_str()));
        let base_hit = mentions(&terms.names.0);
        let quote_hit = mentions(&terms.names.1);
        let bank_hit = mentions(&terms.banks);
        let macro_hit = MACRO_KEYWORDS.iter().any(|k| lower.contains(k));
        let anchor_hit = FX_ANCHORS.iter().any(|a| lower.contains(a));

        if !(anchor_hit || base_hit || quote_hit || bank_hit || macro_hit) {
            dropped += 1;
            continue;
        }

        let mut score: f64 = 0.0;
        if base_hit && quote_hit {
            score += 0.3;
        } else if base_hit || quote_hit {
            score += 0.15;
        }
        if bank_hit {
            score += 0.2;
        }
        if macro_hit {
            score += 0.2;
        }
        if article
            .published_at
            .is_some_and(|t| now.signed_duration_since(t) < chrono::Duration::hours(4))
        {
            score += 0.1;
        }

        ranked.push(ScoredArticle {
            article,
            score: score.clamp(0.0, 1.0),
        });
    }

    if dropped > 0 {
        debug!(dropped, kept = ranked.len(), "Filtered headlines");
    }
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

fn grade(top: &[ScoredArticle]) -> (NewsQuality, String) {
    let relevant = top
        .iter()
        .filter(|a| a.score >= source_constants::RELEVANT_SCORE)
        .count();

    match NewsQuality::from_relevant_count(relevant) {
        NewsQuality::High => (
            NewsQuality::High,
            format!("Found {} highly relevant articles (score >= {})", relevant, source_constants::RELEVANT_SCORE),
        ),
        _ if relevant >= 2 || top.len() >= 2 => (
            NewsQuality::Medium,
            format!("Found {} highly relevant articles, {} total after filtering", relevant, top.len()),
        ),
        _ => (
            NewsQuality::Low,
            "Not enough relevant articles after filtering".to_string(),
        ),
    }
}

// =============================================================================
// NewsAPI
// =============================================================================

pub struct NewsApiSource {
    api_key: SecretString,
    base_url: String,
    page_size: usize,
    client: reqwest::Client,
}

impl std::fmt::Debug for NewsApiSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewsApiSource")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("page_size", &self.page_size)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct EverythingResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<RawArticle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArticle {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    source: Option<RawSource>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    #[serde(default)]
    name: Option<String>,
}

impl RawArticle {
    fn into_article(self) -> Option<NewsArticle> {
        let title = self.title?.trim().to_string();
        if title.is_empty() {
            return None;
        }
        Some(NewsArticle {
            title,
            source: self
                .source
                .and_then(|s| s.name)
                .map(|n| n.trim().to_string())
                .unwrap_or_default(),
            url: self.url.filter(|u| !u.trim().is_empty()),
            published_at: self.published_at,
        })
    }
}

impl NewsApiSource {
    pub fn new(api_key: String, base_url: &str, page_size: usize) -> Result<Self> {
        let base_url = validate_endpoint(base_url, "NewsAPI")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(net_constants::DATA_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| FxError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key: SecretString::from(api_key),
            base_url,
            page_size: page_size.clamp(1, 100),
            client,
        })
    }

    async fn search(&self, query: &str, from: DateTime<Utc>) -> Result<Vec<NewsArticle>> {
        let page_size = self.page_size.to_string();
        let from = from.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let body: EverythingResponse = self
            .client
            .get(format!("{}/v2/everything", self.base_url))
            .query(&[
                ("q", query),
                ("language", "en"),
                ("sortBy", "publishedAt"),
                ("pageSize", page_size.as_str()),
                ("from", from.as_str()),
                ("apiKey", self.api_key.expose_secret()),
            ])
            .send()
            .await?
            .json()
            .await?;

        if body.status != "ok" {
            return Err(FxError::DataSource(format!(
                "NewsAPI error: {}",
                body.message.unwrap_or_else(|| body.status.clone())
            )));
        }

        Ok(body.articles.into_iter().filter_map(RawArticle::into_article).collect())
    }
}

#[async_trait]
impl NewsSource for NewsApiSource {
    fn name(&self) -> &str {
        "newsapi"
    }

    /// Fails only when every query fails
    #[instrument(skip(self), fields(source = "newsapi"))]
    async fn fetch_digest(&self, symbol: &str, window_hours: u32) -> Result<NewsDigest> {
        let terms = PairTerms::new(symbol);
        let now = Utc::now();
        let from = now - chrono::Duration::hours(i64::from(window_hours));

        let mut candidates = Vec::new();
        let mut last_error = None;
        let queries = terms.queries();
        for (tag, query) in &queries {
            match self.search(query, from).await {
                Ok(found) => {
                    debug!(tag, count = found.len(), "News query done");
                    candidates.extend(found);
                }
                Err(e) => {
                    warn!(tag, error = %e, "News query failed");
                    last_error = Some(e);
                }
            }
        }

        if candidates.is_empty()
            && let Some(err) = last_error
        {
            return Err(err);
        }

        let mut ranked = rank_articles(candidates, &terms, now, window_hours);
        ranked.truncate(source_constants::DIGEST_ARTICLES);
        let (quality, quality_reason) = grade(&ranked);

        Ok(NewsDigest {
            symbol: symbol.to_string(),
            window_hours,
            articles: ranked.into_iter().map(|s| s.article).collect(),
            quality,
            quality_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(title: &str, hours_ago: i64, now: DateTime<Utc>) -> NewsArticle {
        NewsArticle {
            title: title.to_string(),
            source: "Wire".to_string(),
            url: None,
            published_at: Some(now - chrono::Duration::hours(hours_ago)),
        }
    }

    #[test]
    fn test_pair_terms() {
        let terms = PairTerms::new("EUR/USD");
        assert_eq!(terms.base, "EUR");
        assert_eq!(terms.quote, "USD");
        assert!(terms.banks.contains(&"ecb".to_string()));

        let queries = terms.queries();
        assert_eq!(queries.len(), 2);
        assert!(queries[0].1.starts_with(r#"(EURUSD OR "EUR/USD" OR (euro AND dollar))"#));
        assert!(queries[1].1.contains(r#"ECB OR "european central bank" OR FED"#));
    }

    #[test]
    fn test_unknown_pair_has_no_macro_query() {
        let queries = PairTerms::new("XAUXAG").queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].0, "pair");
    }

    #[test]
    fn test_rank_filters_and_orders() {
        let now = Utc::now();
        let terms = PairTerms::new("EURUSD");
        let ranked = rank_articles(
            vec![
                article("Euro climbs against dollar after ECB inflation data", 1, now),
                article("Euro climbs against dollar after ECB inflation data!", 1, now),
                article("Live rates: currency converter", 1, now),
                article("Local team wins championship", 1, now),
                article("Short", 1, now),
                article("Dollar steady ahead of jobs report", 2, now),
                article("Euro slips as yields rise", 30, now),
            ],
            &terms,
            now,
            24,
        );

        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].article.title.starts_with("Euro climbs"));
        // pair 0.3 + bank 0.2 + macro 0.2 + fresh 0.1
        assert!((ranked[0].score - 0.8).abs() < 1e-9);
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn test_grade() {
        let scored = |score: f64| ScoredArticle {
            article: article("Euro climbs against dollar", 1, Utc::now()),
            score,
        };

        assert_eq!(grade(&vec![scored(0.8); 5]).0, NewsQuality::High);
        assert_eq!(grade(&[scored(0.2), scored(0.2)]).0, NewsQuality::Medium);
        assert_eq!(grade(&[scored(0.9)]).0, NewsQuality::Low);
        assert_eq!(grade(&[]).0, NewsQuality::Low);
    }

    #[test]
    fn test_raw_article_conversion() {
        let raw: RawArticle = serde_json::from_str(
            r#"{"title": "  ECB holds rates  ", "url": "", "source": {"name": "Reuters"}, "publishedAt": "2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        let article = raw.into_article().unwrap();
        assert_eq!(article.title, "ECB holds rates");
        assert_eq!(article.source, "Reuters");
        assert!(article.url.is_none());
        assert!(article.published_at.is_some());

        let raw: RawArticle = serde_json::from_str(r#"{"title": null}"#).unwrap();
        assert!(raw.into_article().is_none());
    }

    #[tokio::test]
    async fn test_disabled_source() {
        let digest = DisabledNewsSource.fetch_digest("EURUSD", 24).await.unwrap();
        assert!(digest.is_low());
        assert_eq!(digest.quality_reason, "News source disabled");
    }
}
