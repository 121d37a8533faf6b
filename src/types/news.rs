//! News Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How much the news digest can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NewsQuality {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for NewsQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

impl NewsQuality {
    /// Quality from the number of relevant headlines
    pub fn from_relevant_count(count: usize) -> Self {
        match count {
            0..=1 => Self::Low,
            2..=4 => Self::Medium,
            _ => Self::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub title: String,
    pub source: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

/// Headlines for one symbol over a lookback window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsDigest {
    pub symbol: String,
    pub window_hours: u32,
    pub articles: Vec<NewsArticle>,
    pub quality: NewsQuality,
    pub quality_reason: String,
}

impl NewsDigest {
    /// LOW digest used when news cannot be obtained
    pub fn degraded(symbol: &str, window_hours: u32, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            window_hours,
            articles: Vec::new(),
            quality: NewsQuality::Low,
            quality_reason: reason.into(),
        }
    }

    pub fn is_low(&self) -> bool {
        self.quality == NewsQuality::Low
    }

    pub fn titles(&self) -> Vec<&str> {
        self.articles.iter().map(|a| a.title.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_thresholds() {
        assert_eq!(NewsQuality::from_relevant_count(0), NewsQuality::Low);
        assert_eq!(NewsQuality::from_relevant_count(1), NewsQuality::Low);
        assert_eq!(NewsQuality::from_relevant_count(2), NewsQuality::Medium);
        assert_eq!(NewsQuality::from_relevant_count(5), NewsQuality::High);
    }

    #[test]
    fn test_degraded_digest_is_low_and_empty() {
        let digest = NewsDigest::degraded("EUR/USD", 24, "Provider error: boom");
        assert!(digest.is_low());
        assert!(digest.articles.is_empty());
        assert_eq!(digest.quality_reason, "Provider error: boom");
    }
}
