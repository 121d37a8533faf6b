//! External Data Sources
//!
//! Market candles and news digests sit behind async traits so the pipeline
//! can run against live APIs, recorded files, or test doubles.

mod market;
mod news;

use std::sync::Arc;

use tracing::warn;

pub use market::{JsonFileSource, MarketDataSource, TwelveDataSource};
pub use news::{DisabledNewsSource, NewsApiSource, NewsSource};

use crate::config::{MarketConfig, MarketSourceKind, NewsConfig, NewsSourceKind};
use crate::constants::sources as source_constants;
use crate::types::{FxError, Result};

/// Build the configured market data source
pub fn create_market_source(config: &MarketConfig) -> Result<Arc<dyn MarketDataSource>> {
    match config.source {
        MarketSourceKind::TwelveData => {
            let api_key = config.resolve_api_key().ok_or_else(|| {
                FxError::Config(format!(
                    "Twelve Data requires an API key (market.api_key or {})",
                    source_constants::TWELVE_DATA_KEY_ENV
                ))
            })?;
            Ok(Arc::new(TwelveDataSource::new(api_key, &config.base_url)?))
        }
        MarketSourceKind::File => Ok(Arc::new(JsonFileSource::new(&config.file_dir))),
    }
}

/// Build the configured news source
///
/// A missing NewsAPI key is not fatal: news is optional context, so the run
/// proceeds with a disabled source and a LOW digest.
pub fn create_news_source(config: &NewsConfig) -> Result<Arc<dyn NewsSource>> {
    match config.source {
        NewsSourceKind::Newsapi => match config.resolve_api_key() {
            Some(api_key) => Ok(Arc::new(NewsApiSource::new(
                api_key,
                &config.base_url,
                config.max_articles,
            )?)),
            None => {
                warn!(
                    env = source_constants::NEWSAPI_KEY_ENV,
                    "No NewsAPI key configured, news analysis disabled"
                );
                Ok(Arc::new(DisabledNewsSource))
            }
        },
        NewsSourceKind::Disabled => Ok(Arc::new(DisabledNewsSource)),
    }
}
