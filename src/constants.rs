//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Router constants
pub mod router {
    /// Global default timeout for one backend call (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

    /// Default sampling temperature
    pub const DEFAULT_TEMPERATURE: f32 = 0.2;

    /// Extra attempts against the same candidate after an invalid response
    pub const DEFAULT_INVALID_RESPONSE_RETRIES: u8 = 1;

    /// Maximum explicit candidates per (task, branch)
    pub const MAX_CANDIDATES: usize = 4;

    /// Backend used when a routing table names nothing else
    pub const LAST_RESORT_BACKEND: &str = "ollama_local";

    /// Model used when a routing table names nothing else
    pub const LAST_RESORT_MODEL: &str = "llama3:latest";
}

/// Health cache constants
pub mod health {
    /// Seconds an availability observation stays trusted
    pub const DEFAULT_TTL_SECS: u64 = 30;
}

/// Backend adapter constants
pub mod backend {
    /// Default Ollama endpoint for the local branch
    pub const OLLAMA_LOCAL_URL: &str = "http://localhost:11434";

    /// Default DeepSeek API base
    pub const DEEPSEEK_API_BASE: &str = "https://api.deepseek.com";

    /// Timeout for health checks (seconds)
    pub const HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;

    /// Connection timeout for HTTP clients (seconds)
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
}

/// Pipeline constants
pub mod pipeline {
    /// Candles requested from the market data source
    pub const WINDOW_CANDLES: usize = 300;

    /// Minimum candles required to compute features
    pub const MIN_CANDLES: usize = 200;

    /// News lookback window (hours)
    pub const NEWS_WINDOW_HOURS: u32 = 24;

    /// Maximum headlines fetched per digest
    pub const MAX_NEWS_ARTICLES: usize = 20;

    /// Headlines shown to the synthesizer
    pub const SYNTHESIS_HEADLINES: usize = 5;

    /// Characters of each rationale included in verifier input
    pub const VERIFIER_SUMMARY_CHARS: usize = 200;

    /// Confidence ceiling when the news digest is LOW quality
    pub const MAX_CONFIDENCE_WHEN_NEWS_LOW: f64 = 0.6;

    /// Strict-JSON re-asks after an unusable synthesis answer
    pub const SYNTHESIS_CORRECTIVE_RETRIES: u8 = 2;

    /// Brief used when no synthesis answer could be parsed
    pub const FALLBACK_BRIEF: &str =
        "Model output could not be parsed; explanation not synthesized. See the synthesis rationale for the raw output.";

    /// Gap multiplier over the smallest candle step before flagging a gap
    pub const GAP_TOLERANCE: f64 = 1.5;
}

/// Deterministic decision constants
pub mod decision {
    /// Bull/bear score gap required for CALL or PUT
    pub const MIN_TRADE_EDGE: f64 = 15.0;

    /// No-trade score above which the action is WAIT
    pub const MAX_NO_TRADE_SCORE: f64 = 40.0;

    /// Crossovers older than this many bars are stale
    pub const CROSSOVER_MAX_AGE_BARS: usize = 10;

    /// ATR percent of price below which volatility is low
    pub const ATR_PCT_LOW_THRESHOLD: f64 = 0.08;

    /// Candles below which history counts as insufficient
    pub const FULL_HISTORY_CANDLES: usize = 200;

    /// Confidence ceiling when the no-trade score forces WAIT
    pub const NO_TRADE_MAX_CONFIDENCE: f64 = 0.4;

    /// Confidence factor when neither side has the edge
    pub const UNDECIDED_CONFIDENCE_FACTOR: f64 = 0.7;

    /// Confidence factor when trend and structure disagree
    pub const CONFLICT_CONFIDENCE_FACTOR: f64 = 0.8;

    /// Confidence ceiling for any WAIT
    pub const MAX_WAIT_CONFIDENCE: f64 = 0.5;
}

/// Verification constants
pub mod verification {
    /// Default maximum repair iterations
    pub const DEFAULT_MAX_REPAIRS: u32 = 1;

    /// Policy version stamped on verification reports
    pub const POLICY_VERSION: &str = "1.0";
}

/// Safety policy constants
pub mod safety {
    /// Confidence ceiling after a forbidden phrase is removed
    pub const FORBIDDEN_PHRASE_MAX_CONFIDENCE: f64 = 0.3;

    /// Phrases never allowed in a recommendation brief
    pub const FORBIDDEN_PHRASES: &[&str] = &["guaranteed profit", "sure win"];

    /// Disclaimer appended to every brief
    pub const DISCLAIMER: &str =
        "Research output only. Not financial advice. Manual execution required.";
}

/// HTTP/Network constants
pub mod network {
    /// Timeout for market data and news requests (seconds)
    pub const DATA_REQUEST_TIMEOUT_SECS: u64 = 30;

    /// Maximum retries for data source requests
    pub const MAX_NETWORK_RETRIES: usize = 3;

    /// Base delay for data source retry backoff (milliseconds)
    pub const RETRY_BASE_DELAY_MS: u64 = 500;
}

/// Market data and news source constants
pub mod sources {
    /// Twelve Data REST base URL
    pub const TWELVE_DATA_BASE_URL: &str = "https://api.twelvedata.com";

    /// Environment variable holding the Twelve Data key
    pub const TWELVE_DATA_KEY_ENV: &str = "TWELVE_DATA_API_KEY";

    /// NewsAPI base URL
    pub const NEWSAPI_BASE_URL: &str = "https://newsapi.org";

    /// Environment variable holding the NewsAPI key
    pub const NEWSAPI_KEY_ENV: &str = "NEWSAPI_KEY";

    /// Directory scanned by the file market source
    pub const DEFAULT_FILE_DIR: &str = "data";

    /// Relevance score at which a headline counts as highly relevant
    pub const RELEVANT_SCORE: f64 = 0.55;

    /// Headlines kept in a digest after ranking
    pub const DIGEST_ARTICLES: usize = 10;

    /// Titles shorter than this are dropped as noise
    pub const MIN_TITLE_CHARS: usize = 10;
}
