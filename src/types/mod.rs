pub mod analysis;
pub mod error;
pub mod market;
pub mod news;
pub mod run;
pub mod utils;

pub use analysis::*;
pub use error::{BackendFailure, FailureKind, FxError, Result, ResultExt, RouteError};
pub use market::{Candle, Timeframe, normalize_symbol};
pub use news::{NewsArticle, NewsDigest, NewsQuality};
pub use run::{Run, RunId, RunStatus};
pub use utils::{
    json_bool, json_f64, json_string, json_string_array, json_string_or, preview, truncate_chars,
};
