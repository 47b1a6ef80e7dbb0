pub mod market_url;

pub use market_url::{normalize_legacy_slug, resolve, ResolveError, ResolvedMarket};
