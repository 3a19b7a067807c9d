//! Anatomica Assets - zone-scoped mesh streaming
//!
//! - [`cache`]: the zone asset cache (load, preload, delayed eviction)
//! - [`http`]: HTTP patient data provider with local catalog fallback

pub mod cache;
pub mod http;

pub use cache::{CacheConfig, Liveness, ZoneAssetCache};
pub use http::HttpCatalog;
