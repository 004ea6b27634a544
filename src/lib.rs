pub mod aggregate;
pub mod cache;
pub mod config;
#[cfg(feature = "db")]
pub mod db;
pub mod error;
pub mod loader;
pub mod logging;
pub mod normalize;
pub mod pipeline;
pub mod predict;
pub mod rate_limiter;
pub mod sources;
pub mod storage;
pub mod types;
