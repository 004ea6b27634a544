use crate::error::{AtlasError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub predict: PredictConfig,
    #[serde(default)]
    pub files: FileSourcesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    /// Hard cap on listing pages fetched per scraped source.
    pub page_limit: u32,
    pub requests_per_minute: u64,
    pub max_concurrency: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_retries: 3,
            backoff_ms: 500,
            page_limit: 12,
            requests_per_minute: 30,
            max_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    pub batch_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        // One hour, matching the dashboard refresh window
        Self { ttl_seconds: 3600 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictConfig {
    pub model_path: String,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            model_path: "model/engagement_model.json".to_string(),
        }
    }
}

/// Paths to the delimited tabular inputs, one per dataset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileSourcesConfig {
    pub video_games: Option<String>,
    pub steam_titles: Option<String>,
    pub gaming_trends: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    pub fn load_from(config_path: &str) -> Result<Self> {
        if !Path::new(config_path).exists() {
            return Ok(Self::default());
        }
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            AtlasError::Config(format!("Failed to read config file '{config_path}': {e}"))
        })?;

        let config: Config = toml::from_str(&config_content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.loader.batch_size == 0 {
            return Err(AtlasError::Config("loader.batch_size must be positive".into()));
        }
        if self.fetch.max_concurrency == 0 {
            return Err(AtlasError::Config("fetch.max_concurrency must be positive".into()));
        }
        if self.fetch.timeout_seconds == 0 {
            return Err(AtlasError::Config("fetch.timeout_seconds must be positive".into()));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            loader: LoaderConfig::default(),
            cache: CacheConfig::default(),
            predict: PredictConfig::default(),
            files: FileSourcesConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_for_missing_sections() {
        let config: Config = toml::from_str("[fetch]\ntimeout_seconds = 10\nmax_retries = 1\nbackoff_ms = 100\npage_limit = 2\nrequests_per_minute = 10\nmax_concurrency = 2\n").unwrap();
        assert_eq!(config.fetch.page_limit, 2);
        assert_eq!(config.cache.ttl_seconds, 3600);
        assert_eq!(config.loader.batch_size, 100);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[loader]\nbatch_size = 0").unwrap();
        let err = Config::load_from(file.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }
}
