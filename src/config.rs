use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::HarvestError;

pub const DEFAULT_CONFIG_FILE: &str = "maris-rh.json";
pub const DEFAULT_MAX_HOPS: u8 = 3;
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_CACHE_EXPIRY_DAYS: u32 = 30;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub seed_url: Option<String>,
    #[serde(default)]
    pub code_search_queries: Vec<String>,
    #[serde(default)]
    pub records_queries: Vec<String>,
    #[serde(default)]
    pub max_hops: Option<u8>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub cache_expiry_days: Option<u32>,
    #[serde(default)]
    pub output_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub seed_url: String,
    pub code_search_queries: Vec<String>,
    pub records_queries: Vec<String>,
    pub max_hops: u8,
    pub concurrency: usize,
    pub cache_expiry_days: u32,
    pub output_dir: String,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HarvestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(HarvestError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| HarvestError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, HarvestError> {
        let seed_url = config.seed_url.ok_or(HarvestError::MissingSeedUrl)?;
        let seed_url = seed_url.trim().to_string();
        if seed_url.is_empty() {
            return Err(HarvestError::MissingSeedUrl);
        }
        Url::parse(&seed_url).map_err(|_| HarvestError::InvalidSeedUrl(seed_url.clone()))?;

        let max_hops = config.max_hops.unwrap_or(DEFAULT_MAX_HOPS);
        let concurrency = config.concurrency.unwrap_or(DEFAULT_CONCURRENCY).max(1);

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            seed_url,
            code_search_queries: config.code_search_queries,
            records_queries: config.records_queries,
            max_hops,
            concurrency,
            cache_expiry_days: config.cache_expiry_days.unwrap_or(DEFAULT_CACHE_EXPIRY_DAYS),
            output_dir: config.output_dir.unwrap_or_else(|| "harvest".to_string()),
        })
    }
}
