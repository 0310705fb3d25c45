//! Records-API resolver. The API declares file size and checksum
//! itself, so its candidates are trusted and skip sniffing.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::domain::{BackendKind, CandidateResource, DeclaredMeta};
use crate::error::HarvestError;
use crate::net::send_with_retries;
use crate::portal::has_target_extension;

const RECORDS_BASE: &str = "https://zenodo.org/api";
const PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct RecordFile {
    pub key: String,
    #[serde(default)]
    pub size: Option<u64>,
    /// `algo:hex` form as the API reports it, e.g. `md5:0cc1...`.
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub links: RecordFileLinks,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordFileLinks {
    #[serde(rename = "self", default)]
    pub self_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub files: Vec<RecordFile>,
    #[serde(default)]
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordMetadata {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordsResponse {
    hits: RecordsHits,
}

#[derive(Debug, Deserialize)]
struct RecordsHits {
    #[serde(default)]
    hits: Vec<Record>,
}

pub trait RecordsClient: Send + Sync {
    fn search_records(&self, query: &str, size: u32) -> Result<Vec<Record>, HarvestError>;
}

#[derive(Clone)]
pub struct ZenodoClient {
    client: Client,
    base_url: String,
}

impl ZenodoClient {
    pub fn new() -> Result<Self, HarvestError> {
        Self::with_base_url(RECORDS_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("maris-rh/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::RecordsHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| HarvestError::RecordsHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

impl RecordsClient for ZenodoClient {
    fn search_records(&self, query: &str, size: u32) -> Result<Vec<Record>, HarvestError> {
        let url = format!("{}/records", self.base_url);
        let size = size.to_string();
        let response = send_with_retries(
            || {
                self.client.get(&url).query(&[
                    ("q", query),
                    ("size", size.as_str()),
                    ("type", "dataset"),
                ])
            },
            HarvestError::RecordsHttp,
        )?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "records request failed".to_string());
            return Err(HarvestError::RecordsStatus { status, message });
        }
        let parsed: RecordsResponse = response
            .json()
            .map_err(|err| HarvestError::RecordsHttp(err.to_string()))?;
        Ok(parsed.hits.hits)
    }
}

pub struct RecordsResolver<C: RecordsClient> {
    client: C,
}

impl<C: RecordsClient> RecordsResolver<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// A failing query is logged and dropped; remaining queries still
    /// run.
    pub fn discover(&self, queries: &[String]) -> Vec<CandidateResource> {
        let mut candidates = Vec::new();
        for query in queries {
            match self.client.search_records(query, PAGE_SIZE) {
                Ok(records) => {
                    let before = candidates.len();
                    for record in records {
                        let title = record.metadata.title.clone();
                        for file in record.files {
                            if let Some(candidate) = candidate_from_file(file, title.as_deref()) {
                                candidates.push(candidate);
                            }
                        }
                    }
                    tracing::debug!(
                        query = %query,
                        count = candidates.len() - before,
                        "records results"
                    );
                }
                Err(err) => {
                    tracing::warn!(query = %query, error = %err, "records query dropped");
                }
            }
        }
        candidates
    }
}

fn candidate_from_file(file: RecordFile, title: Option<&str>) -> Option<CandidateResource> {
    if !has_target_extension(&file.key) {
        return None;
    }
    let url = file.links.self_url?;
    Some(
        CandidateResource::new(BackendKind::Records, url)
            .with_meta(DeclaredMeta {
                name: Some(file.key),
                declared_size: file.size,
                declared_checksum: file.checksum,
                parent: title.map(|t| t.to_string()),
            })
            .trusted(),
    )
}
