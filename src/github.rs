//! Code-search resolver. Quota-aware and fail-soft: an exhausted
//! quota ends this backend's discovery, never the run.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::domain::{BackendKind, CandidateResource, DeclaredMeta};
use crate::error::HarvestError;
use crate::net::send_with_retries;
use crate::portal::has_target_extension;

const SEARCH_BASE: &str = "https://api.github.com";
const PAGE_SIZE: u32 = 10;

// GitHub's unauthenticated code-search quota is 10/minute.
pub const DEFAULT_SEARCH_QUOTA: u32 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchItem {
    pub name: String,
    pub html_url: String,
    pub path: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    pub repository: Option<SearchRepository>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRepository {
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

pub trait CodeSearchClient: Send + Sync {
    fn search(&self, query: &str, per_page: u32) -> Result<Vec<SearchItem>, HarvestError>;
}

#[derive(Clone)]
pub struct GithubSearchClient {
    client: Client,
    base_url: String,
}

impl GithubSearchClient {
    pub fn new() -> Result<Self, HarvestError> {
        Self::with_base_url(SEARCH_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("maris-rh/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::CodeSearchHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| HarvestError::CodeSearchHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

impl CodeSearchClient for GithubSearchClient {
    fn search(&self, query: &str, per_page: u32) -> Result<Vec<SearchItem>, HarvestError> {
        let url = format!("{}/search/code", self.base_url);
        let per_page = per_page.to_string();
        let response = send_with_retries(
            || {
                self.client
                    .get(&url)
                    .query(&[("q", query), ("per_page", per_page.as_str())])
            },
            HarvestError::CodeSearchHttp,
        )?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "code search failed".to_string());
            return Err(HarvestError::CodeSearchStatus { status, message });
        }
        let parsed: SearchResponse = response
            .json()
            .map_err(|err| HarvestError::CodeSearchHttp(err.to_string()))?;
        Ok(parsed.items)
    }
}

pub struct CodeSearchResolver<C: CodeSearchClient> {
    client: C,
    remaining: AtomicU32,
}

impl<C: CodeSearchClient> CodeSearchResolver<C> {
    pub fn new(client: C, quota: u32) -> Self {
        Self {
            client,
            remaining: AtomicU32::new(quota),
        }
    }

    pub fn remaining_quota(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Quota exhaustion and rate-limit responses stop this backend
    /// quietly; other errors skip the one query.
    pub fn discover(&self, queries: &[String]) -> Vec<CandidateResource> {
        let mut candidates = Vec::new();
        for query in queries {
            if !self.spend_quota() {
                tracing::warn!(query = %query, "code search quota exhausted, stopping discovery");
                break;
            }
            match self.client.search(query, PAGE_SIZE) {
                Ok(items) => {
                    tracing::debug!(query = %query, count = items.len(), "code search results");
                    for item in items {
                        if let Some(candidate) = candidate_from_item(item) {
                            candidates.push(candidate);
                        }
                    }
                }
                Err(err) if err.is_rate_limit() => {
                    tracing::warn!(query = %query, error = %err, "code search rate limited, stopping discovery");
                    self.remaining.store(0, Ordering::SeqCst);
                    break;
                }
                Err(err) => {
                    tracing::warn!(query = %query, error = %err, "code search query dropped");
                }
            }
        }
        candidates
    }

    fn spend_quota(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(1)
            })
            .is_ok()
    }
}

fn candidate_from_item(item: SearchItem) -> Option<CandidateResource> {
    let target = item
        .path
        .as_deref()
        .map(has_target_extension)
        .unwrap_or_else(|| has_target_extension(&item.name));
    if !target {
        return None;
    }
    let parent = item.repository.map(|repo| repo.full_name);
    Some(
        CandidateResource::new(BackendKind::CodeSearch, item.html_url).with_meta(DeclaredMeta {
            name: Some(item.name),
            declared_size: item.size,
            parent,
            ..DeclaredMeta::default()
        }),
    )
}
