//! End-to-end pipeline behavior with mock backend clients: discovery
//! across backends, chain resolution, and the ledger the run leaves
//! behind.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use camino::Utf8PathBuf;

use maris_resource_harvester::app::{App, HarvestOptions};
use maris_resource_harvester::cache::CacheStore;
use maris_resource_harvester::config::ResolvedConfig;
use maris_resource_harvester::error::HarvestError;
use maris_resource_harvester::github::{CodeSearchClient, SearchItem, SearchRepository};
use maris_resource_harvester::net::{CancelToken, Fetcher, Prober};
use maris_resource_harvester::output::JsonOutput;
use maris_resource_harvester::portal::PortalClient;
use maris_resource_harvester::sniff::ResponseHead;
use maris_resource_harvester::store::{LedgerOutcome, Store};
use maris_resource_harvester::zenodo::{Record, RecordsClient};

struct StaticPortal {
    html: String,
}

impl PortalClient for StaticPortal {
    fn fetch_page(&self, _url: &str) -> Result<String, HarvestError> {
        Ok(self.html.clone())
    }
}

struct StaticSearch {
    items: Vec<SearchItem>,
}

impl CodeSearchClient for StaticSearch {
    fn search(&self, _query: &str, _per_page: u32) -> Result<Vec<SearchItem>, HarvestError> {
        Ok(self.items.clone())
    }
}

struct NoRecords;

impl RecordsClient for NoRecords {
    fn search_records(&self, _query: &str, _size: u32) -> Result<Vec<Record>, HarvestError> {
        Ok(Vec::new())
    }
}

/// Serves zip bytes for every URL and counts fetches.
struct CountingNet {
    fetches: AtomicU32,
}

impl CountingNet {
    fn new() -> Self {
        Self {
            fetches: AtomicU32::new(0),
        }
    }
}

const ZIP_BYTES: &[u8] = &[
    0x50, 0x4b, 0x05, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

impl Prober for CountingNet {
    fn probe(&self, _url: &str) -> Result<ResponseHead, HarvestError> {
        Ok(ResponseHead::new(
            Some("application/zip".to_string()),
            None,
            ZIP_BYTES.to_vec(),
        ))
    }
}

impl Fetcher for CountingNet {
    fn fetch_to(
        &self,
        _url: &str,
        destination: &Path,
        _cancel: &CancelToken,
    ) -> Result<u64, HarvestError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        std::fs::write(destination, ZIP_BYTES)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(ZIP_BYTES.len() as u64)
    }
}

fn config() -> ResolvedConfig {
    ResolvedConfig {
        schema_version: 1,
        seed_url: "https://marine.example.eu/tutorials".to_string(),
        code_search_queries: vec!["marine extension:ipynb".to_string()],
        records_queries: Vec::new(),
        max_hops: 3,
        concurrency: 4,
        cache_expiry_days: 30,
        output_dir: "harvest".to_string(),
    }
}

#[test]
fn same_announcement_across_backends_downloads_once() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::with_root(Utf8PathBuf::from_path_buf(temp.path().join("harvest")).unwrap());
    let cache = CacheStore::open_at(
        Utf8PathBuf::from_path_buf(temp.path().join("cache")).unwrap(),
        30,
    )
    .unwrap();

    // The portal page and the code search both announce the same
    // archive URL.
    let shared = "https://cdn.example.org/bundles/arctic.zip";
    let app = App::new(
        store,
        cache,
        StaticPortal {
            html: format!(r#"<a href="{shared}">bundle</a>"#),
        },
        StaticSearch {
            items: vec![SearchItem {
                name: "arctic.zip".to_string(),
                html_url: shared.to_string(),
                path: Some("bundles/arctic.zip".to_string()),
                size: None,
                repository: Some(SearchRepository {
                    full_name: "org/repo".to_string(),
                }),
            }],
        },
        NoRecords,
        CountingNet::new(),
    );

    let result = app
        .harvest(
            &config(),
            HarvestOptions::default(),
            &CancelToken::new(),
            &JsonOutput,
        )
        .unwrap();

    assert_eq!(result.discovered, 2);
    assert_eq!(result.succeeded, 1);
    assert_eq!(result.failed, 0);
    assert!(
        temp.path()
            .join("harvest/archives/arctic.zip")
            .exists()
    );
}

#[test]
fn unresolved_candidates_reach_the_ledger() {
    struct LandingNet;

    impl Prober for LandingNet {
        fn probe(&self, _url: &str) -> Result<ResponseHead, HarvestError> {
            Ok(ResponseHead::new(
                Some("text/html".to_string()),
                None,
                b"<!DOCTYPE html>".to_vec(),
            ))
        }
    }

    impl Fetcher for LandingNet {
        fn fetch_to(
            &self,
            _url: &str,
            _destination: &Path,
            _cancel: &CancelToken,
        ) -> Result<u64, HarvestError> {
            panic!("nothing should download");
        }
    }

    let temp = tempfile::tempdir().unwrap();
    let store = Store::with_root(Utf8PathBuf::from_path_buf(temp.path().join("harvest")).unwrap());
    let cache = CacheStore::open_at(
        Utf8PathBuf::from_path_buf(temp.path().join("cache")).unwrap(),
        30,
    )
    .unwrap();

    let app = App::new(
        store,
        cache,
        StaticPortal {
            html: r#"<a href="/files/teaser.zip">teaser</a>"#.to_string(),
        },
        StaticSearch { items: Vec::new() },
        NoRecords,
        LandingNet,
    );

    let mut run_config = config();
    run_config.code_search_queries.clear();
    let result = app
        .harvest(
            &run_config,
            HarvestOptions::default(),
            &CancelToken::new(),
            &JsonOutput,
        )
        .unwrap();

    assert_eq!(result.unresolved, 1);
    assert_eq!(result.succeeded, 0);

    let store = Store::with_root(Utf8PathBuf::from_path_buf(temp.path().join("harvest")).unwrap());
    let ledger = store.read_ledger().unwrap().unwrap();
    assert_eq!(ledger.count(LedgerOutcome::Unresolved), 1);
    let record = &ledger.records[0];
    assert!(record.error.as_deref().unwrap_or("").contains("landing page"));
}

#[test]
fn share_chain_resolves_through_suffix_rewrite() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::with_root(Utf8PathBuf::from_path_buf(temp.path().join("harvest")).unwrap());
    let cache = CacheStore::open_at(
        Utf8PathBuf::from_path_buf(temp.path().join("cache")).unwrap(),
        30,
    )
    .unwrap();

    let net = CountingNet::new();
    let app = App::new(
        store,
        cache,
        StaticPortal {
            html: r#"<a href="https://atlas.mercator-ocean.fr/s/ZqtwdLNzoQH55JE">training bundle</a>"#
                .to_string(),
        },
        StaticSearch { items: Vec::new() },
        NoRecords,
        net,
    );

    let mut run_config = config();
    run_config.code_search_queries.clear();
    let result = app
        .harvest(
            &run_config,
            HarvestOptions::default(),
            &CancelToken::new(),
            &JsonOutput,
        )
        .unwrap();

    assert_eq!(result.succeeded, 1);
    let item = &result.items[0];
    assert_eq!(
        item.identity,
        "https://atlas.mercator-ocean.fr/s/ZqtwdLNzoQH55JE"
    );

    let store = Store::with_root(Utf8PathBuf::from_path_buf(temp.path().join("harvest")).unwrap());
    let ledger = store.read_ledger().unwrap().unwrap();
    assert_eq!(
        ledger.records[0].fetchable_url.as_deref(),
        Some("https://atlas.mercator-ocean.fr/s/ZqtwdLNzoQH55JE/download")
    );
}
