use serde::Serialize;

use crate::cache::CacheStore;
use crate::config::ResolvedConfig;
use crate::domain::{BackendKind, CandidateResource, ContentKind};
use crate::download::{DownloadOptions, Orchestrator};
use crate::error::HarvestError;
use crate::github::{CodeSearchClient, CodeSearchResolver, DEFAULT_SEARCH_QUOTA};
use crate::net::{CancelToken, Fetcher, Prober};
use crate::portal::{PortalClient, PortalResolver};
use crate::store::{DownloadLedger, LedgerOutcome, LedgerRecord, Store};
use crate::walker::LinkChainWalker;
use crate::zenodo::{RecordsClient, RecordsResolver};

#[derive(Debug, Clone, Default)]
pub struct HarvestOptions {
    pub force: bool,
    pub no_cache: bool,
    pub dry_run: bool,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestResult {
    pub discovered: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_cached: usize,
    pub total_bytes: u64,
    pub dry_run: bool,
    pub ledger_path: Option<String>,
    pub items: Vec<HarvestItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestItem {
    pub identity: String,
    pub backend: BackendKind,
    pub content_kind: ContentKind,
    pub action: String,
    pub local_path: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub resources: Vec<ListEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub identity: String,
    pub backend: BackendKind,
    pub content_kind: ContentKind,
    pub local_path: Option<String>,
    pub bytes: u64,
    pub downloaded_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub cleared: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn emit(sink: &dyn ProgressSink, message: impl Into<String>) {
    sink.event(ProgressEvent {
        message: message.into(),
    });
}

pub struct App<P, C, R, N>
where
    P: PortalClient,
    C: CodeSearchClient,
    R: RecordsClient,
    N: Prober + Fetcher,
{
    store: Store,
    cache: CacheStore,
    portal: PortalResolver<P>,
    code_search: CodeSearchResolver<C>,
    records: RecordsResolver<R>,
    net: N,
}

impl<P, C, R, N> App<P, C, R, N>
where
    P: PortalClient,
    C: CodeSearchClient,
    R: RecordsClient,
    N: Prober + Fetcher,
{
    pub fn new(store: Store, cache: CacheStore, portal: P, code_search: C, records: R, net: N) -> Self {
        Self {
            store,
            cache,
            portal: PortalResolver::new(portal),
            code_search: CodeSearchResolver::new(code_search, DEFAULT_SEARCH_QUOTA),
            records: RecordsResolver::new(records),
            net,
        }
    }

    /// Discover across backends, resolve, download, write the ledger.
    /// Per-resource failures are reported, never raised.
    pub fn harvest(
        &self,
        config: &ResolvedConfig,
        options: HarvestOptions,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<HarvestResult, HarvestError> {
        emit(sink, format!("phase=Discover; portal {}", config.seed_url));
        let mut candidates: Vec<CandidateResource> = Vec::new();
        match self.portal.discover(&config.seed_url) {
            Ok(found) => candidates.extend(found),
            Err(err) => {
                // One backend down must not sink the others.
                tracing::warn!(error = %err, "portal discovery failed");
            }
        }

        if !config.code_search_queries.is_empty() {
            emit(sink, "phase=Discover; code search");
            candidates.extend(self.code_search.discover(&config.code_search_queries));
        }
        if !config.records_queries.is_empty() {
            emit(sink, "phase=Discover; records");
            candidates.extend(self.records.discover(&config.records_queries));
        }

        let discovered = candidates.len();
        emit(sink, format!("phase=Resolve; {discovered} candidates"));

        let mut walker = LinkChainWalker::new(&self.net, &self.cache, config.max_hops);
        if options.force {
            walker = walker.without_cache();
        }
        let walk = walker.resolve_all(candidates);
        emit(
            sink,
            format!(
                "phase=Resolve; {} verified, {} unresolved",
                walk.resolved.len(),
                walk.unresolved.len()
            ),
        );

        if options.dry_run {
            let items = walk
                .resolved
                .iter()
                .map(|resource| HarvestItem {
                    identity: resource.candidate.identity.to_string(),
                    backend: resource.candidate.backend,
                    content_kind: resource.content_kind,
                    action: "would-download".to_string(),
                    local_path: Some(self.store.destination_for(resource).to_string()),
                    detail: None,
                })
                .chain(walk.unresolved.iter().map(unresolved_item))
                .collect();
            return Ok(HarvestResult {
                discovered,
                resolved: walk.resolved.len(),
                unresolved: walk.unresolved.len(),
                succeeded: 0,
                failed: 0,
                skipped_cached: 0,
                total_bytes: 0,
                dry_run: true,
                ledger_path: None,
                items,
            });
        }

        emit(sink, format!("phase=Download; {} resources", walk.resolved.len()));
        let resolved_count = walk.resolved.len();
        let unresolved_count = walk.unresolved.len();
        let orchestrator = Orchestrator::new(&self.net, &self.cache, &self.store);
        let download_options = DownloadOptions {
            concurrency: options.concurrency.unwrap_or(config.concurrency),
            force: options.force,
            no_cache: options.no_cache,
        };
        let mut ledger = orchestrator.run(walk.resolved, &download_options, cancel)?;

        for unresolved in &walk.unresolved {
            let mut record = LedgerRecord::now(
                unresolved.candidate.identity.clone(),
                unresolved.candidate.backend,
                unresolved.last_kind,
                LedgerOutcome::Unresolved,
            );
            record.fetchable_url = Some(unresolved.terminal_url.clone());
            record.error = Some(unresolved.reason.clone());
            ledger.records.push(record);
        }

        emit(sink, "phase=Store; writing ledger");
        self.store.write_ledger(&ledger)?;

        Ok(summarize(
            discovered,
            resolved_count,
            unresolved_count,
            &ledger,
            self.store.ledger_path().to_string(),
        ))
    }

    pub fn list(&self, sink: &dyn ProgressSink) -> Result<ListResult, HarvestError> {
        emit(sink, "phase=Resolve; reading ledger");
        let Some(ledger) = self.store.read_ledger()? else {
            return Ok(ListResult {
                resources: Vec::new(),
            });
        };
        let resources = ledger
            .records
            .into_iter()
            .filter(|record| {
                matches!(
                    record.outcome,
                    LedgerOutcome::Succeeded | LedgerOutcome::SkippedCached
                )
            })
            .map(|record| ListEntry {
                identity: record.identity.to_string(),
                backend: record.backend,
                content_kind: record.content_kind,
                local_path: record.local_path,
                bytes: record.bytes,
                downloaded_at: record.timestamp,
            })
            .collect();
        Ok(ListResult { resources })
    }

    pub fn clear(&self, sink: &dyn ProgressSink) -> Result<ClearResult, HarvestError> {
        emit(sink, "phase=Store; clearing download tree");
        self.store.clear()?;
        Ok(ClearResult { cleared: true })
    }
}

fn unresolved_item(unresolved: &crate::domain::UnresolvedResource) -> HarvestItem {
    HarvestItem {
        identity: unresolved.candidate.identity.to_string(),
        backend: unresolved.candidate.backend,
        content_kind: unresolved.last_kind,
        action: "unresolved".to_string(),
        local_path: None,
        detail: Some(unresolved.reason.clone()),
    }
}

fn summarize(
    discovered: usize,
    resolved: usize,
    unresolved: usize,
    ledger: &DownloadLedger,
    ledger_path: String,
) -> HarvestResult {
    let items = ledger
        .records
        .iter()
        .map(|record| HarvestItem {
            identity: record.identity.to_string(),
            backend: record.backend,
            content_kind: record.content_kind,
            action: match record.outcome {
                LedgerOutcome::Succeeded => "downloaded",
                LedgerOutcome::Failed => "failed",
                LedgerOutcome::SkippedCached => "skipped-cached",
                LedgerOutcome::Unresolved => "unresolved",
            }
            .to_string(),
            local_path: record.local_path.clone(),
            detail: record.error.clone(),
        })
        .collect();
    HarvestResult {
        discovered,
        resolved,
        unresolved,
        succeeded: ledger.count(LedgerOutcome::Succeeded),
        failed: ledger.count(LedgerOutcome::Failed),
        skipped_cached: ledger.count(LedgerOutcome::SkippedCached),
        total_bytes: ledger.total_bytes(),
        dry_run: false,
        ledger_path: Some(ledger_path),
        items,
    }
}
