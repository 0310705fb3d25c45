//! Bounded worker pool draining the download queue: cache consult,
//! streamed transfer to a temp file, integrity check, atomic promote.
//! Per-resource failures land in the ledger; the batch never aborts.

use std::collections::{HashSet, VecDeque};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use sha2::{Digest, Sha256};

use crate::cache::{CacheEntry, CacheStore};
use crate::domain::{ContentKind, ResolvedResource};
use crate::error::HarvestError;
use crate::fs_util::validate_zip;
use crate::net::{CancelToken, Fetcher};
use crate::store::{DownloadLedger, LedgerOutcome, LedgerRecord, Store};

pub const MAX_ATTEMPTS: usize = 3;
const BACKOFF_BASE_MS: u64 = 500;
const HASH_BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    SkippedCached,
}

#[derive(Debug)]
pub struct DownloadTask {
    pub resource: ResolvedResource,
    pub destination: Utf8PathBuf,
    pub attempts: usize,
    pub status: TaskStatus,
}

impl DownloadTask {
    fn new(resource: ResolvedResource, destination: Utf8PathBuf) -> Self {
        Self {
            resource,
            destination,
            attempts: 0,
            status: TaskStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub concurrency: usize,
    pub force: bool,
    pub no_cache: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            concurrency: crate::config::DEFAULT_CONCURRENCY,
            force: false,
            no_cache: false,
        }
    }
}

pub struct Orchestrator<'a, F: Fetcher> {
    fetcher: &'a F,
    cache: &'a CacheStore,
    store: &'a Store,
}

impl<'a, F: Fetcher> Orchestrator<'a, F> {
    pub fn new(fetcher: &'a F, cache: &'a CacheStore, store: &'a Store) -> Self {
        Self {
            fetcher,
            cache,
            store,
        }
    }

    /// Ledger records are appended in completion order.
    pub fn run(
        &self,
        resources: Vec<ResolvedResource>,
        options: &DownloadOptions,
        cancel: &CancelToken,
    ) -> Result<DownloadLedger, HarvestError> {
        self.store.ensure_root()?;

        let mut ledger = DownloadLedger::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        for resource in resources {
            if !seen.insert(resource.candidate.identity.clone()) {
                // Same identity announced twice (different backends);
                // the first task covers it.
                ledger.records.push(self.record_for(
                    &resource,
                    TaskStatus::SkippedCached,
                    0,
                    None,
                    None,
                ));
                continue;
            }
            let destination = self.store.destination_for(&resource);
            queue.push_back(DownloadTask::new(resource, destination));
        }

        let workers = options.concurrency.min(queue.len()).max(1);
        let queue = Mutex::new(queue);
        let records: Mutex<Vec<LedgerRecord>> = Mutex::new(Vec::new());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let task = {
                            let mut queue = queue.lock().expect("task queue poisoned");
                            queue.pop_front()
                        };
                        let Some(task) = task else {
                            break;
                        };
                        let record = self.execute(task, options, cancel);
                        records.lock().expect("ledger poisoned").push(record);
                    }
                });
            }
        });

        ledger
            .records
            .extend(records.into_inner().expect("ledger poisoned"));
        Ok(ledger)
    }

    fn execute(
        &self,
        mut task: DownloadTask,
        options: &DownloadOptions,
        cancel: &CancelToken,
    ) -> LedgerRecord {
        let identity = task.resource.candidate.identity.clone();
        if !self.cache.try_claim(&identity) {
            // Another worker is already fetching this identity.
            task.status = TaskStatus::SkippedCached;
            return self.record_for(&task.resource, task.status, 0, None, None);
        }
        let record = self.execute_claimed(&mut task, options, cancel);
        self.cache.release(&identity);
        record
    }

    fn execute_claimed(
        &self,
        task: &mut DownloadTask,
        options: &DownloadOptions,
        cancel: &CancelToken,
    ) -> LedgerRecord {
        if !options.force {
            if let Some(entry) = self.cache.get(&task.resource.candidate.identity) {
                if entry.has_local_file() {
                    let path = entry.local_path.clone().unwrap_or_default();
                    let bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                    task.status = TaskStatus::SkippedCached;
                    tracing::debug!(identity = %task.resource.candidate.identity, "fresh cache entry, skipping download");
                    return self.record_for(&task.resource, task.status, bytes, Some(path), None);
                }
            }
        }

        task.status = TaskStatus::InProgress;
        let url = task.resource.fetchable_url.clone();

        loop {
            task.attempts += 1;
            match self.attempt(task, cancel) {
                Ok(bytes) => {
                    task.status = TaskStatus::Succeeded;
                    if !options.no_cache {
                        let entry =
                            CacheEntry::resolved(task.resource.clone(), self.cache.expiry())
                                .with_local_path(task.destination.as_str());
                        if let Err(err) = self.cache.put(entry) {
                            tracing::warn!(error = %err, "cache write failed");
                        }
                    }
                    tracing::info!(url = %url, bytes, "downloaded");
                    return self.record_for(
                        &task.resource,
                        task.status,
                        bytes,
                        Some(task.destination.to_string()),
                        None,
                    );
                }
                Err(err) => {
                    let retryable = err.is_transient()
                        && !matches!(err, HarvestError::Cancelled)
                        && task.attempts < MAX_ATTEMPTS;
                    if retryable && !cancel.is_cancelled() {
                        let delay = BACKOFF_BASE_MS << (task.attempts - 1);
                        tracing::debug!(url = %url, attempt = task.attempts, delay_ms = delay, error = %err, "retrying download");
                        thread::sleep(Duration::from_millis(delay));
                        continue;
                    }
                    task.status = TaskStatus::Failed;
                    tracing::warn!(url = %url, attempts = task.attempts, error = %err, "download failed");
                    return self.record_for(
                        &task.resource,
                        task.status,
                        0,
                        None,
                        Some(err.to_string()),
                    );
                }
            }
        }
    }

    // The temp file is dropped on any failure, so nothing partial
    // ever lands at the final path.
    fn attempt(&self, task: &DownloadTask, cancel: &CancelToken) -> Result<u64, HarvestError> {
        let temp = tempfile::Builder::new()
            .prefix("maris-rh-dl")
            .tempfile_in(self.store.output_root().as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;

        let bytes = self
            .fetcher
            .fetch_to(&task.resource.fetchable_url, temp.path(), cancel)?;
        verify_integrity(&task.resource, temp.path(), bytes)?;
        self.store.persist_atomic(temp, &task.destination)?;
        Ok(bytes)
    }

    fn record_for(
        &self,
        resource: &ResolvedResource,
        status: TaskStatus,
        bytes: u64,
        local_path: Option<String>,
        error: Option<String>,
    ) -> LedgerRecord {
        let outcome = match status {
            TaskStatus::Succeeded => LedgerOutcome::Succeeded,
            TaskStatus::SkippedCached => LedgerOutcome::SkippedCached,
            _ => LedgerOutcome::Failed,
        };
        let mut record = LedgerRecord::now(
            resource.candidate.identity.clone(),
            resource.candidate.backend,
            resource.content_kind,
            outcome,
        );
        record.fetchable_url = Some(resource.fetchable_url.clone());
        record.bytes = bytes;
        record.local_path = local_path;
        record.error = error;
        record
    }
}

fn verify_integrity(
    resource: &ResolvedResource,
    path: &Path,
    bytes: u64,
) -> Result<(), HarvestError> {
    let meta = &resource.candidate.meta;

    if let Some(declared) = meta.declared_size {
        if declared != bytes {
            return Err(HarvestError::Integrity(format!(
                "declared size {declared} but received {bytes} bytes"
            )));
        }
    }

    if let Some(declared) = meta.declared_checksum.as_deref() {
        match declared.split_once(':') {
            Some(("md5", expected)) => {
                let actual = md5_file(path)?;
                if !actual.eq_ignore_ascii_case(expected) {
                    return Err(HarvestError::Integrity(format!(
                        "md5 mismatch: declared {expected}, computed {actual}"
                    )));
                }
            }
            Some(("sha256", expected)) => {
                let actual = sha256_file(path)?;
                if !actual.eq_ignore_ascii_case(expected) {
                    return Err(HarvestError::Integrity(format!(
                        "sha256 mismatch: declared {expected}, computed {actual}"
                    )));
                }
            }
            _ => {
                tracing::debug!(checksum = declared, "unsupported checksum algorithm, size check only");
            }
        }
    }

    if resource.content_kind == ContentKind::ZipArchive {
        validate_zip(path)?;
    }

    Ok(())
}

fn md5_file(path: &Path) -> Result<String, HarvestError> {
    let mut file = File::open(path).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    let mut context = md5::Context::new();
    let mut buf = [0u8; HASH_BUF_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}

fn sha256_file(path: &Path) -> Result<String, HarvestError> {
    let mut file = File::open(path).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_BUF_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
