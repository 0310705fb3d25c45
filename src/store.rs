use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::{BackendKind, ContentKind, ResolvedResource, ResourceIdentity};
use crate::error::HarvestError;

pub const LEDGER_FILE: &str = "ledger.json";

#[derive(Debug, Clone)]
pub struct Store {
    output_root: Utf8PathBuf,
}

impl Store {
    pub fn new(output_dir: &str) -> Result<Self, HarvestError> {
        let cwd = std::env::current_dir().map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let output_root = Utf8PathBuf::from_path_buf(cwd.join(output_dir))
            .map_err(|_| HarvestError::Filesystem("invalid output path".to_string()))?;
        Ok(Self { output_root })
    }

    pub fn with_root(output_root: Utf8PathBuf) -> Self {
        Self { output_root }
    }

    pub fn output_root(&self) -> &Utf8Path {
        &self.output_root
    }

    pub fn ensure_root(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(self.output_root.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))
    }

    pub fn destination_for(&self, resource: &ResolvedResource) -> Utf8PathBuf {
        self.output_root
            .join(resource.group().dir_name())
            .join(resource.candidate.file_name())
    }

    pub fn ledger_path(&self) -> Utf8PathBuf {
        self.output_root.join(LEDGER_FILE)
    }

    pub fn clear(&self) -> Result<(), HarvestError> {
        if self.output_root.as_std_path().exists() {
            fs::remove_dir_all(self.output_root.as_std_path())
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    /// The destination only ever holds complete payloads; interrupted
    /// transfers die with their temp file.
    pub fn persist_atomic(
        &self,
        temp: tempfile::NamedTempFile,
        dest: &Utf8Path,
    ) -> Result<(), HarvestError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        }
        if dest.as_std_path().exists() {
            fs::remove_file(dest.as_std_path())
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        }
        temp.persist(dest.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn write_ledger(&self, ledger: &DownloadLedger) -> Result<(), HarvestError> {
        self.ensure_root()?;
        let path = self.ledger_path();
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(ledger)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        fs::write(tmp_path.as_std_path(), &content)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn read_ledger(&self) -> Result<Option<DownloadLedger>, HarvestError> {
        let path = self.ledger_path();
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let ledger = serde_json::from_str(&content)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(Some(ledger))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LedgerOutcome {
    Succeeded,
    Failed,
    SkippedCached,
    Unresolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub identity: ResourceIdentity,
    pub backend: BackendKind,
    pub fetchable_url: Option<String>,
    pub content_kind: ContentKind,
    pub outcome: LedgerOutcome,
    pub bytes: u64,
    pub local_path: Option<String>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl LedgerRecord {
    pub fn now(
        identity: ResourceIdentity,
        backend: BackendKind,
        content_kind: ContentKind,
        outcome: LedgerOutcome,
    ) -> Self {
        Self {
            identity,
            backend,
            fetchable_url: None,
            content_kind,
            outcome,
            bytes: 0,
            local_path: None,
            error: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Per-run audit record, written once at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadLedger {
    pub created_at: String,
    pub tool: String,
    pub records: Vec<LedgerRecord>,
}

impl DownloadLedger {
    pub fn new() -> Self {
        Self {
            created_at: Utc::now().to_rfc3339(),
            tool: format!("maris-rh/{}", env!("CARGO_PKG_VERSION")),
            records: Vec::new(),
        }
    }

    pub fn count(&self, outcome: LedgerOutcome) -> usize {
        self.records
            .iter()
            .filter(|record| record.outcome == outcome)
            .count()
    }

    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(|record| record.bytes).sum()
    }
}

impl Default for DownloadLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CandidateResource, DeclaredMeta};

    fn temp_store() -> (tempfile::TempDir, Store) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("harvest")).unwrap();
        (temp, Store::with_root(root))
    }

    fn resolved(url: &str, kind: ContentKind) -> ResolvedResource {
        ResolvedResource {
            candidate: CandidateResource::new(BackendKind::Portal, url),
            fetchable_url: url.to_string(),
            content_kind: kind,
            verified_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn destinations_grouped_by_kind() {
        let (_temp, store) = temp_store();
        let notebook = resolved("https://example.org/sst.ipynb", ContentKind::Notebook);
        assert!(store
            .destination_for(&notebook)
            .ends_with("notebooks/sst.ipynb"));

        let dataset = resolved("https://example.org/sst.nc", ContentKind::NetCdf);
        assert!(store.destination_for(&dataset).ends_with("datasets/sst.nc"));

        let archive = resolved("https://example.org/bundle.zip", ContentKind::ZipArchive);
        assert!(store
            .destination_for(&archive)
            .ends_with("archives/bundle.zip"));
    }

    #[test]
    fn unknown_kind_falls_back_to_declared_name() {
        let (_temp, store) = temp_store();
        let mut resource = resolved("https://example.org/files/1", ContentKind::Unknown);
        resource.candidate = resource.candidate.with_meta(DeclaredMeta {
            name: Some("currents.nc".to_string()),
            ..DeclaredMeta::default()
        });
        assert!(store
            .destination_for(&resource)
            .ends_with("datasets/currents.nc"));
    }

    #[test]
    fn persist_atomic_places_file() {
        let (_temp, store) = temp_store();
        store.ensure_root().unwrap();
        let temp_file = tempfile::Builder::new()
            .prefix("maris-rh-test")
            .tempfile_in(store.output_root().as_std_path())
            .unwrap();
        std::fs::write(temp_file.path(), b"payload").unwrap();
        let dest = store.output_root().join("archives/bundle.zip");
        store.persist_atomic(temp_file, &dest).unwrap();
        assert_eq!(std::fs::read(dest.as_std_path()).unwrap(), b"payload");
    }

    #[test]
    fn ledger_round_trips() {
        let (_temp, store) = temp_store();
        let mut ledger = DownloadLedger::new();
        let mut record = LedgerRecord::now(
            "https://example.org/a.zip".parse().unwrap(),
            BackendKind::Portal,
            ContentKind::ZipArchive,
            LedgerOutcome::Succeeded,
        );
        record.bytes = 1024;
        ledger.records.push(record);
        store.write_ledger(&ledger).unwrap();

        let read = store.read_ledger().unwrap().unwrap();
        assert_eq!(read.records.len(), 1);
        assert_eq!(read.count(LedgerOutcome::Succeeded), 1);
        assert_eq!(read.total_bytes(), 1024);
    }

    #[test]
    fn missing_ledger_reads_none() {
        let (_temp, store) = temp_store();
        assert!(store.read_ledger().unwrap().is_none());
    }
}
