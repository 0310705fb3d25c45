//! Resolution/download cache keyed by resource identity. An expired
//! entry behaves as absent and is removed on the read that notices it.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Duration, Utc};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{ResolvedResource, ResourceIdentity};
use crate::error::HarvestError;

const INDEX_FILE: &str = "cache_index.json";

/// Sha-256 hex of the identity string; pure, independent of
/// resolution order.
pub fn identity_key(identity: &ResourceIdentity) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "outcome")]
pub enum CacheOutcome {
    Resolved { resource: ResolvedResource },
    Unresolved { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub identity: ResourceIdentity,
    #[serde(flatten)]
    pub outcome: CacheOutcome,
    pub local_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expiry_secs: i64,
}

impl CacheEntry {
    pub fn resolved(resource: ResolvedResource, expiry: Duration) -> Self {
        Self {
            identity: resource.candidate.identity.clone(),
            outcome: CacheOutcome::Resolved { resource },
            local_path: None,
            created_at: Utc::now(),
            expiry_secs: expiry.num_seconds(),
        }
    }

    pub fn unresolved(identity: ResourceIdentity, reason: String, expiry: Duration) -> Self {
        Self {
            identity,
            outcome: CacheOutcome::Unresolved { reason },
            local_path: None,
            created_at: Utc::now(),
            expiry_secs: expiry.num_seconds(),
        }
    }

    pub fn with_local_path(mut self, path: impl Into<String>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::seconds(self.expiry_secs)
    }

    pub fn has_local_file(&self) -> bool {
        self.local_path
            .as_deref()
            .map(|path| Utf8Path::new(path).as_std_path().exists())
            .unwrap_or(false)
    }
}

/// All access goes through `get`/`put`/`invalidate`; the index is
/// never handed out for direct mutation.
#[derive(Debug)]
pub struct CacheStore {
    root: Utf8PathBuf,
    expiry: Duration,
    index: Mutex<HashMap<String, CacheEntry>>,
    in_flight: Mutex<HashSet<String>>,
}

impl CacheStore {
    pub fn open(expiry_days: u32) -> Result<Self, HarvestError> {
        let root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir().join(".cache").join("maris-resource-harvester"),
                )
                .ok()
            })
            .ok_or_else(|| {
                HarvestError::Filesystem("unable to resolve cache directory".to_string())
            })?;
        Self::open_at(root, expiry_days)
    }

    pub fn open_at(root: Utf8PathBuf, expiry_days: u32) -> Result<Self, HarvestError> {
        fs::create_dir_all(root.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let index = Self::load_index(&root)?;
        let store = Self {
            root,
            expiry: Duration::days(i64::from(expiry_days)),
            index: Mutex::new(index),
            in_flight: Mutex::new(HashSet::new()),
        };
        store.clear_expired()?;
        Ok(store)
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    pub fn get(&self, identity: &ResourceIdentity) -> Option<CacheEntry> {
        let key = identity_key(identity);
        let mut index = self.index.lock().expect("cache index poisoned");
        match index.get(&key) {
            Some(entry) if entry.is_expired(Utc::now()) => {
                index.remove(&key);
                let _ = Self::save_index(&self.root, &index);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    pub fn put(&self, entry: CacheEntry) -> Result<(), HarvestError> {
        let key = identity_key(&entry.identity);
        let mut index = self.index.lock().expect("cache index poisoned");
        index.insert(key, entry);
        Self::save_index(&self.root, &index)
    }

    pub fn invalidate(&self, identity: &ResourceIdentity) -> Result<(), HarvestError> {
        let key = identity_key(identity);
        let mut index = self.index.lock().expect("cache index poisoned");
        if index.remove(&key).is_some() {
            Self::save_index(&self.root, &index)?;
        }
        Ok(())
    }

    pub fn clear_expired(&self) -> Result<(), HarvestError> {
        let now = Utc::now();
        let mut index = self.index.lock().expect("cache index poisoned");
        let before = index.len();
        index.retain(|_, entry| !entry.is_expired(now));
        if index.len() != before {
            tracing::debug!(removed = before - index.len(), "cleared expired cache entries");
            Self::save_index(&self.root, &index)?;
        }
        Ok(())
    }

    /// At most one claim exists per identity; returns false when
    /// another worker already holds it.
    pub fn try_claim(&self, identity: &ResourceIdentity) -> bool {
        let mut in_flight = self.in_flight.lock().expect("claim set poisoned");
        in_flight.insert(identity_key(identity))
    }

    pub fn release(&self, identity: &ResourceIdentity) {
        let mut in_flight = self.in_flight.lock().expect("claim set poisoned");
        in_flight.remove(&identity_key(identity));
    }

    fn load_index(root: &Utf8Path) -> Result<HashMap<String, CacheEntry>, HarvestError> {
        let path = root.join(INDEX_FILE);
        if !path.as_std_path().exists() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        match serde_json::from_str(&content) {
            Ok(index) => Ok(index),
            Err(err) => {
                // A corrupt index is not worth failing a run over.
                tracing::warn!(error = %err, "cache index unreadable, starting empty");
                Ok(HashMap::new())
            }
        }
    }

    fn save_index(
        root: &Utf8Path,
        index: &HashMap<String, CacheEntry>,
    ) -> Result<(), HarvestError> {
        let path = root.join(INDEX_FILE);
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(index)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        fs::write(tmp_path.as_std_path(), &content)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(())
    }
}
