use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Portal,
    CodeSearch,
    Records,
    FileShare,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Portal => write!(f, "portal"),
            BackendKind::CodeSearch => write!(f, "codesearch"),
            BackendKind::Records => write!(f, "records"),
            BackendKind::FileShare => write!(f, "fileshare"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentKind {
    ZipArchive,
    GzipArchive,
    NetCdf,
    Hdf5,
    Notebook,
    LandingPage,
    Unknown,
}

impl ContentKind {
    pub fn is_payload(&self) -> bool {
        matches!(
            self,
            ContentKind::ZipArchive
                | ContentKind::GzipArchive
                | ContentKind::NetCdf
                | ContentKind::Hdf5
                | ContentKind::Notebook
        )
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::ZipArchive => write!(f, "zip-archive"),
            ContentKind::GzipArchive => write!(f, "gzip-archive"),
            ContentKind::NetCdf => write!(f, "netcdf"),
            ContentKind::Hdf5 => write!(f, "hdf5"),
            ContentKind::Notebook => write!(f, "notebook"),
            ContentKind::LandingPage => write!(f, "landing-page"),
            ContentKind::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceGroup {
    Notebooks,
    Datasets,
    Archives,
}

impl ResourceGroup {
    pub fn for_kind(kind: ContentKind) -> Self {
        match kind {
            ContentKind::Notebook => ResourceGroup::Notebooks,
            ContentKind::NetCdf | ContentKind::Hdf5 => ResourceGroup::Datasets,
            _ => ResourceGroup::Archives,
        }
    }

    pub fn dir_name(&self) -> &'static str {
        match self {
            ResourceGroup::Notebooks => "notebooks",
            ResourceGroup::Datasets => "datasets",
            ResourceGroup::Archives => "archives",
        }
    }
}

/// Stable identity of an announced resource, fixed before
/// canonicalization so re-resolution stays cache-stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity(String);

impl ResourceIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResourceIdentity {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(HarvestError::InvalidSpecifier(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<&str> for ResourceIdentity {
    fn from(value: &str) -> Self {
        Self(value.trim().to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredMeta {
    pub name: Option<String>,
    pub declared_size: Option<u64>,
    /// `algo:hex` form, e.g. `md5:0cc1...` or `sha256:ab12...`.
    pub declared_checksum: Option<String>,
    pub parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateResource {
    pub identity: ResourceIdentity,
    pub backend: BackendKind,
    pub announced_url: String,
    pub meta: DeclaredMeta,
    pub depth: u8,
    /// Set when the backend declares size/checksum itself; such
    /// candidates verify without sniffing.
    pub trusted: bool,
}

impl CandidateResource {
    pub fn new(backend: BackendKind, announced_url: impl Into<String>) -> Self {
        let announced_url = announced_url.into();
        Self {
            identity: ResourceIdentity::from(announced_url.as_str()),
            backend,
            announced_url,
            meta: DeclaredMeta::default(),
            depth: 0,
            trusted: false,
        }
    }

    pub fn with_meta(mut self, meta: DeclaredMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn trusted(mut self) -> Self {
        self.trusted = true;
        self
    }

    pub fn file_name(&self) -> String {
        if let Some(name) = &self.meta.name {
            if !name.is_empty() {
                return sanitize_file_name(name);
            }
        }
        let tail = self
            .announced_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("resource");
        let tail = tail.split('?').next().unwrap_or(tail);
        if tail.len() >= 3 {
            sanitize_file_name(tail)
        } else {
            let key = crate::cache::identity_key(&self.identity);
            format!("resource-{}", &key[..12])
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedResource {
    pub candidate: CandidateResource,
    pub fetchable_url: String,
    pub content_kind: ContentKind,
    pub verified_at: String,
}

impl ResolvedResource {
    pub fn group(&self) -> ResourceGroup {
        // Fall back to the announced name's extension when the probe
        // could not classify (trusted backends skip sniffing).
        if self.content_kind == ContentKind::Unknown {
            let name = self.candidate.file_name();
            return ResourceGroup::for_kind(kind_from_extension(&name));
        }
        ResourceGroup::for_kind(self.content_kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedResource {
    pub candidate: CandidateResource,
    pub terminal_url: String,
    pub last_kind: ContentKind,
    pub reason: String,
}

pub fn kind_from_extension(name: &str) -> ContentKind {
    let lower = name.to_lowercase();
    if lower.ends_with(".ipynb") {
        ContentKind::Notebook
    } else if lower.ends_with(".nc") || lower.ends_with(".netcdf") {
        ContentKind::NetCdf
    } else if lower.ends_with(".hdf") || lower.ends_with(".hdf5") || lower.ends_with(".h5") {
        ContentKind::Hdf5
    } else if lower.ends_with(".gz") || lower.ends_with(".tgz") {
        ContentKind::GzipArchive
    } else if lower.ends_with(".zip") {
        ContentKind::ZipArchive
    } else {
        ContentKind::Unknown
    }
}

pub fn sanitize_file_name(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    let mut last_underscore = false;
    for ch in name.chars() {
        let mapped = match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => None,
            ' ' => Some('_'),
            other => Some(other),
        };
        match mapped {
            Some('_') if last_underscore => {}
            Some('_') => {
                cleaned.push('_');
                last_underscore = true;
            }
            Some(other) => {
                cleaned.push(other);
                last_underscore = false;
            }
            None => {}
        }
    }
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "resource".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn identity_rejects_empty() {
        let err = "   ".parse::<ResourceIdentity>().unwrap_err();
        assert_matches!(err, HarvestError::InvalidSpecifier(_));
    }

    #[test]
    fn file_name_from_url_tail() {
        let candidate = CandidateResource::new(
            BackendKind::Portal,
            "https://example.org/data/sst_analysis.ipynb?ref=main",
        );
        assert_eq!(candidate.file_name(), "sst_analysis.ipynb");
    }

    #[test]
    fn file_name_prefers_declared_name() {
        let candidate = CandidateResource::new(BackendKind::Records, "https://example.org/f/1")
            .with_meta(DeclaredMeta {
                name: Some("arctic ocean: temperature.nc".to_string()),
                ..DeclaredMeta::default()
            });
        assert_eq!(candidate.file_name(), "arctic_ocean_temperature.nc");
    }

    #[test]
    fn extension_kind_mapping() {
        assert_eq!(kind_from_extension("a.ipynb"), ContentKind::Notebook);
        assert_eq!(kind_from_extension("b.NC"), ContentKind::NetCdf);
        assert_eq!(kind_from_extension("c.tar.gz"), ContentKind::GzipArchive);
        assert_eq!(kind_from_extension("d.zip"), ContentKind::ZipArchive);
        assert_eq!(kind_from_extension("e.txt"), ContentKind::Unknown);
    }

    #[test]
    fn group_routing() {
        assert_eq!(
            ResourceGroup::for_kind(ContentKind::Notebook),
            ResourceGroup::Notebooks
        );
        assert_eq!(
            ResourceGroup::for_kind(ContentKind::NetCdf),
            ResourceGroup::Datasets
        );
        assert_eq!(
            ResourceGroup::for_kind(ContentKind::ZipArchive),
            ResourceGroup::Archives
        );
    }
}
