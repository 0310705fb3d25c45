//! Tells a genuine payload apart from an HTML landing page using
//! response headers and a bounded body prefix, never the full body.

use serde::{Deserialize, Serialize};

use crate::domain::ContentKind;

pub const PREFIX_LIMIT: usize = 1024;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const HDF5_MAGIC: &[u8] = b"\x89HDF\r\n\x1a\n";
const NETCDF_MAGIC_V1: &[u8] = b"CDF\x01";
const NETCDF_MAGIC_V2: &[u8] = b"CDF\x02";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseHead {
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub prefix: Vec<u8>,
}

impl ResponseHead {
    pub fn new(
        content_type: Option<String>,
        content_disposition: Option<String>,
        prefix: Vec<u8>,
    ) -> Self {
        let mut prefix = prefix;
        prefix.truncate(PREFIX_LIMIT);
        Self {
            content_type,
            content_disposition,
            prefix,
        }
    }

    pub fn attachment_name(&self) -> Option<String> {
        let disposition = self.content_disposition.as_deref()?;
        let (_, tail) = disposition.split_once("filename=")?;
        let name = tail.split(';').next()?.trim().trim_matches('"').trim();
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }
}

/// Priority order: declared payload MIME, magic bytes, declared or
/// markup-looking HTML, unknown.
pub fn classify(head: &ResponseHead) -> ContentKind {
    let content_type = head
        .content_type
        .as_deref()
        .unwrap_or("")
        .to_ascii_lowercase();

    if let Some(kind) = kind_from_mime(&content_type) {
        return kind;
    }

    if let Some(kind) = kind_from_magic(&head.prefix) {
        return kind;
    }

    if content_type.contains("text/html") || looks_like_markup(&head.prefix) {
        return ContentKind::LandingPage;
    }

    if content_type.contains("application/json") && looks_like_notebook(&head.prefix) {
        return ContentKind::Notebook;
    }

    ContentKind::Unknown
}

fn kind_from_mime(content_type: &str) -> Option<ContentKind> {
    if content_type.contains("application/zip") || content_type.contains("application/x-zip") {
        return Some(ContentKind::ZipArchive);
    }
    if content_type.contains("application/gzip") || content_type.contains("application/x-gzip") {
        return Some(ContentKind::GzipArchive);
    }
    if content_type.contains("application/x-netcdf") || content_type.contains("netcdf") {
        return Some(ContentKind::NetCdf);
    }
    if content_type.contains("application/x-hdf") {
        return Some(ContentKind::Hdf5);
    }
    if content_type.contains("application/x-ipynb") {
        return Some(ContentKind::Notebook);
    }
    None
}

fn kind_from_magic(prefix: &[u8]) -> Option<ContentKind> {
    if prefix.starts_with(ZIP_MAGIC) || prefix.starts_with(ZIP_EMPTY_MAGIC) {
        return Some(ContentKind::ZipArchive);
    }
    if prefix.starts_with(GZIP_MAGIC) {
        return Some(ContentKind::GzipArchive);
    }
    if prefix.starts_with(HDF5_MAGIC) {
        return Some(ContentKind::Hdf5);
    }
    if prefix.starts_with(NETCDF_MAGIC_V1) || prefix.starts_with(NETCDF_MAGIC_V2) {
        return Some(ContentKind::NetCdf);
    }
    if looks_like_notebook(prefix) {
        return Some(ContentKind::Notebook);
    }
    None
}

fn looks_like_markup(prefix: &[u8]) -> bool {
    let text = String::from_utf8_lossy(prefix);
    let trimmed = text.trim_start().to_ascii_lowercase();
    trimmed.starts_with("<!doctype") || trimmed.starts_with("<html") || trimmed.starts_with("<head")
}

// Notebooks are JSON whose top level carries `cells` or `nbformat`,
// which tells them apart from arbitrary JSON API responses.
fn looks_like_notebook(prefix: &[u8]) -> bool {
    let text = String::from_utf8_lossy(prefix);
    let trimmed = text.trim_start();
    trimmed.starts_with('{') && (trimmed.contains("\"cells\"") || trimmed.contains("\"nbformat\""))
}
