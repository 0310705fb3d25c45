//! Pure URL rewrites that turn an announced link into a fetchable
//! one. Text transforms only; no network I/O happens here.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::domain::BackendKind;

/// Hosts whose `/s/<share-id>` links need the `/download` suffix.
const FILE_SHARE_HOSTS: [&str; 2] = ["atlas.mercator-ocean.fr", "nuage.mercator-ocean.fr"];

const BLOB_HOST: &str = "github.com";
const RAW_HOST: &str = "raw.githubusercontent.com";

/// Mirror host whose legacy ftp:// links serve the same paths over https.
const FTP_MIRROR_HOST: &str = "ftp.marine.copernicus.eu";

fn share_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/s/[A-Za-z0-9]+/?$").expect("share path pattern"))
}

/// Total over its input: anything unparseable or already fetchable
/// passes through unchanged. Idempotent.
pub fn canonicalize(url: &str, backend: BackendKind) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let Some(host) = parsed.host_str() else {
        return url.to_string();
    };

    if host == BLOB_HOST {
        if let Some(rewritten) = rewrite_blob_url(&parsed) {
            return rewritten;
        }
    }

    if is_file_share_host(host) || backend == BackendKind::FileShare {
        if let Some(rewritten) = append_download_suffix(&parsed) {
            return rewritten;
        }
    }

    if parsed.scheme() == "ftp" && host == FTP_MIRROR_HOST {
        return format!("https://{}{}", host, parsed.path());
    }

    url.to_string()
}

/// A canonicalized URL matching one of these re-enters discovery as a
/// file-share candidate instead of being probed directly.
pub fn matches_file_share(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    is_file_share_host(host) && parsed.path().starts_with("/s/")
}

fn is_file_share_host(host: &str) -> bool {
    FILE_SHARE_HOSTS.contains(&host)
}

/// `github.com/<org>/<repo>/blob/<ref>/<path>` →
/// `raw.githubusercontent.com/<org>/<repo>/<ref>/<path>`.
fn rewrite_blob_url(parsed: &Url) -> Option<String> {
    let segments: Vec<&str> = parsed.path_segments()?.collect();
    let blob_at = segments.iter().position(|s| *s == "blob")?;
    if blob_at < 2 || blob_at + 1 >= segments.len() {
        return None;
    }
    let mut path = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i == blob_at {
            continue;
        }
        path.push('/');
        path.push_str(segment);
    }
    Some(format!("https://{}{}", RAW_HOST, path))
}

fn append_download_suffix(parsed: &Url) -> Option<String> {
    let path = parsed.path();
    if path.ends_with("/download") {
        // Already terminal; idempotence demands a no-op.
        return Some(parsed.as_str().to_string());
    }
    if !share_path_re().is_match(path) {
        return None;
    }
    let trimmed = path.trim_end_matches('/');
    Some(format!(
        "{}://{}{}/download",
        parsed.scheme(),
        parsed.host_str()?,
        trimmed
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_to_raw() {
        let url = "https://github.com/org/repo/blob/main/notebooks/sst.ipynb";
        assert_eq!(
            canonicalize(url, BackendKind::CodeSearch),
            "https://raw.githubusercontent.com/org/repo/main/notebooks/sst.ipynb"
        );
    }

    #[test]
    fn raw_url_passes_through() {
        let url = "https://raw.githubusercontent.com/org/repo/main/sst.ipynb";
        assert_eq!(canonicalize(url, BackendKind::CodeSearch), url);
    }

    #[test]
    fn share_link_gets_download_suffix() {
        let url = "https://atlas.mercator-ocean.fr/s/ABC123";
        assert_eq!(
            canonicalize(url, BackendKind::Portal),
            "https://atlas.mercator-ocean.fr/s/ABC123/download"
        );
    }

    #[test]
    fn share_link_suffix_is_idempotent() {
        let url = "https://atlas.mercator-ocean.fr/s/ABC123/download";
        assert_eq!(canonicalize(url, BackendKind::FileShare), url);
        let twice = canonicalize(&canonicalize(url, BackendKind::FileShare), BackendKind::FileShare);
        assert_eq!(twice, url);
    }

    #[test]
    fn trailing_slash_share_link() {
        let url = "https://atlas.mercator-ocean.fr/s/ZqtwdLNzoQH55JE/";
        assert_eq!(
            canonicalize(url, BackendKind::Portal),
            "https://atlas.mercator-ocean.fr/s/ZqtwdLNzoQH55JE/download"
        );
    }

    #[test]
    fn ftp_mirror_becomes_https() {
        let url = "ftp://ftp.marine.copernicus.eu/data/sst_monthly.nc";
        assert_eq!(
            canonicalize(url, BackendKind::Portal),
            "https://ftp.marine.copernicus.eu/data/sst_monthly.nc"
        );
    }

    #[test]
    fn unmatched_url_unchanged() {
        let url = "https://example.org/files/report.pdf";
        assert_eq!(canonicalize(url, BackendKind::Portal), url);
        let garbage = "not a url at all";
        assert_eq!(canonicalize(garbage, BackendKind::Portal), garbage);
    }

    #[test]
    fn idempotence_over_rule_table() {
        let inputs = [
            "https://github.com/org/repo/blob/main/a.ipynb",
            "https://atlas.mercator-ocean.fr/s/XYZ789",
            "ftp://ftp.marine.copernicus.eu/data/a.nc",
            "https://zenodo.example.org/api/files/abc/data.zip",
        ];
        for input in inputs {
            let once = canonicalize(input, BackendKind::Portal);
            let twice = canonicalize(&once, BackendKind::Portal);
            assert_eq!(once, twice, "canonicalize not idempotent for {input}");
        }
    }

    #[test]
    fn file_share_detection() {
        assert!(matches_file_share("https://atlas.mercator-ocean.fr/s/ABC123"));
        assert!(matches_file_share(
            "https://atlas.mercator-ocean.fr/s/ABC123/download"
        ));
        assert!(!matches_file_share("https://atlas.mercator-ocean.fr/about"));
        assert!(!matches_file_share("https://example.org/s/ABC123"));
    }
}
