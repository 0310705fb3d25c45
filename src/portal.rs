//! Portal-page resolver: anchor scan of the seed page plus one level
//! of tutorial subpages.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use scraper::{Html, Selector};
use url::Url;

use crate::canonical;
use crate::domain::{BackendKind, CandidateResource, DeclaredMeta};
use crate::error::HarvestError;
use crate::net::send_with_retries;

pub const TARGET_EXTENSIONS: [&str; 9] = [
    ".ipynb", ".zip", ".tar", ".gz", ".nc", ".netcdf", ".hdf5", ".h5", ".grib",
];

const SUBPAGE_KEYWORDS: [&str; 6] = [
    "tutorial", "training", "exercise", "example", "notebook", "data",
];
const PLATFORM_HOSTS: [&str; 3] = ["github.com", "gitlab.com", "zenodo.org"];
const MAX_SUBPAGES: usize = 5;

pub trait PortalClient: Send + Sync {
    fn fetch_page(&self, url: &str) -> Result<String, HarvestError>;
}

#[derive(Clone)]
pub struct HttpPortalClient {
    client: Client,
}

impl HttpPortalClient {
    pub fn new() -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("maris-rh/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::PortalHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| HarvestError::PortalHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl PortalClient for HttpPortalClient {
    fn fetch_page(&self, url: &str) -> Result<String, HarvestError> {
        let response = send_with_retries(|| self.client.get(url), HarvestError::PortalHttp)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "portal request failed".to_string());
            return Err(HarvestError::PortalStatus { status, message });
        }
        response
            .text()
            .map_err(|err| HarvestError::PortalHttp(err.to_string()))
    }
}

pub struct PortalResolver<C: PortalClient> {
    client: C,
}

impl<C: PortalClient> PortalResolver<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Subpage failures are logged and skipped; the seed page itself
    /// must load.
    pub fn discover(&self, seed: &str) -> Result<Vec<CandidateResource>, HarvestError> {
        let base = Url::parse(seed).map_err(|_| HarvestError::InvalidSeedUrl(seed.to_string()))?;
        let html = self.client.fetch_page(seed)?;

        let mut seen = HashSet::new();
        let mut candidates = extract_candidates(&html, &base, &mut seen);
        tracing::debug!(count = candidates.len(), page = seed, "portal anchors");

        for subpage in extract_subpages(&html, &base) {
            match self.client.fetch_page(&subpage) {
                Ok(sub_html) => {
                    let sub_base = match Url::parse(&subpage) {
                        Ok(url) => url,
                        Err(_) => continue,
                    };
                    let found = extract_candidates(&sub_html, &sub_base, &mut seen);
                    tracing::debug!(count = found.len(), page = %subpage, "subpage anchors");
                    candidates.extend(found);
                }
                Err(err) => {
                    tracing::warn!(page = %subpage, error = %err, "subpage scan skipped");
                }
            }
        }

        Ok(candidates)
    }
}

pub fn has_target_extension(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    TARGET_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn is_platform_link(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    if PLATFORM_HOSTS.iter().any(|h| host == *h || host.ends_with(&format!(".{h}"))) {
        return true;
    }
    canonical::matches_file_share(url.as_str())
}

fn extract_candidates(
    html: &str,
    base: &Url,
    seen: &mut HashSet<String>,
) -> Vec<CandidateResource> {
    let document = Html::parse_document(html);
    let anchor = Selector::parse("a[href]").expect("anchor selector");

    let mut candidates = Vec::new();
    for element in document.select(&anchor) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if href.starts_with('#') {
            continue;
        }
        let Ok(absolute) = base.join(href) else {
            continue;
        };

        let url = absolute.as_str().to_string();
        let direct = has_target_extension(&url);
        let platform = is_platform_link(&absolute);
        if !direct && !platform {
            continue;
        }
        if !seen.insert(url.clone()) {
            continue;
        }

        let name = absolute
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .map(|segment| segment.to_string());
        let candidate = CandidateResource::new(BackendKind::Portal, url).with_meta(DeclaredMeta {
            name,
            parent: Some(base.as_str().to_string()),
            ..DeclaredMeta::default()
        });
        candidates.push(candidate);
    }
    candidates
}

fn extract_subpages(html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let anchor = Selector::parse("a[href]").expect("anchor selector");

    let mut seen = HashSet::new();
    let mut subpages = Vec::new();
    for element in document.select(&anchor) {
        if subpages.len() >= MAX_SUBPAGES {
            break;
        }
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if href.starts_with('#') {
            continue;
        }
        let lower = href.to_lowercase();
        if !SUBPAGE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            continue;
        }
        if has_target_extension(href) {
            continue;
        }
        let Ok(absolute) = base.join(href) else {
            continue;
        };
        if absolute.host_str() != base.host_str() {
            continue;
        }
        if absolute.as_str() == base.as_str() {
            continue;
        }
        let url = absolute.as_str().to_string();
        if seen.insert(url.clone()) {
            subpages.push(url);
        }
    }
    subpages
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticPortal {
        pages: Vec<(&'static str, &'static str)>,
    }

    impl PortalClient for StaticPortal {
        fn fetch_page(&self, url: &str) -> Result<String, HarvestError> {
            self.pages
                .iter()
                .find(|(page_url, _)| *page_url == url)
                .map(|(_, body)| body.to_string())
                .ok_or_else(|| HarvestError::PortalStatus {
                    status: 404,
                    message: "missing".to_string(),
                })
        }
    }

    const SEED: &str = "https://marine.example.eu/tutorials";

    #[test]
    fn direct_file_anchors_discovered() {
        let html = r#"
            <html><body>
            <a href="/files/sst_analysis.ipynb">notebook</a>
            <a href="https://cdn.example.org/data/currents.nc">dataset</a>
            <a href="/about">about us</a>
            </body></html>
        "#;
        let resolver = PortalResolver::new(StaticPortal {
            pages: vec![(SEED, html)],
        });
        let candidates = resolver.discover(SEED).unwrap();
        let urls: Vec<&str> = candidates.iter().map(|c| c.announced_url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://marine.example.eu/files/sst_analysis.ipynb",
                "https://cdn.example.org/data/currents.nc",
            ]
        );
        assert!(candidates.iter().all(|c| c.backend == BackendKind::Portal));
        assert_eq!(candidates[0].meta.name.as_deref(), Some("sst_analysis.ipynb"));
    }

    #[test]
    fn platform_links_discovered_without_extension() {
        let html = r#"
            <a href="https://github.com/org/repo/blob/main/demo.ipynb">github</a>
            <a href="https://atlas.mercator-ocean.fr/s/ABC123">share</a>
            <a href="https://unrelated.example.org/page">other</a>
        "#;
        let resolver = PortalResolver::new(StaticPortal {
            pages: vec![(SEED, html)],
        });
        let candidates = resolver.discover(SEED).unwrap();
        let urls: Vec<&str> = candidates.iter().map(|c| c.announced_url.as_str()).collect();
        assert!(urls.contains(&"https://github.com/org/repo/blob/main/demo.ipynb"));
        assert!(urls.contains(&"https://atlas.mercator-ocean.fr/s/ABC123"));
        assert!(!urls.iter().any(|u| u.contains("unrelated")));
    }

    #[test]
    fn subpages_scanned_same_host_only() {
        let seed_html = r#"
            <a href="/tutorials/arctic-training">arctic training</a>
            <a href="https://elsewhere.example.org/tutorial">offsite tutorial</a>
        "#;
        let sub_html = r#"<a href="/files/arctic.zip">bundle</a>"#;
        let resolver = PortalResolver::new(StaticPortal {
            pages: vec![
                (SEED, seed_html),
                ("https://marine.example.eu/tutorials/arctic-training", sub_html),
            ],
        });
        let candidates = resolver.discover(SEED).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(
            candidates[0].announced_url,
            "https://marine.example.eu/files/arctic.zip"
        );
    }

    #[test]
    fn failing_subpage_does_not_abort_discovery() {
        let seed_html = r#"
            <a href="/tutorials/broken-example">broken</a>
            <a href="/files/ok.ipynb">ok</a>
        "#;
        let resolver = PortalResolver::new(StaticPortal {
            pages: vec![(SEED, seed_html)],
        });
        let candidates = resolver.discover(SEED).unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn duplicate_anchors_deduplicated() {
        let html = r#"
            <a href="/files/a.ipynb">first</a>
            <a href="/files/a.ipynb">second</a>
        "#;
        let resolver = PortalResolver::new(StaticPortal {
            pages: vec![(SEED, html)],
        });
        let candidates = resolver.discover(SEED).unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn extension_match_ignores_query() {
        assert!(has_target_extension("https://x.org/a.ipynb?ref=main"));
        assert!(has_target_extension("https://x.org/b.tar.gz"));
        assert!(!has_target_extension("https://x.org/a.html"));
    }
}
