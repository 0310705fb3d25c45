use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};

use crate::error::{HarvestError, is_retryable_error, is_retryable_status};
use crate::sniff::{PREFIX_LIMIT, ResponseHead};

const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 200;
const CHUNK_SIZE: usize = 64 * 1024;

/// Run-wide cancellation flag, observed between body chunks and
/// before retries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub fn build_client(timeout_secs: u64) -> Result<Client, HarvestError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("maris-rh/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| HarvestError::FetchHttp(err.to_string()))?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|err| HarvestError::FetchHttp(err.to_string()))
}

pub fn send_with_retries<F, W>(
    mut make_req: F,
    wrap: W,
) -> Result<reqwest::blocking::Response, HarvestError>
where
    F: FnMut() -> reqwest::blocking::RequestBuilder,
    W: Fn(String) -> HarvestError,
{
    let mut attempt = 0usize;
    loop {
        match make_req().send() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if attempt < MAX_RETRIES && is_retryable_status(status) {
                    thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if attempt < MAX_RETRIES && is_retryable_error(&err) {
                    thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                    attempt += 1;
                    continue;
                }
                return Err(wrap(err.to_string()));
            }
        }
    }
}

pub trait Prober: Send + Sync {
    fn probe(&self, url: &str) -> Result<ResponseHead, HarvestError>;
}

pub trait Fetcher: Send + Sync {
    fn fetch_to(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancelToken,
    ) -> Result<u64, HarvestError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, HarvestError> {
        Ok(Self {
            client: build_client(60)?,
        })
    }
}

impl Prober for HttpFetcher {
    fn probe(&self, url: &str) -> Result<ResponseHead, HarvestError> {
        let response = send_with_retries(|| self.client.get(url), HarvestError::FetchHttp)?;
        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::FetchStatus {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("request failed").to_string(),
            });
        }

        let content_type = header_string(response.headers(), CONTENT_TYPE);
        let content_disposition = header_string(response.headers(), CONTENT_DISPOSITION);

        // Read only the classification prefix, never the full body.
        let mut reader = response.take(PREFIX_LIMIT as u64);
        let mut prefix = Vec::with_capacity(PREFIX_LIMIT);
        reader
            .read_to_end(&mut prefix)
            .map_err(|err| HarvestError::FetchHttp(err.to_string()))?;

        Ok(ResponseHead::new(content_type, content_disposition, prefix))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch_to(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancelToken,
    ) -> Result<u64, HarvestError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| HarvestError::FetchHttp(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::FetchStatus {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("request failed").to_string(),
            });
        }

        let mut file =
            File::create(destination).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let mut buf = [0u8; CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(HarvestError::Cancelled);
            }
            let n = response
                .read(&mut buf)
                .map_err(|err| HarvestError::FetchHttp(err.to_string()))?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
            written += n as u64;
        }
        file.flush()
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(written)
    }
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_flips_once() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
