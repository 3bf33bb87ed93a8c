//! The Network Fabric (§4.C): retrying fetch, streaming save, domain
//! rotation, anti-ban pacing, and proxy dispatch (HTTP/HTTPS via `ureq`,
//! SOCKS5 hand-rolled in [`socks5`]).
//!
//! Grounded on the teacher's `updater/native/request.rs`, which already
//! layers retry/backoff over a blocking HTTP client; generalized here to
//! the full retry/anti-ban/domain-rotation/proxy-failover state machine of
//! §4.C.

mod socks5;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Once;
use std::thread;
use std::time::Duration;

use url::Url;

use crate::config::FabricConfig;
use crate::error::FetchError;
use crate::proxy::{Protocol, ProxyPool};

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

static CRYPTO_PROVIDER_INIT: Once = Once::new();

fn install_default_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// One acquisition session's fetcher. `RequestCount` is scoped to this
/// instance (§9 "Shared mutable state") — a fresh `NetworkFabric` resets
/// the anti-ban pacing.
pub struct NetworkFabric {
    config: FabricConfig,
    proxy_pool: Option<ProxyPool>,
    request_count: AtomicU64,
    anti_ban_counter: AtomicU64,
}

impl NetworkFabric {
    pub fn new(config: FabricConfig, proxy_pool: Option<ProxyPool>) -> Self {
        install_default_crypto_provider();
        Self {
            config,
            proxy_pool,
            request_count: AtomicU64::new(0),
            anti_ban_counter: AtomicU64::new(0),
        }
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn reset_count(&self) {
        self.request_count.store(0, Ordering::SeqCst);
    }

    pub fn has_proxy(&self) -> bool {
        self.proxy_pool.is_some()
    }

    pub fn proxy_count(&self) -> usize {
        self.proxy_pool.as_ref().map_or(0, ProxyPool::size)
    }

    /// True iff `url` parses and its host equals, or ends with `.<d>` for,
    /// any `d` in `P ∪ I`.
    pub fn is_internal(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        self.config
            .primary_hosts
            .iter()
            .chain(self.config.image_hosts.iter())
            .any(|d| host == d || host.ends_with(&format!(".{d}")))
    }

    /// Retrying fetch bounded by the configured retry and rate-limit
    /// budgets. See §4.C for the full state machine.
    pub fn fetch_with_retry(
        &self,
        url: &str,
        headers: Option<&[(String, String)]>,
        timeout: Option<Duration>,
    ) -> Result<RawResponse, FetchError> {
        let timeout = timeout.unwrap_or(self.config.timeout);
        let merged_headers = self.merge_headers(headers);
        let mut last_error = FetchError::Transport("no attempt was made".to_string());

        let mut attempt: u32 = 0;
        while attempt < self.config.retry_budget {
            self.anti_ban_gate();

            let outcome = self.dispatch_with_rate_limit_retries(url, &merged_headers, timeout);
            match outcome {
                DispatchOutcome::Success(response) => return Ok(response),
                DispatchOutcome::RateLimitExhausted => {
                    last_error = FetchError::RateLimited;
                    break;
                }
                DispatchOutcome::HttpError(status) => {
                    if let Some(rotated) = self.try_domain_rotation(url, &merged_headers, timeout) {
                        if let Ok(response) = rotated {
                            return Ok(response);
                        }
                    }
                    last_error = FetchError::HttpStatus(status);
                }
                DispatchOutcome::TransportError(error) => {
                    if let Some(rotated) = self.try_domain_rotation(url, &merged_headers, timeout) {
                        if let Ok(response) = rotated {
                            return Ok(response);
                        }
                    }
                    last_error = error;
                }
            }

            if attempt < self.config.retry_budget - 1 {
                thread::sleep(Duration::from_secs(2u64.pow(attempt)));
            }
            attempt += 1;
        }

        Err(last_error)
    }

    /// Runs one attempt `a`, looping internally (without consuming `a` or
    /// re-checking the anti-ban gate) while the response is a 429 and the
    /// rate-limit budget remains.
    fn dispatch_with_rate_limit_retries(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> DispatchOutcome {
        let mut rate_limit_hits: u32 = 0;
        loop {
            let result = match &self.proxy_pool {
                Some(pool) => self.fetch_with_failover(pool, url, headers, timeout),
                None => self.fetch_direct(url, headers, timeout).map(|response| {
                    self.request_count.fetch_add(1, Ordering::SeqCst);
                    response
                }),
            };

            match result {
                Ok(response) if (200..300).contains(&response.status) => {
                    return DispatchOutcome::Success(response)
                }
                Ok(response) if response.status == 429 => {
                    rate_limit_hits += 1;
                    if rate_limit_hits > self.config.rate_limit_retry_budget {
                        return DispatchOutcome::RateLimitExhausted;
                    }
                    let wait_secs = std::cmp::min(30 * u64::from(rate_limit_hits), 120);
                    thread::sleep(Duration::from_secs(wait_secs));
                }
                Ok(response) => return DispatchOutcome::HttpError(response.status),
                Err(error) => return DispatchOutcome::TransportError(error),
            }
        }
    }

    fn fetch_direct(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<RawResponse, FetchError> {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        let mut request = agent.get(url);
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }
        match request.call() {
            Ok(response) => Ok(to_raw_response(response)),
            Err(error) => Err(categorize_transport_error(&error)),
        }
    }

    fn fetch_with_failover(
        &self,
        pool: &ProxyPool,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<RawResponse, FetchError> {
        let n = pool.size();
        let start = pool.next_index();
        let mut last_kind = String::from("unknown");

        for offset in 0..n {
            let idx = (start + offset) % n;
            let Some(descriptor) = pool.get_at(idx) else {
                continue;
            };
            let attempt = match descriptor.protocol {
                Protocol::Socks5 => {
                    let target = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
                    socks5::fetch(descriptor, &target, headers, timeout)
                }
                Protocol::Http | Protocol::Https => {
                    self.fetch_via_http_proxy(descriptor, url, headers, timeout)
                }
            };
            match attempt {
                Ok(response) => {
                    self.request_count.fetch_add(1, Ordering::SeqCst);
                    return Ok(response);
                }
                Err(error) => last_kind = error.to_string(),
            }
        }

        Err(FetchError::AllProxiesFailed {
            count: n,
            last_kind,
        })
    }

    fn fetch_via_http_proxy(
        &self,
        descriptor: &crate::proxy::ProxyDescriptor,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<RawResponse, FetchError> {
        let proxy_url = crate::proxy::reconstruct(descriptor);
        let proxy = ureq::Proxy::new(&proxy_url)
            .map_err(|e| socks5::categorize(&e.to_string(), &descriptor.host, descriptor.port))?;
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .proxy(Some(proxy))
            .timeout_global(Some(timeout))
            .build()
            .into();
        let mut request = agent.get(url);
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }
        match request.call() {
            Ok(response) => Ok(to_raw_response(response)),
            Err(error) => Err(socks5::categorize(
                &error.to_string(),
                &descriptor.host,
                descriptor.port,
            )),
        }
    }

    /// No rotation under a proxy pool — the pool is the failover axis.
    fn try_domain_rotation(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Option<Result<RawResponse, FetchError>> {
        if self.proxy_pool.is_some() {
            return None;
        }
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_string();
        if !self.is_internal(url) {
            return None;
        }

        let list = if self.config.image_hosts.iter().any(|d| &host == d) {
            &self.config.image_hosts
        } else {
            &self.config.primary_hosts
        };

        let mut last = None;
        for candidate in list {
            if candidate == &host {
                continue;
            }
            let mut rotated = parsed.clone();
            if rotated.set_host(Some(candidate)).is_err() {
                continue;
            }
            self.request_count.fetch_add(1, Ordering::SeqCst);
            match self.fetch_direct(rotated.as_str(), headers, timeout) {
                Ok(response) if (200..300).contains(&response.status) => {
                    return Some(Ok(response))
                }
                Ok(response) => last = Some(Err(FetchError::HttpStatus(response.status))),
                Err(error) => last = Some(Err(error)),
            }
        }
        last
    }

    /// Streams `url` to `path`. Returns `true` without any network call if
    /// `path` already exists with size > 0.
    pub fn download_to_file(&self, url: &str, path: &Path) -> bool {
        if let Ok(metadata) = std::fs::metadata(path) {
            if metadata.is_file() && metadata.len() > 0 {
                return true;
            }
        }

        let Ok(response) = self.fetch_with_retry(url, None, None) else {
            return false;
        };

        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return false;
            }
        }

        let tmp_path = path.with_extension("part");
        if std::fs::write(&tmp_path, &response.body).is_err() {
            return false;
        }
        std::fs::rename(&tmp_path, path).is_ok()
    }

    /// Anti-ban pacing (§4.C/§9): pauses `anti_ban_pause` every
    /// `anti_ban_interval` outer attempts. `anti_ban_interval == 0` disables
    /// pacing entirely.
    fn anti_ban_gate(&self) {
        if self.config.anti_ban_interval == 0 {
            return;
        }
        let count = self.anti_ban_counter.fetch_add(1, Ordering::SeqCst) + 1;
        if count % self.config.anti_ban_interval == 0 {
            thread::sleep(self.config.anti_ban_pause);
        }
    }

    fn merge_headers(&self, extra: Option<&[(String, String)]>) -> Vec<(String, String)> {
        let mut merged = self.config.headers.clone();
        if let Some(extra) = extra {
            for (key, value) in extra {
                if let Some(existing) = merged.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
                    existing.1 = value.clone();
                } else {
                    merged.push((key.clone(), value.clone()));
                }
            }
        }
        merged
    }
}

enum DispatchOutcome {
    Success(RawResponse),
    RateLimitExhausted,
    HttpError(u16),
    TransportError(FetchError),
}

fn to_raw_response(response: ureq::http::Response<ureq::Body>) -> RawResponse {
    let status = response.status().as_u16();
    let body = response
        .into_body()
        .read_to_vec()
        .unwrap_or_default();
    RawResponse { status, body }
}

fn categorize_transport_error(error: &ureq::Error) -> FetchError {
    let message = error.to_string();
    if message.to_lowercase().contains("timeout") {
        FetchError::Timeout
    } else {
        FetchError::Transport(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FabricConfig;

    #[test]
    fn is_internal_matches_primary_and_image_hosts() {
        let fabric = NetworkFabric::new(FabricConfig::default(), None);
        assert!(fabric.is_internal("https://docln.net/truyen/5"));
        assert!(fabric.is_internal("https://sub.docln.net/x"));
        assert!(fabric.is_internal("https://i.hako.vn/a.jpg"));
        assert!(!fabric.is_internal("https://example.com/x"));
    }

    #[test]
    fn download_to_file_skips_existing_nonempty_file() {
        let fabric = NetworkFabric::new(FabricConfig::default(), None);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exists.bin");
        std::fs::write(&path, b"some bytes").unwrap();
        let before = fabric.request_count();
        assert!(fabric.download_to_file("http://img.docln.net/a.jpg", &path));
        assert_eq!(fabric.request_count(), before);
    }

    #[test]
    fn reset_count_zeroes_request_count() {
        let fabric = NetworkFabric::new(FabricConfig::default(), None);
        fabric.request_count.fetch_add(5, Ordering::SeqCst);
        fabric.reset_count();
        assert_eq!(fabric.request_count(), 0);
    }

    #[test]
    fn anti_ban_gate_pauses_every_interval_requests() {
        let fabric = NetworkFabric::new(FabricConfig::fast_for_tests(), None);
        let start = std::time::Instant::now();
        fabric.anti_ban_gate();
        fabric.anti_ban_gate();
        assert!(start.elapsed() >= Duration::from_millis(1));
    }

    #[test]
    fn has_proxy_and_proxy_count_reflect_pool() {
        let without = NetworkFabric::new(FabricConfig::default(), None);
        assert!(!without.has_proxy());
        assert_eq!(without.proxy_count(), 0);

        let pool = ProxyPool::new(&["http://p1:80", "http://p2:80"]).unwrap();
        let with = NetworkFabric::new(FabricConfig::default(), Some(pool));
        assert!(with.has_proxy());
        assert_eq!(with.proxy_count(), 2);
    }
}
