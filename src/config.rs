//! Injectable Network Fabric configuration (spec §9 "Singleton-style
//! constants" design note: these are constructor-driven, not globals, so
//! tests can shrink the anti-ban interval and pause).

use std::time::Duration;

/// Primary/image host lists, header set, timeouts and counters for one
/// [`crate::net::NetworkFabric`] instance.
#[derive(Debug, Clone)]
pub struct FabricConfig {
    /// Interchangeable front-end hostnames, preferred-first (`P`).
    pub primary_hosts: Vec<String>,
    /// Image-hosting hostnames (`I`).
    pub image_hosts: Vec<String>,
    /// Base headers applied to every request, overlaid by caller-supplied ones.
    pub headers: Vec<(String, String)>,
    /// Per-request timeout `T`.
    pub timeout: Duration,
    /// Anti-ban interval `R`: pace every `R` requests.
    pub anti_ban_interval: u64,
    /// Anti-ban pause `A`.
    pub anti_ban_pause: Duration,
    /// Retry budget `M`.
    pub retry_budget: u32,
    /// Rate-limit (HTTP 429) retry budget `M429`.
    pub rate_limit_retry_budget: u32,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            primary_hosts: vec![
                "docln.net".to_string(),
                "ln.hako.vn".to_string(),
                "docln.sbs".to_string(),
            ],
            image_hosts: vec![
                "i.docln.net".to_string(),
                "i2.docln.net".to_string(),
                "i3.docln.net".to_string(),
                "i.hako.vn".to_string(),
                "st.docln.net".to_string(),
            ],
            headers: vec![
                (
                    "User-Agent".to_string(),
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
                        .to_string(),
                ),
                ("Referer".to_string(), "https://docln.net/".to_string()),
            ],
            timeout: Duration::from_secs(30),
            anti_ban_interval: 100,
            anti_ban_pause: Duration::from_secs(30),
            retry_budget: 3,
            rate_limit_retry_budget: 5,
        }
    }
}

impl FabricConfig {
    /// A config with small timers, for tests that need to exercise the
    /// anti-ban gate or backoff without actually waiting on it.
    #[cfg(test)]
    pub(crate) fn fast_for_tests() -> Self {
        Self {
            timeout: Duration::from_millis(50),
            anti_ban_interval: 2,
            anti_ban_pause: Duration::from_millis(1),
            retry_budget: 3,
            rate_limit_retry_budget: 2,
            ..Self::default()
        }
    }
}
