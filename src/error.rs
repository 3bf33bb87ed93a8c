//! The closed error taxonomy described in spec §7.
//!
//! Application-level glue (CLI, orchestration) uses `eyre::Result` for
//! ergonomic context; the fabric, proxy grammar and catalog parser return
//! these concrete, matchable kinds because callers branch on them (domain
//! rotation eligibility, proxy fallback, CLI exit codes).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProxyUrlError {
    #[error("invalid proxy URL format")]
    InvalidFormat,
    #[error("unsupported proxy protocol")]
    UnsupportedProtocol,
    #[error("missing proxy host")]
    MissingHost,
    #[error("invalid proxy port")]
    InvalidPort,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProxyPoolError {
    #[error("proxy pool must contain at least one proxy")]
    EmptyPool,
    #[error(transparent)]
    InvalidProxy(#[from] ProxyUrlError),
}

/// Errors surfaced by the Network Fabric (spec §4.C, §7).
#[derive(Debug, Error, Clone)]
pub enum FetchError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("http error: {0}")]
    HttpStatus(u16),
    #[error("rate limited after exhausting retry budget")]
    RateLimited,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("proxy connection failed ({host}:{port})")]
    ProxyConnection { host: String, port: u16 },
    #[error("proxy authentication failed ({host}:{port})")]
    ProxyAuth { host: String, port: u16 },
    #[error("proxy timed out ({host}:{port})")]
    ProxyTimeout { host: String, port: u16 },
    #[error("all {count} proxies failed, last error: {last_kind}")]
    AllProxiesFailed { count: usize, last_kind: String },
    #[error("filesystem error: {0}")]
    Io(String),
}

/// Errors surfaced by the Catalog Parser (spec §4.D, §7).
#[derive(Debug, Error, Clone)]
pub enum CatalogError {
    #[error("Invalid domain: {host}. Must be a Hako domain ({primaries})")]
    InvalidDomain { host: String, primaries: String },
    #[error("invalid catalog URL")]
    InvalidUrl,
    #[error("failed to parse catalog: {0}")]
    ParseFailed(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}
