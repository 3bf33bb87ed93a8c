//! Proxy URL grammar (§4.A) and pool rotation discipline (§4.B).

mod descriptor;
mod pool;

pub use descriptor::{parse, reconstruct, sanitize_for_display, validate, Protocol, ProxyDescriptor};
pub use pool::ProxyPool;
