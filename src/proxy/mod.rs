//! Outbound proxy rotation
//!
//! Crawl attempts can leave through different egress identities to reduce
//! the chance of being blocked. The [`ProxyPool`] hands endpoints out
//! round-robin or at random and takes failed ones out of rotation, either
//! right away or after repeated transport failures.

mod pool;

pub use pool::{ProxyCredentials, ProxyEndpoint, ProxyPool, DEFAULT_FAILURE_THRESHOLD};
