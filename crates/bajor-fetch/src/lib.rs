//! Fetch layer: blocking HTTP GET with retry/backoff on transient failures
//! and fail-fast on error statuses.

pub mod http;
pub mod memory;
pub mod retry;

pub use http::{
    FetchConfig, FetchError, Fetcher, HttpGet, HttpResponse, ReqwestTransport, TransportError,
};
pub use memory::MemoryTransport;
pub use retry::RetryPolicy;
