//! Upstream API access: the raw HTTP client, the request orchestrator and
//! the lead endpoints built on top of it.

mod client;
mod http;
mod leads;
mod types;

pub use client::ApiClient;
pub use http::HttpClient;
pub use types::{ApiEnvelope, ClientOptions, RequestConfig, Response, Source, Status};

pub(crate) use leads::{EntityOp, LEADS_ENDPOINT};
