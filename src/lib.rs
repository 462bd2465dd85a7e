//! Offline-first data layer for a lead-management API.
//!
//! [`ApiClient`] is the entry point: reads are served cache-first with a
//! stale fallback, writes made offline are queued and mirrored locally, and
//! the [`Reconciler`] replays them once connectivity returns. Everything is
//! persisted in one SQLite [`SqliteStore`].

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod mirror;
pub mod queue;
pub mod settings;
pub mod store;
pub mod sync;

pub use api::{ApiClient, ClientOptions, RequestConfig, Response, Source, Status};
pub use config::Config;
pub use connectivity::{Connectivity, Subscription};
pub use error::{Error, Result};
pub use store::{SqliteStore, Store};
pub use sync::{Reconciler, SyncOutcome, SyncReport};
