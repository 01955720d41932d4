//! Two-tier caching and invalidation engine for the Stockroom server.
//!
//! This crate provides the caching core the request-handling layers build on:
//! - **L1**: process-local, size-bounded cache with per-entry TTL
//! - **L2**: shared key-value backend (see `stockroom-kv`) with serialization
//!   and optional compression, failing open on backend trouble
//! - **Tag index + dependency graph**: bulk invalidation driven by domain
//!   writes (`products` changed → inventory/search/dashboard queries drop)
//! - **Lock manager**: per-key leases over the backend to stop cache stampedes
//! - **Query stats**: per-key hit/miss/latency counters feeding the admin
//!   surface and warming priorities
//! - **Warming scheduler**: background refresh-ahead for registered queries
//!
//! Everything is combined by [`CacheEngine`], a context object constructed
//! once at process start and injected into call sites:
//!
//! ```ignore
//! use std::sync::Arc;
//! use stockroom_cache::{CacheEngine, CacheOptions, loader_fn};
//! use stockroom_kv::MemoryBackend;
//!
//! let engine = CacheEngine::new(Default::default(), Arc::new(MemoryBackend::new()))?;
//! let loader = loader_fn(|| async { Ok(serde_json::json!({"onHand": 42})) });
//! let value = engine
//!     .get_or_load("inventory.on_hand:wh-1:sku-9", loader, &CacheOptions::for_entity("inventory"))
//!     .await?;
//! ```

pub mod analytics;
pub mod codec;
pub mod config;
pub mod distributed;
pub mod engine;
pub mod entry;
pub mod error;
pub mod graph;
pub mod keys;
pub mod loader;
pub mod local;
pub mod lock;
pub mod stats;
pub mod tags;
pub mod warming;

pub use analytics::{AnalyticsSnapshot, TrackedQuery, WarmingJobView};
pub use codec::{CompressionCodec, GzipCodec, NoopCodec};
pub use config::{CacheConfig, EntityStrategy, Priority, RefreshPolicy, WarmingJobSpec};
pub use distributed::{DistributedCache, L2Stats};
pub use engine::{CacheEngine, CacheOptions, wrap_cached};
pub use entry::CacheEntry;
pub use error::{BoxError, CacheError, Result};
pub use graph::DependencyGraph;
pub use keys::KeyFamily;
pub use loader::{Loader, loader_fn};
pub use local::{L1Stats, LocalCache};
pub use lock::{LockManager, LockToken};
pub use stats::{QueryStat, QueryStatsTracker, Volatility};
pub use tags::TagIndex;
pub use warming::WarmingJob;
