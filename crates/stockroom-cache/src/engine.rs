//! The cache engine: the single entry point combining both tiers, the tag
//! index, the dependency graph, the lock manager, statistics, and the
//! warming scheduler.
//!
//! One [`CacheEngine`] is constructed at process start and injected into call
//! sites (there is no global singleton). Its per-key lifecycle:
//!
//! ```text
//! Absent → Loading → Fresh → Stale (refresh-eligible) → Expired → Absent
//! ```
//!
//! `Loading` is guarded by a distributed per-key lease so concurrent misses
//! coalesce onto one loader. `Stale` values are still served, bounded
//! staleness being the accepted trade, and are refreshed in the background.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use stockroom_kv::DynKvBackend;

use crate::analytics::{AnalyticsSnapshot, TrackedQuery};
use crate::codec::{CompressionCodec, GzipCodec};
use crate::config::{CacheConfig, RefreshPolicy, WarmingJobSpec};
use crate::distributed::DistributedCache;
use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};
use crate::graph::DependencyGraph;
use crate::keys::KeyFamily;
use crate::loader::{Loader, LoaderFuture};
use crate::local::LocalCache;
use crate::lock::LockManager;
use crate::stats::{QueryStatsTracker, Volatility};
use crate::tags::TagIndex;
use crate::warming::{WarmingHandle, WarmingJob, run_scheduler};

/// Per-call caching options.
///
/// Most callers name an entity and inherit its strategy (TTL, tags,
/// compression, volatility); explicit fields override the strategy.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Entity whose configured strategy applies.
    pub entity: Option<String>,
    /// Explicit TTL, overriding strategy and volatility defaults.
    pub ttl: Option<Duration>,
    /// Tags in addition to the entity's strategy tags.
    pub tags: Vec<String>,
    /// Explicit volatility class.
    pub volatility: Option<Volatility>,
    /// Opt-in negative caching: a null loader result is cached as a marker
    /// for this long. Loader *errors* are never cached in any mode.
    pub negative_ttl: Option<Duration>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options inheriting the named entity's configured strategy.
    pub fn for_entity(entity: impl Into<String>) -> Self {
        Self {
            entity: Some(entity.into()),
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_volatility(mut self, volatility: Volatility) -> Self {
        self.volatility = Some(volatility);
        self
    }

    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = Some(ttl);
        self
    }
}

/// Options resolved against the config's entity strategy table.
struct Resolved {
    ttl: Duration,
    tags: Vec<String>,
    compress: bool,
    volatility: Volatility,
}

pub(crate) struct EngineInner {
    pub(crate) config: CacheConfig,
    pub(crate) l1: LocalCache,
    pub(crate) l2: DistributedCache,
    pub(crate) tags: TagIndex,
    pub(crate) graph: DependencyGraph,
    pub(crate) locks: LockManager,
    pub(crate) stats: QueryStatsTracker,
    pub(crate) policy: ArcSwap<RefreshPolicy>,
    pub(crate) jobs: DashMap<String, Arc<WarmingJob>>,
    /// Keys with a background refresh currently in flight.
    pub(crate) refreshing: DashMap<String, ()>,
    pub(crate) background_refreshes: AtomicU64,
}

impl EngineInner {
    fn resolve(&self, options: &CacheOptions) -> Resolved {
        let strategy = options
            .entity
            .as_deref()
            .and_then(|name| self.config.entity(name));

        let volatility = options
            .volatility
            .or_else(|| strategy.and_then(|s| s.volatility))
            .unwrap_or_default();

        let ttl = options
            .ttl
            .or_else(|| strategy.and_then(|s| s.default_ttl_secs.map(Duration::from_secs)))
            .unwrap_or_else(|| {
                if options.volatility.is_some() || strategy.is_some_and(|s| s.volatility.is_some())
                {
                    self.config.volatility_ttls.ttl_for(volatility)
                } else {
                    self.config.default_ttl()
                }
            });

        let mut tags = options.tags.clone();
        if let Some(strategy) = strategy {
            for tag in &strategy.tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
        }

        Resolved {
            ttl,
            tags,
            compress: strategy.is_some_and(|s| s.compress),
            volatility,
        }
    }

    /// Writes a loaded value through both tiers and registers its tags.
    pub(crate) async fn store_value(
        &self,
        key: &str,
        value: &Value,
        options: &CacheOptions,
    ) -> Option<Arc<CacheEntry>> {
        let resolved = self.resolve(options);

        let entry = if value.is_null() {
            // A null result is only cached when the caller opted in
            let ttl = options.negative_ttl?;
            Arc::new(CacheEntry::negative_marker(key, resolved.tags, ttl))
        } else {
            Arc::new(CacheEntry::new(
                key,
                value.clone(),
                resolved.tags,
                resolved.ttl,
            ))
        };

        self.l1.insert(entry.clone()).await;
        self.l2.set(&entry, resolved.compress).await;
        self.tags.register(key, &entry.tags);
        if resolved.volatility != Volatility::default() {
            self.stats.set_volatility(key, resolved.volatility);
        }
        Some(entry)
    }

    /// Schedules one background reload for a refresh-eligible key.
    ///
    /// The in-flight set guarantees at most one reload per key at a time; the
    /// caller is never delayed.
    pub(crate) fn maybe_schedule_refresh(
        self: &Arc<Self>,
        entry: &CacheEntry,
        loader: &Loader,
        options: &CacheOptions,
    ) {
        let policy = self.policy.load();
        if !policy.enabled || entry.remaining_ttl_fraction() >= policy.refresh_threshold {
            return;
        }
        if self.refreshing.insert(entry.key.clone(), ()).is_some() {
            return;
        }

        let inner = Arc::clone(self);
        let key = entry.key.clone();
        let loader = Arc::clone(loader);
        let options = options.clone();
        tokio::spawn(async move {
            debug!(key = %key, "refresh-ahead reload");
            match (loader)().await {
                Ok(value) => {
                    inner.store_value(&key, &value, &options).await;
                    inner.background_refreshes.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    // Keep serving the stale value; the foreground path
                    // reloads it once it fully expires
                    warn!(key = %key, error = %err, "refresh-ahead loader failed, keeping stale value");
                }
            }
            inner.refreshing.remove(&key);
        });
    }

    /// Adopts an entry read from the shared tier: mirrors it into L1 and
    /// re-registers its tags, so entries written by sibling processes on the
    /// same backend stay reachable by tag invalidation here.
    async fn adopt(&self, entry: CacheEntry) -> Arc<CacheEntry> {
        let entry = Arc::new(entry);
        self.tags.register(&entry.key, &entry.tags);
        self.l1.insert(entry.clone()).await;
        entry
    }

    async fn hit(&self, key: &str, entry: &CacheEntry) -> Value {
        self.stats.record_access(key, true, None);
        if entry.negative {
            Value::Null
        } else {
            entry.value.clone()
        }
    }
}

/// The engine handle. Cheap to clone indirectly via `Arc<CacheEngine>`.
pub struct CacheEngine {
    inner: Arc<EngineInner>,
    warming: std::sync::Mutex<Option<WarmingHandle>>,
}

impl CacheEngine {
    /// Builds an engine with the default gzip codec.
    pub fn new(config: CacheConfig, backend: DynKvBackend) -> Result<Self> {
        Self::with_codec(config, backend, Arc::new(GzipCodec))
    }

    /// Builds an engine with an explicit compression codec.
    pub fn with_codec(
        config: CacheConfig,
        backend: DynKvBackend,
        codec: Arc<dyn CompressionCodec>,
    ) -> Result<Self> {
        config.validate()?;

        let graph = match &config.dependencies {
            Some(tables) => DependencyGraph::new(
                tables.entity_tags.clone(),
                tables.relations.clone(),
                config.cascade_hop_depth,
            ),
            None => DependencyGraph::warehouse_defaults(config.cascade_hop_depth),
        };

        let inner = Arc::new(EngineInner {
            l1: LocalCache::new(config.l1_capacity),
            l2: DistributedCache::new(
                Arc::clone(&backend),
                codec,
                config.compression_threshold_bytes,
            ),
            tags: TagIndex::new(),
            graph,
            locks: LockManager::new(backend),
            stats: QueryStatsTracker::new(config.stats_capacity),
            policy: ArcSwap::from_pointee(config.refresh.clone()),
            jobs: DashMap::new(),
            refreshing: DashMap::new(),
            background_refreshes: AtomicU64::new(0),
            config,
        });

        Ok(Self {
            inner,
            warming: std::sync::Mutex::new(None),
        })
    }

    /// Starts the warming scheduler. Idempotent.
    pub fn start(&self) {
        let mut guard = self.warming.lock().expect("warming mutex poisoned");
        if guard.is_none() {
            *guard = Some(run_scheduler(Arc::clone(&self.inner)));
            info!(
                interval_secs = self.inner.config.warming_interval_secs,
                "warming scheduler started"
            );
        }
    }

    /// Stops background work and flushes the local tier.
    pub async fn shutdown(&self) {
        let handle = self.warming.lock().expect("warming mutex poisoned").take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
        self.inner.l1.clear();
        info!("cache engine shut down");
    }

    /// Reads a key through L1 then L2 without loading on miss.
    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(entry) = self.inner.l1.get(key).await {
            return Some(self.inner.hit(key, &entry).await);
        }
        if let Some(entry) = self.inner.l2.get(key).await {
            let entry = self.inner.adopt(entry).await;
            return Some(self.inner.hit(key, &entry).await);
        }
        self.inner.stats.record_access(key, false, None);
        None
    }

    /// Writes a value through both tiers.
    pub async fn put(&self, key: &str, value: Value, options: &CacheOptions) {
        self.inner.store_value(key, &value, options).await;
    }

    /// The get-or-load entry point.
    ///
    /// On hit the cached value returns immediately (scheduling a background
    /// reload when refresh-eligible). On miss, a per-key lease coalesces
    /// concurrent loaders; a caller that cannot win the lease within the
    /// configured wait re-checks L2 once, then computes the value itself
    /// without caching it — one duplicate computation beats unbounded
    /// queueing.
    pub async fn get_or_load(
        &self,
        key: &str,
        loader: Loader,
        options: &CacheOptions,
    ) -> Result<Value> {
        let inner = &self.inner;

        if let Some(entry) = inner.l1.get(key).await {
            inner.maybe_schedule_refresh(&entry, &loader, options);
            return Ok(inner.hit(key, &entry).await);
        }

        if let Some(entry) = inner.l2.get(key).await {
            let entry = inner.adopt(entry).await;
            inner.maybe_schedule_refresh(&entry, &loader, options);
            return Ok(inner.hit(key, &entry).await);
        }

        // Miss: compete for the per-key lease
        let lease = inner.config.lock.lease();
        let deadline = Instant::now() + inner.config.lock.wait();
        let mut token = inner.locks.acquire(key, lease).await;

        while token.is_none() {
            tokio::time::sleep(inner.config.lock.retry_interval()).await;

            // The holder may have just finished
            if let Some(entry) = inner.l2.get(key).await {
                let entry = inner.adopt(entry).await;
                return Ok(inner.hit(key, &entry).await);
            }
            if Instant::now() >= deadline {
                break;
            }
            token = inner.locks.acquire(key, lease).await;
        }

        match token {
            Some(token) => {
                let started = Instant::now();
                let result = (loader)().await;
                let elapsed = started.elapsed();

                let outcome = match result {
                    Ok(value) => {
                        inner.store_value(key, &value, options).await;
                        Ok(value)
                    }
                    // Propagate unchanged; an error is never cached
                    Err(err) => Err(CacheError::loader(key, err)),
                };

                inner.locks.release(&token).await;
                inner.stats.record_access(key, false, Some(elapsed));
                outcome
            }
            None => {
                // Re-check once, then accept one duplicate computation
                if let Some(entry) = inner.l2.get(key).await {
                    let entry = inner.adopt(entry).await;
                    return Ok(inner.hit(key, &entry).await);
                }

                debug!(key = %key, "lock wait exhausted, loading without caching");
                let started = Instant::now();
                let value = (loader)()
                    .await
                    .map_err(|err| CacheError::loader(key, err))?;
                inner
                    .stats
                    .record_access(key, false, Some(started.elapsed()));
                Ok(value)
            }
        }
    }

    /// Bypasses freshness checks: always runs the loader and replaces the
    /// cached value. On loader failure the old value is retained.
    pub async fn force_refresh(
        &self,
        key: &str,
        loader: Loader,
        options: &CacheOptions,
    ) -> Result<Value> {
        let started = Instant::now();
        let value = (loader)()
            .await
            .map_err(|err| CacheError::loader(key, err))?;
        self.inner.store_value(key, &value, options).await;
        self.inner
            .stats
            .record_access(key, false, Some(started.elapsed()));
        Ok(value)
    }

    /// Removes every key registered under `tag` from both tiers.
    pub async fn invalidate_tag(&self, tag: &str) -> usize {
        self.inner
            .tags
            .invalidate_tag(tag, &self.inner.l1, &self.inner.l2)
            .await
    }

    /// Invalidation hook for the persistence layer: a domain write to
    /// `entity` happened, drop everything it dirties.
    pub async fn invalidate_by_dependency(&self, entity: &str, cascade: bool) -> usize {
        self.inner
            .graph
            .invalidate_entity(entity, cascade, &self.inner.tags, &self.inner.l1, &self.inner.l2)
            .await
    }

    /// Registers a warming job. The declarative part usually comes from
    /// config; the loader is attached here.
    pub fn register_warming_job(
        &self,
        spec: WarmingJobSpec,
        loader: Loader,
        options: CacheOptions,
    ) -> Result<()> {
        let family = KeyFamily::new(spec.query_name.clone())?;
        let params: Vec<&str> = spec.params.iter().map(String::as_str).collect();
        let key = family.key(&params)?;

        let name = spec.query_name.clone();
        self.inner
            .jobs
            .insert(name, Arc::new(WarmingJob::new(spec, key, options, loader)));
        Ok(())
    }

    /// Attaches a loader to a warming job declared in the configuration
    /// file. Rejected when no job with that `query_name` was declared.
    pub fn register_warming_loader(
        &self,
        query_name: &str,
        loader: Loader,
        options: CacheOptions,
    ) -> Result<()> {
        let spec = self
            .inner
            .config
            .warming_jobs
            .iter()
            .find(|j| j.query_name == query_name)
            .cloned()
            .ok_or_else(|| {
                CacheError::invalid_configuration(format!(
                    "no warming job {query_name:?} declared in configuration"
                ))
            })?;
        self.register_warming_job(spec, loader, options)
    }

    /// Immediately refreshes the named warming jobs, returning how many ran
    /// successfully.
    pub async fn warm_cache(&self, query_names: &[String]) -> usize {
        let mut warmed = 0;
        for name in query_names {
            let job = self.inner.jobs.get(name).map(|j| Arc::clone(&j));
            if let Some(job) = job {
                if job.refresh(&self.inner).await {
                    warmed += 1;
                }
            } else {
                warn!(job = %name, "warm_cache: no such warming job");
            }
        }
        warmed
    }

    /// Re-runs the loaders of warming jobs whose cache key is listed.
    pub async fn force_refresh_keys(&self, keys: &[String]) -> usize {
        let jobs: Vec<Arc<WarmingJob>> = self
            .inner
            .jobs
            .iter()
            .filter(|j| keys.contains(&j.key))
            .map(|j| Arc::clone(j.value()))
            .collect();

        let mut refreshed = 0;
        for job in jobs {
            if job.refresh(&self.inner).await {
                refreshed += 1;
            }
        }
        refreshed
    }

    /// Applies a refresh-policy patch from the admin surface.
    ///
    /// Unknown keys are rejected before anything is applied; a valid patch
    /// swaps in atomically.
    pub fn configure_refresh_policy(
        &self,
        patch: &serde_json::Map<String, Value>,
    ) -> Result<RefreshPolicy> {
        let next = self.inner.policy.load().apply_patch(patch)?;
        self.inner.policy.store(Arc::new(next.clone()));
        info!(
            enabled = next.enabled,
            threshold = next.refresh_threshold,
            "refresh policy updated"
        );
        Ok(next)
    }

    /// Wipes both tiers, the tag index, and the statistics.
    ///
    /// Destructive enough to demand the configured confirmation phrase;
    /// returns the number of indexed keys removed from the distributed tier.
    pub async fn clear_all(&self, confirmation: &str) -> Result<usize> {
        if confirmation != self.inner.config.clear_confirmation {
            return Err(CacheError::invalid_configuration(
                "clear_all requires the configured confirmation phrase",
            ));
        }

        let keys = self.inner.tags.all_keys();
        let mut removed = 0;
        for key in &keys {
            if self.inner.l2.delete(key).await {
                removed += 1;
            }
        }
        self.inner.l1.clear();
        self.inner.tags.clear();
        self.inner.stats.clear();
        info!(removed, "cleared all cache tiers");
        Ok(removed)
    }

    /// Admin/observability snapshot.
    pub fn analytics(&self) -> AnalyticsSnapshot {
        AnalyticsSnapshot {
            l1_stats: self.inner.l1.snapshot(),
            l2_stats: self.inner.l2.snapshot(),
            query_stats: self
                .inner
                .stats
                .top_by_access(50)
                .into_iter()
                .map(|(key, stat)| TrackedQuery { key, stat })
                .collect(),
            dependency_graph: self.inner.graph.edges(),
            refresh_policy: RefreshPolicy::clone(&self.inner.policy.load()),
            background_refreshes: self.inner.background_refreshes.load(Ordering::Relaxed),
            warming_jobs: self.inner.jobs.iter().map(|j| j.view()).collect(),
        }
    }

    /// Current refresh policy.
    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy::clone(&self.inner.policy.load())
    }

    /// Per-key statistics handle, mainly for dashboards and tests.
    pub fn stats(&self) -> &QueryStatsTracker {
        &self.inner.stats
    }
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("l1", &self.inner.l1)
            .field("l2", &self.inner.l2)
            .field("warming_jobs", &self.inner.jobs.len())
            .finish()
    }
}

/// Wraps an async function into a cached version of itself.
///
/// The combinator replaces annotation-style caching: the returned closure
/// builds its key from the validated family and the call's arguments, then
/// routes through [`CacheEngine::get_or_load`].
///
/// ```ignore
/// let cached_low_stock = wrap_cached(
///     engine.clone(),
///     KeyFamily::new("inventory.low_stock")?,
///     CacheOptions::for_entity("inventory"),
///     |args: Vec<String>| Box::pin(async move { fetch_low_stock(&args[0]).await }),
/// );
/// let report = cached_low_stock(vec!["wh-1".into()]).await?;
/// ```
pub fn wrap_cached<F>(
    engine: Arc<CacheEngine>,
    family: KeyFamily,
    options: CacheOptions,
    load: F,
) -> impl Fn(Vec<String>) -> futures_util::future::BoxFuture<'static, Result<Value>> + Clone
where
    F: Fn(Vec<String>) -> LoaderFuture + Clone + Send + Sync + 'static,
{
    move |args: Vec<String>| {
        let engine = Arc::clone(&engine);
        let family = family.clone();
        let options = options.clone();
        let load = load.clone();

        Box::pin(async move {
            let refs: Vec<&str> = args.iter().map(String::as_str).collect();
            let key = family.key(&refs)?;

            let loader: Loader = {
                let args = args.clone();
                Arc::new(move || load(args.clone()))
            };
            engine.get_or_load(&key, loader, &options).await
        })
    }
}
