//! Background warming scheduler.
//!
//! Keeps registered high-value queries warm: on every tick, jobs whose cached
//! value is missing, aging past the refresh threshold, or older than the
//! job's max age are re-run through their loader and written back, high
//! priority first, with the number of in-flight loaders capped. A failing
//! loader logs and leaves the existing value in place — availability wins
//! over freshness here.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::analytics::WarmingJobView;
use crate::config::WarmingJobSpec;
use crate::engine::{CacheOptions, EngineInner};
use crate::loader::Loader;

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// A registered warming job: the declarative spec plus its resolved cache
/// key, caching options, and loader. Lives for the process lifetime.
pub struct WarmingJob {
    pub spec: WarmingJobSpec,
    pub key: String,
    pub options: CacheOptions,
    pub(crate) loader: Loader,
    last_run_ms: AtomicI64,
}

impl WarmingJob {
    pub(crate) fn new(
        spec: WarmingJobSpec,
        key: String,
        options: CacheOptions,
        loader: Loader,
    ) -> Self {
        Self {
            spec,
            key,
            options,
            loader,
            last_run_ms: AtomicI64::new(0),
        }
    }

    /// When the job last refreshed, unix milliseconds; zero if never.
    pub fn last_run_ms(&self) -> i64 {
        self.last_run_ms.load(Ordering::Relaxed)
    }

    /// Whether this job needs a refresh under the given policy.
    pub(crate) async fn due(&self, inner: &EngineInner, threshold: f64, min_interval: Duration) -> bool {
        let last = self.last_run_ms.load(Ordering::Relaxed);
        if last > 0 && now_ms() - last < min_interval.as_millis() as i64 {
            return false;
        }

        let entry = match inner.l1.get(&self.key).await {
            Some(entry) => Some(entry),
            None => inner.l2.get(&self.key).await.map(Arc::new),
        };

        match entry {
            None => true,
            Some(entry) => {
                entry.remaining_ttl_fraction() < threshold
                    || entry.age() >= Duration::from_secs(self.spec.max_age_secs)
            }
        }
    }

    /// Runs the loader and rewrites the cache. Returns whether it succeeded;
    /// failure retains whatever value is already cached.
    pub(crate) async fn refresh(&self, inner: &EngineInner) -> bool {
        match (self.loader)().await {
            Ok(value) => {
                inner.store_value(&self.key, &value, &self.options).await;
                self.last_run_ms.store(now_ms(), Ordering::Relaxed);
                debug!(job = %self.spec.query_name, key = %self.key, "warmed");
                true
            }
            Err(err) => {
                warn!(
                    job = %self.spec.query_name,
                    key = %self.key,
                    error = %err,
                    "warming loader failed, retaining current value"
                );
                false
            }
        }
    }

    pub(crate) fn view(&self) -> WarmingJobView {
        WarmingJobView {
            query_name: self.spec.query_name.clone(),
            key: self.key.clone(),
            priority: self.spec.priority,
            max_age_secs: self.spec.max_age_secs,
            last_run_ms: self.last_run_ms(),
        }
    }
}

/// Handle to the running scheduler task.
pub struct WarmingHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl WarmingHandle {
    /// Signals the scheduler and waits for it to drain.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

/// Spawns the scheduler loop.
pub(crate) fn run_scheduler(inner: Arc<EngineInner>) -> WarmingHandle {
    let (shutdown, mut signal) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(inner.config.warming_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup isn't a
        // thundering herd of loaders
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => run_pass(&inner).await,
                changed = signal.changed() => {
                    if changed.is_err() || *signal.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("warming scheduler stopped");
    });

    WarmingHandle { shutdown, handle }
}

/// One scheduler pass over all registered jobs.
pub(crate) async fn run_pass(inner: &Arc<EngineInner>) {
    let policy = inner.policy.load_full();
    if !policy.enabled {
        return;
    }

    let mut jobs: Vec<Arc<WarmingJob>> = inner.jobs.iter().map(|j| Arc::clone(j.value())).collect();
    // High priority first; ties keep registration order stable enough
    jobs.sort_by_key(|j| j.spec.priority);

    let semaphore = Arc::new(Semaphore::new(policy.max_concurrent_refresh));
    let mut handles = Vec::new();

    for job in jobs {
        if !job
            .due(inner, policy.refresh_threshold, policy.min_refresh_interval())
            .await
        {
            continue;
        }

        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let inner = Arc::clone(inner);
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            job.refresh(&inner).await;
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
}
