//! Engine configuration.
//!
//! Everything is serde-deserializable so deployments can ship a TOML file,
//! and everything is validated eagerly: a bad strategy table or policy value
//! fails at startup, never at request time. Durations are plain `*_secs` /
//! `*_ms` integers in the file and exposed as [`Duration`] accessors.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CacheError, Result};
use crate::keys::KeyFamily;
use crate::stats::Volatility;

/// Warming/refresh priority, high first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(CacheError::invalid_configuration(format!(
                "unknown priority {other:?}, expected high|medium|low"
            ))),
        }
    }
}

/// Caching strategy for one domain entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityStrategy {
    /// TTL override; falls back to the volatility table when absent.
    pub default_ttl_secs: Option<u64>,
    /// Key prefix this entity's queries live under (validated).
    pub key_prefix: Option<String>,
    /// Tags attached to every entry written for this entity.
    pub tags: Vec<String>,
    /// Compress L2 payloads for this entity.
    pub compress: bool,
    /// Volatility class for this entity's queries.
    pub volatility: Option<Volatility>,
}

/// Declarative registration for one warming job. The loader itself is
/// attached in code when the job is registered with the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmingJobSpec {
    /// Query family being kept warm.
    pub query_name: String,
    /// Key arguments for the warmed query.
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    /// Rewrite the entry when it is older than this.
    pub max_age_secs: u64,
}

/// Lock-manager tuning for the stampede path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Lease granted to a loading worker.
    pub lease_ms: u64,
    /// How long a losing worker waits for the holder before loading directly.
    pub wait_ms: u64,
    /// Poll interval while waiting.
    pub retry_interval_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lease_ms: 5_000,
            wait_ms: 2_000,
            retry_interval_ms: 50,
        }
    }
}

impl LockSettings {
    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Default TTL per volatility class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolatilityTtls {
    pub high_secs: u64,
    pub medium_secs: u64,
    pub low_secs: u64,
}

impl Default for VolatilityTtls {
    fn default() -> Self {
        Self {
            high_secs: 60,
            medium_secs: 300,
            low_secs: 3_600,
        }
    }
}

impl VolatilityTtls {
    pub fn ttl_for(&self, volatility: Volatility) -> Duration {
        let secs = match volatility {
            Volatility::High => self.high_secs,
            Volatility::Medium => self.medium_secs,
            Volatility::Low => self.low_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Background refresh (stale-while-revalidate + warming) policy.
///
/// Updated at runtime through the admin surface; the engine keeps it behind
/// an `ArcSwap` so hot-path reads never lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RefreshPolicy {
    pub enabled: bool,
    /// Remaining-TTL fraction below which a read schedules a refresh.
    pub refresh_threshold: f64,
    /// Concurrent background loaders, scheduler and ad-hoc combined.
    pub max_concurrent_refresh: usize,
    /// Minimum gap between two refreshes of the same warming job.
    pub min_refresh_interval_secs: u64,
    /// Default priority assigned to jobs registered without one.
    pub priority: Priority,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_threshold: 0.2,
            max_concurrent_refresh: 4,
            min_refresh_interval_secs: 30,
            priority: Priority::Medium,
        }
    }
}

impl RefreshPolicy {
    pub fn min_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.min_refresh_interval_secs)
    }

    /// Applies a JSON object patch from the admin surface.
    ///
    /// Unknown keys are rejected eagerly, before any field is applied.
    pub fn apply_patch(&self, patch: &serde_json::Map<String, Value>) -> Result<Self> {
        let mut next = self.clone();
        for (key, value) in patch {
            match key.as_str() {
                "enabled" => {
                    next.enabled = value.as_bool().ok_or_else(|| {
                        CacheError::invalid_configuration("enabled must be a boolean")
                    })?;
                }
                "refreshThreshold" => {
                    next.refresh_threshold = value.as_f64().ok_or_else(|| {
                        CacheError::invalid_configuration("refreshThreshold must be a number")
                    })?;
                }
                "maxConcurrentRefresh" => {
                    next.max_concurrent_refresh = value.as_u64().ok_or_else(|| {
                        CacheError::invalid_configuration("maxConcurrentRefresh must be an integer")
                    })? as usize;
                }
                "minRefreshIntervalSecs" => {
                    next.min_refresh_interval_secs = value.as_u64().ok_or_else(|| {
                        CacheError::invalid_configuration(
                            "minRefreshIntervalSecs must be an integer",
                        )
                    })?;
                }
                "priority" => {
                    let s = value.as_str().ok_or_else(|| {
                        CacheError::invalid_configuration("priority must be a string")
                    })?;
                    next.priority = Priority::parse(s)?;
                }
                unknown => {
                    return Err(CacheError::invalid_configuration(format!(
                        "unknown refresh policy key {unknown:?}"
                    )));
                }
            }
        }
        next.validate()?;
        Ok(next)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.refresh_threshold > 0.0 && self.refresh_threshold < 1.0) {
            return Err(CacheError::invalid_configuration(format!(
                "refreshThreshold must be in (0, 1), got {}",
                self.refresh_threshold
            )));
        }
        if self.max_concurrent_refresh == 0 {
            return Err(CacheError::invalid_configuration(
                "maxConcurrentRefresh must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Explicit dependency tables overriding the built-in warehouse defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyTables {
    pub entity_tags: HashMap<String, Vec<String>>,
    pub relations: HashMap<String, Vec<String>>,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// L1 capacity in entries.
    pub l1_capacity: u64,
    /// Payloads below this size skip compression even when enabled.
    pub compression_threshold_bytes: usize,
    /// TTL used when neither options, strategy, nor volatility decide.
    pub default_ttl_secs: u64,
    /// Tracked-key cap for query statistics.
    pub stats_capacity: usize,
    /// Cascade hop depth for dependency invalidation.
    pub cascade_hop_depth: usize,
    /// Scheduler tick interval.
    pub warming_interval_secs: u64,
    /// Phrase `clear_all` demands before wiping both tiers.
    pub clear_confirmation: String,
    pub lock: LockSettings,
    pub refresh: RefreshPolicy,
    pub volatility_ttls: VolatilityTtls,
    /// Per-entity strategy table.
    pub entities: HashMap<String, EntityStrategy>,
    /// Declarative warming registrations.
    pub warming_jobs: Vec<WarmingJobSpec>,
    /// Dependency tables; `None` uses the warehouse defaults.
    pub dependencies: Option<DependencyTables>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 10_000,
            compression_threshold_bytes: 1_024,
            default_ttl_secs: 300,
            stats_capacity: 10_000,
            cascade_hop_depth: 1,
            warming_interval_secs: 60,
            clear_confirmation: "stockroom-clear-all".to_string(),
            lock: LockSettings::default(),
            refresh: RefreshPolicy::default(),
            volatility_ttls: VolatilityTtls::default(),
            entities: HashMap::new(),
            warming_jobs: Vec::new(),
            dependencies: None,
        }
    }
}

impl CacheConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| CacheError::invalid_configuration(format!("bad TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CacheError::invalid_configuration(format!(
                "cannot read {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn warming_interval(&self) -> Duration {
        Duration::from_secs(self.warming_interval_secs)
    }

    /// Strategy for an entity, if configured.
    pub fn entity(&self, name: &str) -> Option<&EntityStrategy> {
        self.entities.get(name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.l1_capacity == 0 {
            return Err(CacheError::invalid_configuration(
                "l1_capacity must be at least 1",
            ));
        }
        if self.default_ttl_secs == 0 {
            return Err(CacheError::invalid_configuration(
                "default_ttl_secs must be at least 1",
            ));
        }
        if self.lock.lease_ms == 0 || self.lock.retry_interval_ms == 0 {
            return Err(CacheError::invalid_configuration(
                "lock lease_ms and retry_interval_ms must be positive",
            ));
        }
        if self.clear_confirmation.is_empty() {
            return Err(CacheError::invalid_configuration(
                "clear_confirmation must not be empty",
            ));
        }
        self.refresh.validate()?;

        for (name, strategy) in &self.entities {
            if let Some(prefix) = &strategy.key_prefix {
                KeyFamily::new(prefix.clone()).map_err(|e| {
                    CacheError::invalid_configuration(format!(
                        "entity {name:?} key_prefix: {e}"
                    ))
                })?;
            }
            if strategy.default_ttl_secs == Some(0) {
                return Err(CacheError::invalid_configuration(format!(
                    "entity {name:?} default_ttl_secs must be positive"
                )));
            }
        }

        for job in &self.warming_jobs {
            KeyFamily::new(job.query_name.clone()).map_err(|e| {
                CacheError::invalid_configuration(format!(
                    "warming job {:?}: {e}",
                    job.query_name
                ))
            })?;
            if job.max_age_secs == 0 {
                return Err(CacheError::invalid_configuration(format!(
                    "warming job {:?} max_age_secs must be positive",
                    job.query_name
                )));
            }
        }
        Ok(())
    }
}
