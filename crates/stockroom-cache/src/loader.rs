//! Loader closures supplied by callers.
//!
//! A loader computes the value to cache on a miss. The engine owns when it
//! runs (under a lock, in a background refresh, during warming) but never how
//! long it takes or how it fails; errors pass back to the caller untouched,
//! and cancellation/timeouts are the loader's own responsibility.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::BoxError;

/// Future returned by a loader invocation.
pub type LoaderFuture = BoxFuture<'static, std::result::Result<Value, BoxError>>;

/// A shareable loader. The engine clones it for background refresh and
/// warming, so it must be callable more than once.
pub type Loader = Arc<dyn Fn() -> LoaderFuture + Send + Sync>;

/// Wraps an async closure into a [`Loader`].
///
/// ```ignore
/// let loader = loader_fn(|| async {
///     Ok(serde_json::json!({"rows": 12}))
/// });
/// ```
pub fn loader_fn<F, Fut>(f: F) -> Loader
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, BoxError>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}
