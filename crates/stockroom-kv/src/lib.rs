//! Key-value backend abstraction for the Stockroom cache layer.
//!
//! The cache core talks to its shared tier exclusively through
//! [`KeyValueBackend`], so deployments can run Redis-compatible stores in
//! production and [`MemoryBackend`] in tests and single-node setups. The
//! contract is intentionally narrow: get/set/delete/exists plus the
//! conditional create the lock manager builds leases on.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{KvError, Result};
pub use memory::MemoryBackend;
pub use traits::{DynKvBackend, KeyValueBackend};
