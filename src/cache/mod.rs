//! Response cache for read traffic.
//!
//! This module provides a generation-scoped caching mechanism that:
//! - Routes each request to pass-through, network-first or cache-first
//! - Serves cached snapshots (or an offline page) when the network is down
//! - Replaces the whole cache when a new generation is activated

mod layer;
mod route;
mod storage;
mod traits;

pub use layer::CacheRouter;
pub use route::RouteTable;
pub use storage::SqliteStorage;
pub use traits::ServedFrom;
