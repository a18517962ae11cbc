//! Offline mutation queue.
//!
//! Mutations that fail for lack of a network are persisted and replayed,
//! oldest first, when the host signals that connectivity is back.

mod coordinator;
mod queue;

pub use coordinator::SyncCoordinator;
pub use queue::{MutationStore, SqliteMutationStore};
