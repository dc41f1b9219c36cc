//! Admission cache and queue manager
//!
//! Both are process-wide, mutated by many event handlers at once, and read
//! by the ClusterQueue status computation. Consumers depend on the
//! [`ClusterQueueCache`] and [`QueueManager`] traits; the in-memory types in
//! this crate are the implementations wired into the operator binary.

#![deny(missing_docs)]

mod cache;
mod error;
mod queue_manager;

pub use cache::{ClusterQueueCache, InMemoryCache, UsedResources};
pub use error::StateError;
pub use queue_manager::{InMemoryQueueManager, QueueManager};
