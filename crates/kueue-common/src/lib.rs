//! Common types for the ClusterQueue controller: CRDs, quantities, errors, and telemetry

#![deny(missing_docs)]

use std::time::Duration;

pub mod crd;
pub mod error;
pub mod quantity;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for server-side apply and updates
pub const FIELD_MANAGER: &str = "kueue-controller";

/// Delay applied to workload-triggered reconcile requests so that bursts of
/// workload changes for the same ClusterQueue collapse into one reconcile.
pub const UPDATES_BATCH_PERIOD: Duration = Duration::from_secs(1);
