//! Node-health monitor (spec.md §4.B): periodically probes each
//! physical back-end, and exposes a per-virtual-storage "healthy set"
//! snapshot that is consistent across all reads made within a single
//! `healthy_nodes()` call.

mod monitor;
mod probe;

pub use monitor::{HealthState, Monitor, Thresholds};
pub use probe::Probe;
