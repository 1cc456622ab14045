//! The replication executor and periodic reconciler (spec §4.H, §4.I):
//! drains the queue per (virtual storage, target storage), carries out
//! the on-disk effect of each job, and separately scans the healthy
//! set for divergences the queue doesn't already know about.

mod operation;
mod reconciler;
mod worker;

pub use operation::RepositoryOperation;
pub use reconciler::{Reconciler, RepositoryInventory};
pub use worker::Worker;
