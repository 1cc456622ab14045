//! The per-repository router (spec §4.F): decides which physical node
//! a classified RPC is forwarded to, given the current health
//! snapshot and the configured election strategy.

mod router;
mod strategy;
mod types;

pub use router::Router;
pub use strategy::{ElectionStrategy, LocalElection, PerRepositoryElection, SqlElection};
pub use types::{MethodClass, MutatorRoute, RouteDecision};
