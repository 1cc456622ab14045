//! Protocol registry (spec.md §4.A): classifies RPC methods as
//! mutator/accessor, locates the repository identifier within the
//! first request frame, and marks transaction-capable methods.

mod registry;
mod well_known;
mod wire;

pub use registry::{Consistency, FieldPath, MethodInfo, Registry, UnknownMethodPolicy};
pub use well_known::default_registry;
pub use wire::{extract_string, WireError};
