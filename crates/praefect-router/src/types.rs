use praefect_base::StorageName;

/// MethodClass is the outcome of classifying an RPC by its routing
/// metadata (spec.md §4.A, §4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodClass {
    /// A read that tolerates any replica.
    Accessor,
    /// A read that must observe the latest write.
    AccessorFresh,
    /// A write that must be fanned out and voted on.
    Mutator,
}

/// RouteDecision is the output of `Router::route` (spec.md §4.F).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// A single node to forward an accessor RPC to.
    Accessor(StorageName),
    /// The fan-out plan for a mutator RPC.
    Mutator(MutatorRoute),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutatorRoute {
    pub primary: StorageName,
    pub secondaries: Vec<StorageName>,
    /// Healthy but behind; excluded from the transaction's vote, but
    /// still owed a replication job (spec.md §4.F).
    pub outdated: Vec<StorageName>,
}

impl MutatorRoute {
    /// All nodes that must vote in the transaction: primary plus
    /// in-sync secondaries.
    pub fn voters(&self) -> Vec<StorageName> {
        std::iter::once(self.primary.clone()).chain(self.secondaries.iter().cloned()).collect()
    }
}
