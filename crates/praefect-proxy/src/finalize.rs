use praefect_base::StorageName;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcStatus {
    Ok,
    Failed,
}

/// Everything the finalizer (spec.md §4.G Step 5) needs to know about
/// one completed mutator RPC.
#[derive(Debug, Clone)]
pub struct MutatorOutcome {
    pub primary: StorageName,
    pub primary_status: RpcStatus,
    /// Secondaries that participated in the fan-out (excludes nodes
    /// classified "outdated" at plan time, which never received the
    /// RPC at all).
    pub secondary_status: HashMap<StorageName, RpcStatus>,
    /// Secondaries whose subtransaction vote was `Committed`.
    pub committed_secondaries: HashSet<StorageName>,
    /// Whether the primary's own vote committed in at least one
    /// subtransaction during the RPC (false for a non-transactional
    /// mutator, or one with zero ref updates).
    pub primary_committed: bool,
    /// True if the RPC registered at least one subtransaction.
    pub had_subtransactions: bool,
    /// Nodes the router already classified outdated in Step 2; these
    /// never receive the RPC and always need a replication job.
    pub outdated_at_plan_time: Vec<StorageName>,
}

/// A decision to enqueue a replication job; `source` is `None` only
/// when the finalizer cannot name a good source (should not occur for
/// jobs this crate produces, but kept distinct from "no job").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationTarget {
    pub source: StorageName,
    pub target: StorageName,
}

/// GenerationUpdate names the nodes whose generation should be
/// advanced together via `RepositoryStore::increment_generation`
/// (spec.md §4.C, §4.G Step 5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationUpdate {
    pub primary: StorageName,
    pub secondaries: Vec<StorageName>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizationPlan {
    pub replication_jobs: Vec<ReplicationTarget>,
    pub generation_update: Option<GenerationUpdate>,
    /// True when the primary itself must be recorded as outdated
    /// (spec.md §4.G Step 5: "the system records the primary as
    /// outdated" after a failed primary with a committed secondary).
    pub primary_is_outdated: bool,
}

/// Implements spec.md §4.G Step 5 and its edge cases.
pub fn finalize(outcome: &MutatorOutcome) -> FinalizationPlan {
    match outcome.primary_status {
        RpcStatus::Failed => finalize_failed_primary(outcome),
        RpcStatus::Ok => finalize_successful_primary(outcome),
    }
}

fn finalize_failed_primary(outcome: &MutatorOutcome) -> FinalizationPlan {
    if !outcome.primary_committed && outcome.committed_secondaries.is_empty() {
        // "If no subtransaction committed, no jobs are enqueued" —
        // covers both "no subtransactions at all" and "subtransactions
        // existed but none committed".
        return FinalizationPlan::default();
    }

    // Any secondary that committed is a viable new replication source;
    // prefer the lexically-first for determinism.
    let mut sources: Vec<&StorageName> = outcome.committed_secondaries.iter().collect();
    sources.sort();
    let Some(source) = sources.into_iter().next() else {
        return FinalizationPlan::default();
    };

    let mut jobs = vec![ReplicationTarget { source: source.clone(), target: outcome.primary.clone() }];
    for target in &outcome.outdated_at_plan_time {
        jobs.push(ReplicationTarget { source: source.clone(), target: target.clone() });
    }

    FinalizationPlan { replication_jobs: jobs, generation_update: None, primary_is_outdated: true }
}

fn finalize_successful_primary(outcome: &MutatorOutcome) -> FinalizationPlan {
    let mut jobs = Vec::new();
    let mut caught_up_secondaries = Vec::new();

    for (secondary, status) in &outcome.secondary_status {
        let needs_replication = if outcome.had_subtransactions {
            *status != RpcStatus::Ok || !outcome.committed_secondaries.contains(secondary)
        } else {
            // No subtransactions: a secondary that never voted never
            // observed the write, so it's outdated regardless of its
            // RPC status (spec.md §4.G, "Edge cases").
            true
        };

        if needs_replication {
            jobs.push(ReplicationTarget { source: outcome.primary.clone(), target: secondary.clone() });
        } else {
            caught_up_secondaries.push(secondary.clone());
        }
    }

    for target in &outcome.outdated_at_plan_time {
        jobs.push(ReplicationTarget { source: outcome.primary.clone(), target: target.clone() });
    }

    caught_up_secondaries.sort();
    FinalizationPlan {
        replication_jobs: jobs,
        generation_update: Some(GenerationUpdate { primary: outcome.primary.clone(), secondaries: caught_up_secondaries }),
        primary_is_outdated: false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn storage(name: &str) -> StorageName {
        StorageName(name.into())
    }

    #[test]
    fn successful_primary_enqueues_jobs_only_for_behind_secondaries() {
        let outcome = MutatorOutcome {
            primary: storage("a"),
            primary_status: RpcStatus::Ok,
            secondary_status: HashMap::from([(storage("b"), RpcStatus::Ok), (storage("c"), RpcStatus::Failed)]),
            committed_secondaries: HashSet::from([storage("b")]),
            primary_committed: true,
            had_subtransactions: true,
            outdated_at_plan_time: vec![],
        };
        let plan = finalize(&outcome);
        assert_eq!(plan.replication_jobs, vec![ReplicationTarget { source: storage("a"), target: storage("c") }]);
        assert_eq!(plan.generation_update.unwrap().secondaries, vec![storage("b")]);
        assert!(!plan.primary_is_outdated);
    }

    #[test]
    fn failed_primary_with_a_committed_secondary_repairs_the_primary() {
        let outcome = MutatorOutcome {
            primary: storage("a"),
            primary_status: RpcStatus::Failed,
            secondary_status: HashMap::from([(storage("b"), RpcStatus::Ok)]),
            committed_secondaries: HashSet::from([storage("b")]),
            primary_committed: false,
            had_subtransactions: true,
            outdated_at_plan_time: vec![],
        };
        let plan = finalize(&outcome);
        assert_eq!(plan.replication_jobs, vec![ReplicationTarget { source: storage("b"), target: storage("a") }]);
        assert!(plan.primary_is_outdated);
        assert!(plan.generation_update.is_none());
    }

    #[test]
    fn failed_primary_with_no_committed_subtransaction_enqueues_nothing() {
        let outcome = MutatorOutcome {
            primary: storage("a"),
            primary_status: RpcStatus::Failed,
            secondary_status: HashMap::from([(storage("b"), RpcStatus::Failed)]),
            committed_secondaries: HashSet::new(),
            primary_committed: false,
            had_subtransactions: true,
            outdated_at_plan_time: vec![],
        };
        assert_eq!(finalize(&outcome), FinalizationPlan::default());
    }

    #[test]
    fn non_transactional_success_treats_every_secondary_as_outdated() {
        let outcome = MutatorOutcome {
            primary: storage("a"),
            primary_status: RpcStatus::Ok,
            secondary_status: HashMap::from([(storage("b"), RpcStatus::Ok)]),
            committed_secondaries: HashSet::new(),
            primary_committed: false,
            had_subtransactions: false,
            outdated_at_plan_time: vec![],
        };
        let plan = finalize(&outcome);
        assert_eq!(plan.replication_jobs, vec![ReplicationTarget { source: storage("a"), target: storage("b") }]);
        assert!(plan.generation_update.unwrap().secondaries.is_empty());
    }

    #[test]
    fn outdated_at_plan_time_nodes_always_get_a_job_when_primary_succeeds() {
        let outcome = MutatorOutcome {
            primary: storage("a"),
            primary_status: RpcStatus::Ok,
            secondary_status: HashMap::new(),
            committed_secondaries: HashSet::new(),
            primary_committed: true,
            had_subtransactions: true,
            outdated_at_plan_time: vec![storage("c")],
        };
        let plan = finalize(&outcome);
        assert_eq!(plan.replication_jobs, vec![ReplicationTarget { source: storage("a"), target: storage("c") }]);
    }
}
