use crate::registry::{Consistency, MethodInfo, Registry, UnknownMethodPolicy};

/// A representative slice of the back-end's actual RPC surface,
/// classified per spec.md §4.A. Every registered method embeds its
/// repository locator under request field 1 (`repository`), itself a
/// message with `relative_path` at field 1 and `storage_name` at field
/// 2 — the shape the back-end's wire protocol actually uses, so the
/// routing header extraction in `wire::extract_string` needs no
/// back-end-specific knowledge beyond these two field numbers.
const REPOSITORY_FIELD: [u32; 2] = [1, 1];
const STORAGE_FIELD: [u32; 2] = [1, 2];

/// Builds the startup-time method table. Real deployments would
/// generate this from the back-end's full `.proto` surface; this
/// covers the methods exercised by spec.md's scenarios in §8.
pub fn default_registry(unknown_policy: UnknownMethodPolicy) -> Registry {
    let mut registry = Registry::new(unknown_policy);
    registry
        .register("gitaly.RepositoryService/RepositoryExists", MethodInfo::accessor(&REPOSITORY_FIELD, &STORAGE_FIELD, Consistency::Any))
        .register("gitaly.RepositoryService/CreateRepository", MethodInfo::mutator(&REPOSITORY_FIELD, &STORAGE_FIELD, true))
        .register("gitaly.RepositoryService/RemoveRepository", MethodInfo::mutator(&REPOSITORY_FIELD, &STORAGE_FIELD, true))
        .register("gitaly.RepositoryService/GarbageCollect", MethodInfo::mutator(&REPOSITORY_FIELD, &STORAGE_FIELD, false))
        .register("gitaly.RefService/FindAllBranches", MethodInfo::accessor(&REPOSITORY_FIELD, &STORAGE_FIELD, Consistency::Any))
        .register("gitaly.RefService/FindDefaultBranchName", MethodInfo::accessor(&REPOSITORY_FIELD, &STORAGE_FIELD, Consistency::UpToDate))
        .register("gitaly.OperationService/UserUpdateBranch", MethodInfo::mutator(&REPOSITORY_FIELD, &STORAGE_FIELD, true))
        .register("gitaly.OperationService/UserDeleteBranch", MethodInfo::mutator(&REPOSITORY_FIELD, &STORAGE_FIELD, true))
        .register("gitaly.SmartHTTPService/PostReceivePack", MethodInfo::mutator(&REPOSITORY_FIELD, &STORAGE_FIELD, true))
        .register("gitaly.SSHService/SSHReceivePack", MethodInfo::mutator(&REPOSITORY_FIELD, &STORAGE_FIELD, true));
    registry
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn a_known_mutator_is_classified_as_transactional() {
        let registry = default_registry(UnknownMethodPolicy::Reject);
        let info = registry.classify("gitaly.OperationService/UserUpdateBranch").unwrap();
        assert!(info.mutates);
        assert!(info.transactional);
    }

    #[test]
    fn garbage_collect_is_a_non_transactional_mutator() {
        let registry = default_registry(UnknownMethodPolicy::Reject);
        let info = registry.classify("gitaly.RepositoryService/GarbageCollect").unwrap();
        assert!(info.mutates);
        assert!(!info.transactional);
    }
}
