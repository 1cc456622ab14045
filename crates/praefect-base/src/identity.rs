use serde::{Deserialize, Serialize};

/// VirtualStorageName identifies a named logical cluster (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VirtualStorageName(pub String);

/// StorageName identifies a physical node, unique within its virtual
/// storage (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageName(pub String);

/// RelativePath is the client-visible path of a repository, as
/// distinct from its on-disk replica path (spec.md §3: "a replica-path
/// may differ from the relative path").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelativePath(pub String);

/// RepositoryId is the (VirtualStorageName, RelativePath) pair that
/// uniquely identifies a logical repository (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryId {
    pub virtual_storage: VirtualStorageName,
    pub relative_path: RelativePath,
}

impl RepositoryId {
    pub fn new(virtual_storage: impl Into<String>, relative_path: impl Into<String>) -> Self {
        Self {
            virtual_storage: VirtualStorageName(virtual_storage.into()),
            relative_path: RelativePath(relative_path.into()),
        }
    }

    /// The `vs|target|relativePath` lock-id key used by the
    /// replication queue (spec.md §3, §4.D, GLOSSARY "Lock-id").
    pub fn lock_id(&self, target: &StorageName) -> String {
        format!("{}|{}|{}", self.virtual_storage.0, target.0, self.relative_path.0)
    }
}

impl std::fmt::Display for VirtualStorageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::fmt::Display for StorageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::fmt::Display for RelativePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.virtual_storage, self.relative_path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lock_id_matches_the_spec_key_shape() {
        let repo = RepositoryId::new("default", "groups/proj.git");
        assert_eq!(
            repo.lock_id(&StorageName("gitaly-2".into())),
            "default|gitaly-2|groups/proj.git"
        );
    }
}
