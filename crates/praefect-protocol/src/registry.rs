use crate::wire::extract_string;
use praefect_base::{Error, RelativePath, Result, VirtualStorageName};
use std::collections::HashMap;

/// Consistency is the model an accessor RPC requires of the replica
/// that serves it (spec.md §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    /// Any healthy replica may serve the RPC, regardless of generation.
    Any,
    /// Only a replica whose generation equals the repository's maximum
    /// may serve the RPC.
    UpToDate,
}

/// FieldPath is the sequence of protobuf field numbers locating a
/// string value within the first request message of an RPC, used by
/// `wire::extract_string`.
#[derive(Debug, Clone)]
pub struct FieldPath(pub Vec<u32>);

/// MethodInfo classifies a single RPC method, per spec.md §4.A.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub mutates: bool,
    pub virtual_storage_field: FieldPath,
    pub relative_path_field: FieldPath,
    pub transactional: bool,
    pub consistency: Consistency,
}

impl MethodInfo {
    pub fn mutator(virtual_storage_field: &[u32], relative_path_field: &[u32], transactional: bool) -> Self {
        MethodInfo {
            mutates: true,
            virtual_storage_field: FieldPath(virtual_storage_field.to_vec()),
            relative_path_field: FieldPath(relative_path_field.to_vec()),
            transactional,
            consistency: Consistency::Any,
        }
    }

    pub fn accessor(virtual_storage_field: &[u32], relative_path_field: &[u32], consistency: Consistency) -> Self {
        MethodInfo {
            mutates: false,
            virtual_storage_field: FieldPath(virtual_storage_field.to_vec()),
            relative_path_field: FieldPath(relative_path_field.to_vec()),
            transactional: false,
            consistency,
        }
    }
}

/// UnknownMethodPolicy governs lookup() for a method the registry has
/// no record of (spec.md §4.A: "Unknown methods are rejected or, where
/// configured, passed through as non-transactional accessor traffic to
/// a primary").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownMethodPolicy {
    Reject,
    PassThroughAsPrimaryAccessor,
}

/// Registry is the protocol registry of spec.md §4.A: a static table,
/// built once at startup, mapping a full gRPC method name to its
/// MethodInfo classification.
pub struct Registry {
    methods: HashMap<String, MethodInfo>,
    unknown_policy: UnknownMethodPolicy,
}

impl Registry {
    pub fn new(unknown_policy: UnknownMethodPolicy) -> Self {
        Registry { methods: HashMap::new(), unknown_policy }
    }

    pub fn register(&mut self, method: impl Into<String>, info: MethodInfo) -> &mut Self {
        self.methods.insert(method.into(), info);
        self
    }

    /// Looks up a method's classification, falling back to
    /// `unknown_policy` for methods the registry was never told about.
    pub fn classify(&self, method: &str) -> Result<MethodInfo> {
        if let Some(info) = self.methods.get(method) {
            return Ok(info.clone());
        }
        match self.unknown_policy {
            UnknownMethodPolicy::Reject => {
                Err(Error::InvalidArgument(format!("unknown RPC method '{method}'")))
            }
            UnknownMethodPolicy::PassThroughAsPrimaryAccessor => Ok(MethodInfo::accessor(&[], &[], Consistency::Any)),
        }
    }

    /// Extracts `(virtual_storage, relative_path)` from the first
    /// request frame's raw bytes, per the method's configured field
    /// paths (spec.md §4.F, step "Read (vs, relPath) from the
    /// designated field path").
    pub fn extract_repository(
        &self,
        info: &MethodInfo,
        first_request: &[u8],
    ) -> Result<(VirtualStorageName, RelativePath)> {
        if info.virtual_storage_field.0.is_empty() || info.relative_path_field.0.is_empty() {
            return Err(Error::InvalidArgument(
                "method has no configured repository field path".into(),
            ));
        }
        let vs = extract_string(first_request, &info.virtual_storage_field.0)
            .map_err(|e| Error::InvalidArgument(format!("missing virtual storage field: {e}")))?;
        let path = extract_string(first_request, &info.relative_path_field.0)
            .map_err(|e| Error::InvalidArgument(format!("missing relative path field: {e}")))?;
        Ok((VirtualStorageName(vs), RelativePath(path)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode_string_field(field_num: u32, value: &str) -> Vec<u8> {
        let mut out = Vec::new();
        let tag = ((field_num as u64) << 3) | 2;
        let mut v = tag;
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if v == 0 {
                break;
            }
        }
        out.push(value.len() as u8);
        out.extend_from_slice(value.as_bytes());
        out
    }

    #[test]
    fn unknown_method_rejected_by_default() {
        let registry = Registry::new(UnknownMethodPolicy::Reject);
        assert!(registry.classify("Unimagined/Method").is_err());
    }

    #[test]
    fn unknown_method_passes_through_when_configured() {
        let registry = Registry::new(UnknownMethodPolicy::PassThroughAsPrimaryAccessor);
        let info = registry.classify("Unimagined/Method").unwrap();
        assert!(!info.mutates);
        assert!(!info.transactional);
    }

    #[test]
    fn registered_mutator_is_classified_and_extracted() {
        let mut registry = Registry::new(UnknownMethodPolicy::Reject);
        registry.register(
            "gitaly.RepositoryService/WriteRef",
            MethodInfo::mutator(&[1], &[2], true),
        );
        let info = registry.classify("gitaly.RepositoryService/WriteRef").unwrap();
        assert!(info.mutates);
        assert!(info.transactional);

        let mut req = encode_string_field(1, "default");
        req.extend(encode_string_field(2, "a/b.git"));
        let (vs, path) = registry.extract_repository(&info, &req).unwrap();
        assert_eq!(vs.0, "default");
        assert_eq!(path.0, "a/b.git");
    }
}
