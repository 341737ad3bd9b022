//! Naming scheme for pod sandboxes and containers.
//!
//! This runtime keeps no database: the id of a pod sandbox or container is
//! derived entirely from its CRI metadata, which makes id assignment
//! idempotent across repeated `RunPodSandbox`/`CreateContainer` calls. The
//! externally visible container id is the sandbox id and the container id
//! joined with a `|`, so that a single string identifies both levels.

use crate::api::{ContainerMetadata, PodSandboxMetadata};

/// Separates the sandbox half from the container half in a composite id.
const COMPOSITE_SEPARATOR: char = '|';

/// Derive the stable pod sandbox id from its metadata.
pub fn pod_sandbox_name(metadata: &PodSandboxMetadata) -> String {
    format!(
        "name={},uid={},namespace={},attempt={}",
        metadata.name, metadata.uid, metadata.namespace, metadata.attempt
    )
}

/// Derive the stable (sandbox-internal) container id from its metadata.
pub fn container_name(metadata: &ContainerMetadata) -> String {
    format!("name={},attempt={}", metadata.name, metadata.attempt)
}

/// Compose the externally visible container id.
pub fn compose(pod_sandbox_id: &str, container_id: &str) -> String {
    format!("{pod_sandbox_id}{COMPOSITE_SEPARATOR}{container_id}")
}

/// Split a composite container id at the first separator.
///
/// Returns two empty views if the separator is absent, which makes every
/// lookup with a malformed id miss instead of fail.
pub fn decompose(id: &str) -> (&str, &str) {
    match id.find(COMPOSITE_SEPARATOR) {
        Some(index) => (&id[..index], &id[index + 1..]),
        None => ("", ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_sandbox_name_from_metadata() {
        let metadata = PodSandboxMetadata {
            name: String::from("a"),
            uid: String::from("u"),
            namespace: String::from("n"),
            attempt: 0,
        };
        assert_eq!(
            pod_sandbox_name(&metadata),
            "name=a,uid=u,namespace=n,attempt=0"
        );
    }

    #[test]
    fn container_name_from_metadata() {
        let metadata = ContainerMetadata {
            name: String::from("c"),
            attempt: 3,
        };
        assert_eq!(container_name(&metadata), "name=c,attempt=3");
    }

    #[test]
    fn compose_joins_with_pipe() {
        assert_eq!(
            compose("name=a,uid=u,namespace=n,attempt=0", "name=c,attempt=3"),
            "name=a,uid=u,namespace=n,attempt=0|name=c,attempt=3"
        );
    }

    #[test]
    fn decompose_splits_at_first_separator() {
        assert_eq!(decompose("sandbox|container"), ("sandbox", "container"));
        // Later separators belong to the container half.
        assert_eq!(decompose("a|b|c"), ("a", "b|c"));
        assert_eq!(decompose("|container"), ("", "container"));
        assert_eq!(decompose("sandbox|"), ("sandbox", ""));
    }

    #[test]
    fn decompose_without_separator_is_empty() {
        assert_eq!(decompose("no separator here"), ("", ""));
        assert_eq!(decompose(""), ("", ""));
    }

    #[test]
    fn compose_decompose_roundtrip() {
        let ids = [("a", "b"), ("name=x,uid=y,namespace=z,attempt=1", "name=c,attempt=0"), ("", "")];
        for (sandbox, container) in ids {
            assert_eq!(decompose(&compose(sandbox, container)), (sandbox, container));
        }
    }
}
