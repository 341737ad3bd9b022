//! The file-descriptor layer: custom tags that reference live descriptors.

use std::collections::BTreeMap;
use std::fs::File;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use crate::api::{ContainerMetadata, PodSandboxMetadata};
use crate::argdata::Argdata;
use crate::switchboard::{ConstrainRequest, Right, Switchboard};

use super::{ResolveError, YamlFactory, TAG_CONTAINER_LOG, TAG_MOUNT, TAG_SERVER};

// Labels stamped onto every constrained server connection. User-supplied
// labels may augment but never override them.
const LABEL_NAMESPACE: &str = "server_kubernetes_namespace";
const LABEL_POD_NAME: &str = "server_kubernetes_pod_name";
const LABEL_POD_ATTEMPT: &str = "server_kubernetes_pod_attempt";
const LABEL_CONTAINER_NAME: &str = "server_kubernetes_container_name";
const LABEL_CONTAINER_ATTEMPT: &str = "server_kubernetes_container_attempt";

pub struct YamlFileDescriptorFactory<'a> {
    pod_metadata: &'a PodSandboxMetadata,
    container_metadata: &'a ContainerMetadata,
    /// Write end of the container's log pipe.
    container_log: RawFd,
    /// Open directory handles per container path, owned by the start scope.
    mounts: &'a BTreeMap<String, File>,
    switchboard: &'a dyn Switchboard,
    fallback: &'a mut dyn YamlFactory,
    /// Descriptors returned by the switchboard. They must stay open until
    /// the spawn primitive has copied the tree into the child, so the
    /// factory (owned by the start scope) keeps them.
    descriptors: Vec<OwnedFd>,
}

impl<'a> YamlFileDescriptorFactory<'a> {
    pub fn new(
        pod_metadata: &'a PodSandboxMetadata,
        container_metadata: &'a ContainerMetadata,
        container_log: RawFd,
        mounts: &'a BTreeMap<String, File>,
        switchboard: &'a dyn Switchboard,
        fallback: &'a mut dyn YamlFactory,
    ) -> Self {
        Self {
            pod_metadata,
            container_metadata,
            container_log,
            mounts,
            switchboard,
            fallback,
            descriptors: Vec::new(),
        }
    }
}

impl YamlFactory for YamlFileDescriptorFactory<'_> {
    fn get_null(&mut self) -> Result<Argdata, ResolveError> {
        self.fallback.get_null()
    }

    fn get_scalar(&mut self, tag: &str, value: &str) -> Result<Argdata, ResolveError> {
        match tag {
            TAG_CONTAINER_LOG => Ok(Argdata::Fd(self.container_log)),
            TAG_MOUNT => match self.mounts.get(value) {
                Some(handle) => Ok(Argdata::Fd(handle.as_raw_fd())),
                None => Err(ResolveError::UnknownMount {
                    path: String::from(value),
                }),
            },
            _ => self.fallback.get_scalar(tag, value),
        }
    }

    fn get_sequence(&mut self, tag: &str, elements: Vec<Argdata>) -> Result<Argdata, ResolveError> {
        self.fallback.get_sequence(tag, elements)
    }

    fn get_map(
        &mut self,
        tag: &str,
        keys: Vec<Argdata>,
        values: Vec<Argdata>,
    ) -> Result<Argdata, ResolveError> {
        if tag != TAG_SERVER {
            return self.fallback.get_map(tag, keys, values);
        }

        // Constraints to be placed on the switchboard connection that is
        // provided to the running process.
        let mut request = ConstrainRequest {
            rights: vec![Right::ServerStart],
            in_labels: BTreeMap::new(),
        };
        let labels = &mut request.in_labels;
        labels.insert(
            String::from(LABEL_NAMESPACE),
            self.pod_metadata.namespace.clone(),
        );
        labels.insert(String::from(LABEL_POD_NAME), self.pod_metadata.name.clone());
        labels.insert(
            String::from(LABEL_POD_ATTEMPT),
            self.pod_metadata.attempt.to_string(),
        );
        labels.insert(
            String::from(LABEL_CONTAINER_NAME),
            self.container_metadata.name.clone(),
        );
        labels.insert(
            String::from(LABEL_CONTAINER_ATTEMPT),
            self.container_metadata.attempt.to_string(),
        );
        for (key, value) in keys.iter().zip(values.iter()) {
            let (Some(key), Some(value)) = (key.as_str(), value.as_str()) else {
                return Err(ResolveError::NonStringLabel);
            };
            if labels
                .insert(String::from(key), String::from(value))
                .is_some()
            {
                return Err(ResolveError::PredefinedLabelOverride {
                    label: String::from(key),
                });
            }
        }

        // Request the constrained connection and embed its descriptor.
        let descriptor = self
            .switchboard
            .constrain(&request)
            .map_err(ResolveError::Switchboard)?;
        let fd = descriptor.as_raw_fd();
        self.descriptors.push(descriptor);
        Ok(Argdata::Fd(fd))
    }
}
