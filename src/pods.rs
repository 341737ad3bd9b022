//! The pod sandbox: a scope grouping related containers behind one identity
//! and one IP address.
//!
//! A sandbox owns its container map, its readiness state, and its IP lease.
//! The lease returns the address to the allocator when the sandbox is
//! dropped, so removing a sandbox from the runtime's map is all it takes to
//! free the address.
//!
//! Structural mutations of the container map and the sandbox-wide stop take
//! the sandbox lock exclusively; starting or stopping an existing child and
//! every query take it shared, so concurrent children can start in parallel
//! while each container serializes its own transitions internally.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tonic::Status;

use crate::api::{
    self, ContainerConfig, ContainerState, PodSandboxConfig, PodSandboxMetadata, PodSandboxState,
};
use crate::containers::Container;
use crate::error::{internal_io, Result};
use crate::ipam::IpAddressLease;
use crate::spawn::ProgramSpawner;
use crate::switchboard::Switchboard;
use crate::timestamp::now_nanos;

pub struct PodSandbox {
    // Data that should be returned through PodSandboxStatus.
    metadata: PodSandboxMetadata,
    /// Directory for container log files, absolute within the root.
    log_directory: String,
    created_at: i64,
    labels: HashMap<String, String>,
    annotations: HashMap<String, String>,
    ip_address_lease: IpAddressLease,

    inner: RwLock<PodSandboxInner>,
}

struct PodSandboxInner {
    state: PodSandboxState,
    containers: BTreeMap<String, Arc<Container>>,
}

impl PodSandbox {
    pub fn new(config: PodSandboxConfig, ip_address_lease: IpAddressLease) -> Self {
        Self {
            metadata: config.metadata.unwrap_or_default(),
            log_directory: config.log_directory,
            created_at: now_nanos(),
            labels: config.labels,
            annotations: config.annotations,
            ip_address_lease,
            inner: RwLock::new(PodSandboxInner {
                state: PodSandboxState::SandboxReady,
                containers: BTreeMap::new(),
            }),
        }
    }

    /// Snapshot for `ListPodSandbox`. The id is attached by the caller.
    pub async fn get_info(&self) -> api::PodSandbox {
        let inner = self.inner.read().await;
        api::PodSandbox {
            id: String::new(),
            metadata: Some(self.metadata.clone()),
            state: inner.state as i32,
            created_at: self.created_at,
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
        }
    }

    /// Snapshot for `PodSandboxStatus`. The id is attached by the caller.
    pub async fn get_status(&self) -> api::PodSandboxStatus {
        let inner = self.inner.read().await;
        api::PodSandboxStatus {
            id: String::new(),
            metadata: Some(self.metadata.clone()),
            state: inner.state as i32,
            created_at: self.created_at,
            network: Some(api::PodSandboxNetworkStatus {
                ip: self.ip_address_lease.to_string(),
            }),
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
        }
    }

    /// Force-stop every container and mark the sandbox NOT_READY, after
    /// which the orchestrator is expected to remove it.
    pub async fn stop(&self) {
        let mut inner = self.inner.write().await;
        for container in inner.containers.values() {
            container.stop(0).await;
        }
        inner.state = PodSandboxState::SandboxNotready;
    }

    /// True iff the sandbox passes a `ListPodSandbox` filter.
    pub async fn matches_filter(
        &self,
        state: Option<PodSandboxState>,
        labels: &HashMap<String, String>,
    ) -> bool {
        if let Some(state) = state {
            if state != self.inner.read().await.state {
                return false;
            }
        }
        labels
            .iter()
            .all(|(key, value)| self.labels.get(key) == Some(value))
    }

    /// Idempotent insert of a container. Refused once the sandbox has been
    /// stopped.
    pub async fn create_container(&self, container_id: &str, config: ContainerConfig) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state != PodSandboxState::SandboxReady {
            return Err(Status::failed_precondition("Pod sandbox is not ready"));
        }
        inner
            .containers
            .entry(String::from(container_id))
            .or_insert_with(|| Arc::new(Container::new(config)));
        Ok(())
    }

    /// Remove a container; no-op if absent.
    pub async fn remove_container(&self, container_id: &str) {
        let mut inner = self.inner.write().await;
        inner.containers.remove(container_id);
    }

    /// Start a container, resolving the sandbox log directory under the
    /// root filesystem.
    pub async fn start_container(
        &self,
        container_id: &str,
        root_dir: &Path,
        image_dir: &Path,
        switchboard: &dyn Switchboard,
        spawner: &dyn ProgramSpawner,
    ) -> Result<()> {
        let inner = self.inner.read().await;
        if inner.state != PodSandboxState::SandboxReady {
            return Err(Status::failed_precondition("Pod sandbox is not ready"));
        }
        let container = inner
            .containers
            .get(container_id)
            .ok_or_else(|| Status::invalid_argument(format!("{container_id} does not exist")))?;

        // Turn the provided log directory into a path relative to the root.
        let log_dir = root_dir.join(self.log_directory.trim_start_matches('/'));
        let metadata = std::fs::metadata(&log_dir)
            .map_err(|error| internal_io(&self.log_directory, &error))?;
        if !metadata.is_dir() {
            return Err(Status::internal(format!(
                "{}: Not a directory",
                self.log_directory
            )));
        }

        Arc::clone(container)
            .start(
                &self.metadata,
                root_dir,
                image_dir,
                &log_dir,
                switchboard,
                spawner,
            )
            .await
            .map_err(Status::from)
    }

    /// Stop a container; reports whether the id existed.
    pub async fn stop_container(&self, container_id: &str, timeout: i64) -> bool {
        let inner = self.inner.read().await;
        match inner.containers.get(container_id) {
            Some(container) => {
                container.stop(timeout).await;
                true
            }
            None => false,
        }
    }

    /// Collect `(id, info)` for every container passing the filters. An
    /// empty `container_id` matches all.
    pub async fn get_container_info(
        &self,
        container_id: &str,
        state: Option<ContainerState>,
        labels: &HashMap<String, String>,
    ) -> Vec<(String, api::Container)> {
        let inner = self.inner.read().await;
        let mut infos = Vec::new();
        for (id, container) in &inner.containers {
            // Apply filters.
            if !container_id.is_empty() && container_id != id {
                continue;
            }
            if !container.matches_filter(state, labels).await {
                continue;
            }
            infos.push((id.clone(), container.get_info().await));
        }
        infos
    }

    /// Status snapshot of one container, if it exists.
    pub async fn get_container_status(&self, container_id: &str) -> Option<api::ContainerStatus> {
        let inner = self.inner.read().await;
        match inner.containers.get(container_id) {
            Some(container) => Some(container.get_status().await),
            None => None,
        }
    }
}
