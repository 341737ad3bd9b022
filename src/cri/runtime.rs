//! The `RuntimeService` handlers: CRI dispatch over the sandbox map.
//!
//! This layer owns the map from sandbox id to [`PodSandbox`] and nothing
//! else: each handler derives or decomposes ids, locates the sandbox, and
//! delegates. Only structural changes to the map (`RunPodSandbox`,
//! `RemovePodSandbox`) take the map lock exclusively; every other operation
//! takes it shared, and none of them performs I/O or outbound calls while
//! holding it exclusively.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tonic::{Request, Response, Status};

use crate::api::{self, ContainerState, PodSandboxState};
use crate::cri::{
    TonicResult, CONTAINER_RUNTIME_API_VERSION, CONTAINER_RUNTIME_NAME, CONTAINER_RUNTIME_VERSION,
    KUBELET_API_VERSION,
};
use crate::ipam::IpAddressAllocator;
use crate::log_info;
use crate::names;
use crate::pods::PodSandbox;
use crate::spawn::ProgramSpawner;
use crate::switchboard::Switchboard;

// Required conditions for [`api::StatusResponse`]:

const CONDITION_RUNTIME_READY: &str = "RuntimeReady";
const CONDITION_NETWORK_READY: &str = "NetworkReady";

pub struct RuntimeService {
    /// Root filesystem the launcher resolved for us; mount host paths and
    /// sandbox log directories are opened under it.
    root_directory: PathBuf,
    /// Flat directory of image blobs, shared with [`crate::cri::ImageService`].
    image_directory: PathBuf,
    switchboard: Arc<dyn Switchboard>,
    spawner: Arc<dyn ProgramSpawner>,
    ip_address_allocator: IpAddressAllocator,

    pod_sandboxes: RwLock<BTreeMap<String, Arc<PodSandbox>>>,
}

impl RuntimeService {
    pub fn new(
        root_directory: PathBuf,
        image_directory: PathBuf,
        switchboard: Arc<dyn Switchboard>,
        spawner: Arc<dyn ProgramSpawner>,
        ip_address_allocator: IpAddressAllocator,
    ) -> Self {
        Self {
            root_directory,
            image_directory,
            switchboard,
            spawner,
            ip_address_allocator,
            pod_sandboxes: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn version(
        &self,
        _request: Request<api::VersionRequest>,
    ) -> TonicResult<api::VersionResponse> {
        Ok(Response::new(api::VersionResponse {
            version: String::from(KUBELET_API_VERSION),
            runtime_name: String::from(CONTAINER_RUNTIME_NAME),
            runtime_version: String::from(CONTAINER_RUNTIME_VERSION),
            runtime_api_version: String::from(CONTAINER_RUNTIME_API_VERSION),
        }))
    }

    pub async fn status(
        &self,
        _request: Request<api::StatusRequest>,
    ) -> TonicResult<api::StatusResponse> {
        // This environment is always runtime ready and network ready.
        let condition = |name: &str| api::RuntimeCondition {
            r#type: String::from(name),
            status: true,
            reason: String::new(),
            message: String::new(),
        };
        Ok(Response::new(api::StatusResponse {
            status: Some(api::RuntimeStatus {
                conditions: vec![
                    condition(CONDITION_RUNTIME_READY),
                    condition(CONDITION_NETWORK_READY),
                ],
            }),
        }))
    }

    pub async fn run_pod_sandbox(
        &self,
        request: Request<api::RunPodSandboxRequest>,
    ) -> TonicResult<api::RunPodSandboxResponse> {
        let config = request.into_inner().config.unwrap_or_default();
        let pod_sandbox_id = names::pod_sandbox_name(&config.metadata.clone().unwrap_or_default());

        // Idempotence: only create the pod sandbox if it doesn't exist yet.
        let mut pod_sandboxes = self.pod_sandboxes.write().await;
        if !pod_sandboxes.contains_key(&pod_sandbox_id) {
            let ip_address_lease = self
                .ip_address_allocator
                .allocate()
                .map_err(|error| Status::internal(error.to_string()))?;
            log_info!(
                sandbox: &pod_sandbox_id,
                "Created pod sandbox with IP address {}",
                ip_address_lease
            );
            pod_sandboxes.insert(
                pod_sandbox_id.clone(),
                Arc::new(PodSandbox::new(config, ip_address_lease)),
            );
        }

        Ok(Response::new(api::RunPodSandboxResponse { pod_sandbox_id }))
    }

    pub async fn stop_pod_sandbox(
        &self,
        request: Request<api::StopPodSandboxRequest>,
    ) -> TonicResult<api::StopPodSandboxResponse> {
        let pod_sandbox_id = request.into_inner().pod_sandbox_id;
        let pod_sandboxes = self.pod_sandboxes.read().await;
        let pod_sandbox = pod_sandboxes
            .get(&pod_sandbox_id)
            .ok_or_else(|| Status::not_found("Pod sandbox does not exist"))?;
        pod_sandbox.stop().await;
        Ok(Response::new(api::StopPodSandboxResponse {}))
    }

    pub async fn remove_pod_sandbox(
        &self,
        request: Request<api::RemovePodSandboxRequest>,
    ) -> TonicResult<api::RemovePodSandboxResponse> {
        let pod_sandbox_id = request.into_inner().pod_sandbox_id;
        let mut pod_sandboxes = self.pod_sandboxes.write().await;
        // Removing a sandbox drops it, which returns its IP lease to the
        // allocator. Absent ids succeed.
        pod_sandboxes.remove(&pod_sandbox_id);
        Ok(Response::new(api::RemovePodSandboxResponse {}))
    }

    pub async fn pod_sandbox_status(
        &self,
        request: Request<api::PodSandboxStatusRequest>,
    ) -> TonicResult<api::PodSandboxStatusResponse> {
        let pod_sandbox_id = request.into_inner().pod_sandbox_id;
        let pod_sandboxes = self.pod_sandboxes.read().await;
        let pod_sandbox = pod_sandboxes
            .get(&pod_sandbox_id)
            .ok_or_else(|| Status::not_found("Pod sandbox does not exist"))?;
        let mut status = pod_sandbox.get_status().await;
        status.id = pod_sandbox_id;
        Ok(Response::new(api::PodSandboxStatusResponse {
            status: Some(status),
        }))
    }

    pub async fn list_pod_sandbox(
        &self,
        request: Request<api::ListPodSandboxRequest>,
    ) -> TonicResult<api::ListPodSandboxResponse> {
        let filter = request.into_inner().filter.unwrap_or_default();
        let state = filter
            .state
            .and_then(|value| PodSandboxState::try_from(value.state).ok());

        let pod_sandboxes = self.pod_sandboxes.read().await;
        let mut items = Vec::new();
        for (id, pod_sandbox) in pod_sandboxes.iter() {
            // Apply filters.
            if !filter.id.is_empty() && &filter.id != id {
                continue;
            }
            if !pod_sandbox
                .matches_filter(state, &filter.label_selector)
                .await
            {
                continue;
            }

            let mut info = pod_sandbox.get_info().await;
            info.id = id.clone();
            items.push(info);
        }
        Ok(Response::new(api::ListPodSandboxResponse { items }))
    }

    pub async fn create_container(
        &self,
        request: Request<api::CreateContainerRequest>,
    ) -> TonicResult<api::CreateContainerResponse> {
        let request = request.into_inner();
        let pod_sandboxes = self.pod_sandboxes.read().await;
        let pod_sandbox = pod_sandboxes
            .get(&request.pod_sandbox_id)
            .ok_or_else(|| Status::not_found("Pod sandbox does not exist"))?;

        let config = request.config.unwrap_or_default();
        let container_id = names::container_name(&config.metadata.clone().unwrap_or_default());
        pod_sandbox.create_container(&container_id, config).await?;
        Ok(Response::new(api::CreateContainerResponse {
            container_id: names::compose(&request.pod_sandbox_id, &container_id),
        }))
    }

    pub async fn start_container(
        &self,
        request: Request<api::StartContainerRequest>,
    ) -> TonicResult<api::StartContainerResponse> {
        let container_id = request.into_inner().container_id;
        let (pod_sandbox_id, container_id) = names::decompose(&container_id);
        let pod_sandboxes = self.pod_sandboxes.read().await;
        let pod_sandbox = pod_sandboxes
            .get(pod_sandbox_id)
            .ok_or_else(|| Status::not_found("Pod sandbox does not exist"))?;
        pod_sandbox
            .start_container(
                container_id,
                &self.root_directory,
                &self.image_directory,
                self.switchboard.as_ref(),
                self.spawner.as_ref(),
            )
            .await?;
        Ok(Response::new(api::StartContainerResponse {}))
    }

    pub async fn stop_container(
        &self,
        request: Request<api::StopContainerRequest>,
    ) -> TonicResult<api::StopContainerResponse> {
        let request = request.into_inner();
        let (pod_sandbox_id, container_id) = names::decompose(&request.container_id);
        let pod_sandboxes = self.pod_sandboxes.read().await;
        let pod_sandbox = pod_sandboxes
            .get(pod_sandbox_id)
            .ok_or_else(|| Status::not_found("Pod sandbox does not exist"))?;
        if !pod_sandbox.stop_container(container_id, request.timeout).await {
            return Err(Status::not_found("Container does not exist"));
        }
        Ok(Response::new(api::StopContainerResponse {}))
    }

    pub async fn remove_container(
        &self,
        request: Request<api::RemoveContainerRequest>,
    ) -> TonicResult<api::RemoveContainerResponse> {
        let container_id = request.into_inner().container_id;
        let (pod_sandbox_id, container_id) = names::decompose(&container_id);
        let pod_sandboxes = self.pod_sandboxes.read().await;
        // Removal silently succeeds when the sandbox is already gone.
        if let Some(pod_sandbox) = pod_sandboxes.get(pod_sandbox_id) {
            pod_sandbox.remove_container(container_id).await;
        }
        Ok(Response::new(api::RemoveContainerResponse {}))
    }

    pub async fn list_containers(
        &self,
        request: Request<api::ListContainersRequest>,
    ) -> TonicResult<api::ListContainersResponse> {
        let filter = request.into_inner().filter.unwrap_or_default();
        let (id_sandbox, id_container) = names::decompose(&filter.id);
        let state = filter
            .state
            .and_then(|value| ContainerState::try_from(value.state).ok());

        let pod_sandboxes = self.pod_sandboxes.read().await;
        let mut containers = Vec::new();
        for (id, pod_sandbox) in pod_sandboxes.iter() {
            // Apply filters.
            if !filter.pod_sandbox_id.is_empty() && &filter.pod_sandbox_id != id {
                continue;
            }
            if !id_sandbox.is_empty() && id_sandbox != id {
                continue;
            }

            for (container_id, mut info) in pod_sandbox
                .get_container_info(id_container, state, &filter.label_selector)
                .await
            {
                // Re-attach the composite ids the client sees.
                info.id = names::compose(id, &container_id);
                info.pod_sandbox_id = id.clone();
                containers.push(info);
            }
        }
        Ok(Response::new(api::ListContainersResponse { containers }))
    }

    pub async fn container_status(
        &self,
        request: Request<api::ContainerStatusRequest>,
    ) -> TonicResult<api::ContainerStatusResponse> {
        let id = request.into_inner().container_id;
        let (pod_sandbox_id, container_id) = names::decompose(&id);
        let pod_sandboxes = self.pod_sandboxes.read().await;
        let pod_sandbox = pod_sandboxes
            .get(pod_sandbox_id)
            .ok_or_else(|| Status::not_found("Pod sandbox does not exist"))?;
        let mut status = pod_sandbox
            .get_container_status(container_id)
            .await
            .ok_or_else(|| Status::not_found("Container does not exist"))?;
        status.id = id;
        Ok(Response::new(api::ContainerStatusResponse {
            status: Some(status),
        }))
    }

    pub async fn attach(
        &self,
        _request: Request<api::AttachRequest>,
    ) -> TonicResult<api::AttachResponse> {
        Err(Status::unimplemented(
            "Attach still needs to be implemented!",
        ))
    }

    pub async fn port_forward(
        &self,
        _request: Request<api::PortForwardRequest>,
    ) -> TonicResult<api::PortForwardResponse> {
        Err(Status::unimplemented(
            "PortForward still needs to be implemented!",
        ))
    }

    pub async fn update_runtime_config(
        &self,
        request: Request<api::UpdateRuntimeConfigRequest>,
    ) -> TonicResult<api::UpdateRuntimeConfigResponse> {
        let pod_cidr = request
            .into_inner()
            .runtime_config
            .unwrap_or_default()
            .network_config
            .unwrap_or_default()
            .pod_cidr;
        self.ip_address_allocator
            .set_range(&pod_cidr)
            .map_err(|_| Status::invalid_argument("Failed to parse IP range"))?;
        Ok(Response::new(api::UpdateRuntimeConfigResponse {}))
    }
}
