//! Implementation of the
//! [Container Runtime Interface](https://kubernetes.io/docs/concepts/architecture/cri/)
//! control plane: the `RuntimeService` and `ImageService` handler sets.
//!
//! The methods here have the exact signatures a tonic-generated service
//! trait dispatches into; the RPC layer that frames requests off the
//! pre-opened socket lives outside this crate.

use tonic::{Response, Status};

pub mod image;
pub mod runtime;

pub use image::ImageService;
pub use runtime::RuntimeService;

/// Type boilerplate for a typical Tonic response result.
pub type TonicResult<T> = Result<Response<T>, Status>;

/// "For now it expects 0.1.0." - the kubelet's expected version string.
pub(crate) const KUBELET_API_VERSION: &str = "0.1.0";
/// Name of this container runtime.
pub(crate) const CONTAINER_RUNTIME_NAME: &str = "scuba";
/// Version of this container runtime.
pub(crate) const CONTAINER_RUNTIME_VERSION: &str = "0.1";
/// Version of the CRI API supported by the runtime.
pub(crate) const CONTAINER_RUNTIME_API_VERSION: &str = "v1alpha1";
