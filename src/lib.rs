//! Scuba: a minimal Kubernetes
//! [Container Runtime Interface](https://kubernetes.io/docs/concepts/architecture/cri/)
//! runtime that executes workloads as ordinary child processes of the host.
//!
//! This crate is the runtime-service control plane: the in-memory model of
//! pod sandboxes and containers, their lifecycle state machines, the IP
//! address allocator that leases per-sandbox addresses, the composite
//! container-id naming scheme, and the YAML→argdata resolver that
//! materializes container launch arguments at spawn time.
//!
//! The wire surface is not in here. A separate RPC layer accepts framed CRI
//! requests from the kubelet and dispatches them to [`cri::RuntimeService`]
//! and [`cri::ImageService`], whose methods have exactly the signatures a
//! tonic-generated service trait expects. The host's program-spawn primitive
//! and the switchboard capability broker are likewise supplied by the
//! embedding launcher through the [`spawn`] and [`switchboard`] seams.

pub mod api;
pub mod argdata;
pub mod containers;
pub mod cri;
pub mod error;
pub mod ipam;
pub mod logfile;
pub mod logging;
pub mod names;
pub mod pods;
pub mod spawn;
pub mod switchboard;
pub mod timestamp;
pub mod yaml;
