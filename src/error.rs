//! Error handling for the runtime control plane.
//!
//! Every operation in this crate is initiated by a CRI call from the kubelet,
//! so errors can always be reported as a gRPC status response. Fallible
//! methods on the pod sandbox and CRI layers return `Result<_, Status>` for
//! easy fail-fast checks (`?`) down all call stacks; leaf components with a
//! richer failure vocabulary (the allocator, the YAML resolver, container
//! start) define typed errors that convert into a [`Status`] where they
//! surface:
//!
//! - Transient I/O failures become `INTERNAL` with the system error text.
//! - Validation failures (bad CIDR, unknown mount key, bad switchboard
//!   label, pull-by-checksum) become `INVALID_ARGUMENT`.
//! - Lookup misses become `NOT_FOUND`; idempotent removes swallow them.
//! - Allocator exhaustion becomes `INTERNAL`.
//! - Unsupported operations become `UNIMPLEMENTED`.

use std::result::Result as StdResult;

pub use tonic::{Code, Status};

/// Shorthand for results with [`Status`] error types.
pub type Result<T> = StdResult<T, Status>;

/// Wrap a transient I/O failure as an `INTERNAL` status,
/// keeping the offending path or resource name in the message.
pub(crate) fn internal_io(context: &str, error: &std::io::Error) -> Status {
    Status::internal(format!("{context}: {error}"))
}
