//! Seam to the switchboard capability broker.
//!
//! The switchboard hands out narrowed copies of its own connection: a
//! `Constrain` call limits the rights and attaches labels, and the broker
//! returns a fresh descriptor carrying exactly those constraints. The
//! runtime uses this to give containers server-start capabilities labeled
//! with their pod and container identity, so inbound connections can be
//! routed to the right process.
//!
//! The transport is owned by the embedding launcher; this crate only
//! defines the request shape and the trait the YAML resolver calls.

use std::collections::BTreeMap;
use std::os::fd::OwnedFd;

use tonic::Status;

/// Rights a constrained switchboard connection may hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Right {
    /// May connect to servers matching the labels.
    ClientConnect,
    /// May start acting as a server for the labels.
    ServerStart,
}

/// A request to narrow the broker connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConstrainRequest {
    pub rights: Vec<Right>,
    /// Labels the resulting connection is bound to. Keys are unique; the
    /// caller decides whether collisions are an error.
    pub in_labels: BTreeMap<String, String>,
}

/// Client to the switchboard broker, supplied by the launcher.
pub trait Switchboard: Send + Sync {
    /// Request a new connection constrained to `request`, returning the
    /// descriptor to delegate to the spawned process.
    fn constrain(&self, request: &ConstrainRequest) -> Result<OwnedFd, Status>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::fs::File;
    use std::sync::Mutex;

    use super::*;

    /// Grants every request with a throwaway descriptor and records it.
    #[derive(Default)]
    pub struct RecordingSwitchboard {
        requests: Mutex<Vec<ConstrainRequest>>,
    }

    impl RecordingSwitchboard {
        pub fn requests(&self) -> Vec<ConstrainRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Switchboard for RecordingSwitchboard {
        fn constrain(&self, request: &ConstrainRequest) -> Result<OwnedFd, Status> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(OwnedFd::from(File::open("/dev/null").unwrap()))
        }
    }
}
