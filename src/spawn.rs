//! Seam to the host's program-spawn primitive.
//!
//! Spawning a CloudABI-style program takes an executable descriptor and an
//! argument-data tree; the host copies the tree into the child, delegating
//! every referenced file descriptor along the way. How that happens is the
//! launcher's business. The control plane only needs to start a program and
//! then observe its termination, which is what these two traits express.

use std::fs::File;
use std::io;
use std::process::ExitStatus;

use async_trait::async_trait;

use crate::argdata::Argdata;

/// A handle on a spawned child process.
#[async_trait]
pub trait ChildProcess: Send {
    /// Wait for the child to terminate and return how it went. Resolves at
    /// most once; the runtime calls it exactly once per child.
    async fn wait(&mut self) -> io::Result<ExitStatus>;

    /// Deliver SIGKILL to the child without waiting for it.
    fn kill(&mut self) -> io::Result<()>;
}

/// The host mechanism for launching a program with an argument-data blob.
pub trait ProgramSpawner: Send + Sync {
    /// Launch `executable` with `argdata` as its argument tree. The caller
    /// guarantees every descriptor referenced by the tree stays open until
    /// this call returns.
    fn spawn(&self, executable: &File, argdata: &Argdata) -> io::Result<Box<dyn ChildProcess>>;
}
