//! The per-container state machine.
//!
//! A container moves along `CREATED → RUNNING → EXITED` and never backwards:
//! a successful start transitions to RUNNING, and either a forced stop or
//! the child's own termination transitions to EXITED. Start and stop are
//! idempotent, so the kubelet can retry them freely.
//!
//! Starting is the only elaborate operation. It opens the executable from
//! the image directory, sets up the log pipe and framer, opens every bind
//! mount under the root, resolves the YAML argument-data document against
//! those live descriptors, and invokes the host spawn primitive. A reaper
//! task then owns the child handle and records its termination; the
//! container itself keeps only a kill signal for it.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::{Arc, Weak};

use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tonic::Status;

use crate::api::{self, ContainerConfig, ContainerMetadata, ContainerState, ImageSpec, Mount, PodSandboxMetadata};
use crate::log_warn;
use crate::logfile::spawn_log_writer;
use crate::names;
use crate::spawn::{ChildProcess, ProgramSpawner};
use crate::switchboard::Switchboard;
use crate::timestamp::now_nanos;
use crate::yaml::{
    ResolveError, YamlArgdataFactory, YamlBuilder, YamlCanonicalizingFactory, YamlErrorFactory,
    YamlFileDescriptorFactory,
};

/// Exit code recorded for force-killed containers.
const SIGKILL: i32 = 9;

/// Why a container failed to start. Resolution failures are the caller's
/// fault (INVALID_ARGUMENT); everything else is a resource failure
/// (INTERNAL).
#[derive(Debug, Error)]
pub enum StartError {
    #[error("{image}: {source}")]
    Executable { image: String, source: io::Error },
    #[error("Failed to open logfile {path}: {source}")]
    LogFile { path: String, source: io::Error },
    #[error("Failed to create pipe: {source}")]
    LogPipe { source: io::Error },
    #[error("{path}: {source}")]
    Mount { path: String, source: io::Error },
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("Failed to spawn process: {source}")]
    Spawn { source: io::Error },
}

impl From<StartError> for Status {
    fn from(error: StartError) -> Status {
        match &error {
            StartError::Resolve(_) => Status::invalid_argument(error.to_string()),
            _ => Status::internal(error.to_string()),
        }
    }
}

pub struct Container {
    // Data that should be returned through ContainerStatus.
    metadata: ContainerMetadata,
    image: ImageSpec,
    created_at: i64,
    labels: HashMap<String, String>,
    annotations: HashMap<String, String>,
    mounts: Vec<Mount>,
    log_path: String,
    /// Unresolved YAML argument-data document, materialized at spawn time.
    argdata: String,

    /// Lifecycle fields, also written by the reaper task.
    inner: Mutex<ContainerInner>,
}

struct ContainerInner {
    state: ContainerState,
    /// Tells the reaper task to kill the child. Present iff RUNNING.
    kill: Option<oneshot::Sender<()>>,
    /// Nanoseconds since the epoch; valid in RUNNING and EXITED.
    started_at: Option<i64>,
    /// Nanoseconds since the epoch; valid in EXITED.
    finished_at: Option<i64>,
    /// Exit code or terminating signal number; valid in EXITED.
    exit_code: Option<i32>,
}

impl Container {
    pub fn new(config: ContainerConfig) -> Self {
        Self {
            metadata: config.metadata.unwrap_or_default(),
            image: config.image.unwrap_or_default(),
            created_at: now_nanos(),
            labels: config.labels,
            annotations: config.annotations,
            mounts: config.mounts,
            log_path: config.log_path,
            argdata: config.argdata,
            inner: Mutex::new(ContainerInner {
                state: ContainerState::ContainerCreated,
                kill: None,
                started_at: None,
                finished_at: None,
                exit_code: None,
            }),
        }
    }

    /// Launch the container. No-op unless the container is still CREATED,
    /// so repeated `StartContainer` calls are harmless.
    pub async fn start(
        self: Arc<Self>,
        pod_metadata: &PodSandboxMetadata,
        root_dir: &Path,
        image_dir: &Path,
        log_dir: &Path,
        switchboard: &dyn Switchboard,
        spawner: &dyn ProgramSpawner,
    ) -> Result<(), StartError> {
        let mut inner = self.inner.lock().await;
        if inner.state != ContainerState::ContainerCreated {
            return Ok(());
        }

        // Open the executable with execute intent.
        let executable =
            File::open(image_dir.join(&self.image.image)).map_err(|source| {
                StartError::Executable {
                    image: self.image.image.clone(),
                    source,
                }
            })?;

        // Open the log file and launch the framer. From here on, any
        // failure drops the write end, which lets the framer drain and
        // emit its stop line.
        let log_file =
            File::create(log_dir.join(&self.log_path)).map_err(|source| StartError::LogFile {
                path: self.log_path.clone(),
                source,
            })?;
        let log_writer = spawn_log_writer(log_file).map_err(|source| StartError::LogPipe { source })?;

        // Obtain a directory handle for every declared mount.
        let mut mounts = BTreeMap::new();
        for mount in &self.mounts {
            let host_path = mount.host_path.trim_start_matches('/');
            let handle = open_directory(&root_dir.join(host_path)).map_err(|source| {
                StartError::Mount {
                    path: mount.host_path.clone(),
                    source,
                }
            })?;
            mounts.insert(mount.container_path.clone(), handle);
        }

        // Materialize the argument data against the live descriptors. The
        // factories stay in scope until after the spawn call so every
        // descriptor the tree references remains open.
        let mut error_factory = YamlErrorFactory;
        let mut fd_factory = YamlFileDescriptorFactory::new(
            pod_metadata,
            &self.metadata,
            log_writer.as_raw_fd(),
            &mounts,
            switchboard,
            &mut error_factory,
        );
        let mut argdata_factory = YamlArgdataFactory::new(&mut fd_factory);
        let mut canonicalizing_factory = YamlCanonicalizingFactory::new(&mut argdata_factory);
        let argdata = YamlBuilder::new(&mut canonicalizing_factory).build(&self.argdata)?;

        // Fork and execute the child process.
        let child = spawner
            .spawn(&executable, &argdata)
            .map_err(|source| StartError::Spawn { source })?;

        inner.state = ContainerState::ContainerRunning;
        inner.started_at = Some(now_nanos());
        let (kill_tx, kill_rx) = oneshot::channel();
        inner.kill = Some(kill_tx);
        tokio::spawn(reap(Arc::downgrade(&self), child, kill_rx));
        Ok(())
    }

    /// Force-stop the container. The timeout is accepted for CRI
    /// compatibility but the stop is always immediate: the child is sent
    /// SIGKILL and the container is EXITED before this returns. No-op
    /// unless RUNNING.
    pub async fn stop(&self, _timeout: i64) {
        let mut inner = self.inner.lock().await;
        if inner.state != ContainerState::ContainerRunning {
            return;
        }
        if let Some(kill) = inner.kill.take() {
            let _ = kill.send(());
        }
        inner.state = ContainerState::ContainerExited;
        inner.finished_at = Some(now_nanos());
        inner.exit_code = Some(SIGKILL);
    }

    /// Snapshot for `ListContainers`. The composite id and sandbox id are
    /// attached by the caller.
    pub async fn get_info(&self) -> api::Container {
        let inner = self.inner.lock().await;
        api::Container {
            id: String::new(),
            pod_sandbox_id: String::new(),
            metadata: Some(self.metadata.clone()),
            image: Some(self.image.clone()),
            image_ref: self.image.image.clone(),
            state: inner.state as i32,
            created_at: self.created_at,
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
        }
    }

    /// Snapshot for `ContainerStatus`. Timestamps and the exit code are
    /// reported only for the states in which they are valid.
    pub async fn get_status(&self) -> api::ContainerStatus {
        let inner = self.inner.lock().await;
        let mut status = api::ContainerStatus {
            id: String::new(),
            metadata: Some(self.metadata.clone()),
            state: inner.state as i32,
            created_at: self.created_at,
            started_at: 0,
            finished_at: 0,
            exit_code: 0,
            image: Some(self.image.clone()),
            image_ref: self.image.image.clone(),
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
            mounts: self.mounts.clone(),
            log_path: self.log_path.clone(),
        };
        match inner.state {
            ContainerState::ContainerExited => {
                status.finished_at = inner.finished_at.unwrap_or_default();
                status.exit_code = inner.exit_code.unwrap_or_default();
                status.started_at = inner.started_at.unwrap_or_default();
            }
            ContainerState::ContainerRunning => {
                status.started_at = inner.started_at.unwrap_or_default();
            }
            ContainerState::ContainerCreated => {}
            ContainerState::ContainerUnknown => {
                unreachable!("Container cannot be in an unknown state")
            }
        }
        status
    }

    /// True iff the container passes a `ListContainers` filter: no state
    /// filter or a matching state, and every filter label present with the
    /// same value.
    pub async fn matches_filter(
        &self,
        state: Option<ContainerState>,
        labels: &HashMap<String, String>,
    ) -> bool {
        if let Some(state) = state {
            if state != self.inner.lock().await.state {
                return false;
            }
        }
        labels
            .iter()
            .all(|(key, value)| self.labels.get(key) == Some(value))
    }
}

/// Open a path that must be a directory.
fn open_directory(path: &Path) -> io::Result<File> {
    let handle = File::open(path)?;
    if !handle.metadata()?.is_dir() {
        return Err(io::Error::from(io::ErrorKind::NotADirectory));
    }
    Ok(handle)
}

/// Owns the child handle for the lifetime of the process: waits for it to
/// terminate (killing it first if asked to) and records the outcome, unless
/// a forced stop recorded one already.
async fn reap(
    container: Weak<Container>,
    mut child: Box<dyn ChildProcess>,
    kill: oneshot::Receiver<()>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            let _ = child.kill();
            child.wait().await
        }
    };

    let Some(container) = container.upgrade() else {
        return;
    };
    let mut inner = container.inner.lock().await;
    if inner.state != ContainerState::ContainerRunning {
        // A forced stop already recorded the outcome.
        return;
    }
    inner.state = ContainerState::ContainerExited;
    inner.kill = None;
    inner.finished_at = Some(now_nanos());
    inner.exit_code = Some(match status {
        Ok(status) => exit_code(&status),
        Err(error) => {
            let name = names::container_name(&container.metadata);
            log_warn!(container: &name, "Failed to collect child status: {error}");
            0
        }
    });
}

/// The child's exit code, or the number of the signal that terminated it.
fn exit_code(status: &ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| status.signal().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::spawn::testing::{exit_status, signal_status, ScriptedChild, ScriptedSpawner};
    use crate::switchboard::testing::RecordingSwitchboard;

    use super::*;

    const IMAGE: &str = "sha256:0000000000000000000000000000000000000000000000000000000000000000";

    struct Fixture {
        root: TempDir,
        images: TempDir,
        spawner: ScriptedSpawner,
        switchboard: RecordingSwitchboard,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let images = tempfile::tempdir().unwrap();
            std::fs::write(images.path().join(IMAGE), b"\x7fELF").unwrap();
            Self {
                root,
                images,
                spawner: ScriptedSpawner::default(),
                switchboard: RecordingSwitchboard::default(),
            }
        }

        async fn start(&self, container: &Arc<Container>) -> Result<(), StartError> {
            Arc::clone(container)
                .start(
                    &PodSandboxMetadata::default(),
                    self.root.path(),
                    self.images.path(),
                    self.root.path(),
                    &self.switchboard,
                    &self.spawner,
                )
                .await
        }
    }

    fn config(argdata: &str) -> ContainerConfig {
        ContainerConfig {
            metadata: Some(ContainerMetadata {
                name: String::from("c"),
                attempt: 0,
            }),
            image: Some(ImageSpec {
                image: String::from(IMAGE),
            }),
            log_path: String::from("c.log"),
            argdata: String::from(argdata),
            ..Default::default()
        }
    }

    async fn state_of(container: &Container) -> ContainerState {
        ContainerState::try_from(container.get_status().await.state).unwrap()
    }

    /// Let the reaper task observe a termination the test just scripted.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn start_transitions_to_running() {
        let fixture = Fixture::new();
        let container = Arc::new(Container::new(config("{}")));
        let (child, _exit) = ScriptedChild::new();
        fixture.spawner.push_child(Box::new(child));

        fixture.start(&container).await.unwrap();
        assert_eq!(state_of(&container).await, ContainerState::ContainerRunning);

        let status = container.get_status().await;
        assert!(status.created_at > 0);
        assert!(status.started_at >= status.created_at);
        assert_eq!(status.finished_at, 0);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let fixture = Fixture::new();
        let container = Arc::new(Container::new(config("{}")));
        let (child, _exit) = ScriptedChild::new();
        fixture.spawner.push_child(Box::new(child));

        fixture.start(&container).await.unwrap();
        // The second start must not spawn again.
        fixture.start(&container).await.unwrap();
        assert_eq!(fixture.spawner.spawned().len(), 1);
    }

    #[tokio::test]
    async fn missing_image_keeps_container_created() {
        let fixture = Fixture::new();
        let container = Arc::new(Container::new(ContainerConfig {
            image: Some(ImageSpec {
                image: String::from("sha256:missing"),
            }),
            ..config("{}")
        }));

        match fixture.start(&container).await {
            Err(StartError::Executable { image, .. }) => assert_eq!(image, "sha256:missing"),
            other => panic!("expected executable failure, got {other:?}"),
        }
        assert_eq!(state_of(&container).await, ContainerState::ContainerCreated);
    }

    #[tokio::test]
    async fn spawn_failure_keeps_container_created() {
        let fixture = Fixture::new();
        let container = Arc::new(Container::new(config("{}")));
        // No scripted child: the spawner refuses.

        assert!(matches!(
            fixture.start(&container).await,
            Err(StartError::Spawn { .. })
        ));
        assert_eq!(state_of(&container).await, ContainerState::ContainerCreated);

        // The failed attempt left the container startable.
        let (child, _exit) = ScriptedChild::new();
        fixture.spawner.push_child(Box::new(child));
        fixture.start(&container).await.unwrap();
        assert_eq!(state_of(&container).await, ContainerState::ContainerRunning);
    }

    #[tokio::test]
    async fn unresolvable_argdata_is_invalid_argument() {
        let fixture = Fixture::new();
        let container = Arc::new(Container::new(config(
            "!<tag:nuxi.nl,2015:cloudabi/kubernetes/mount> \"/bogus\"",
        )));

        let error = fixture.start(&container).await.unwrap_err();
        assert!(matches!(error, StartError::Resolve(_)));
        assert_eq!(
            Status::from(error).code(),
            tonic::Code::InvalidArgument
        );
        assert_eq!(fixture.spawner.spawned().len(), 0);
    }

    #[tokio::test]
    async fn mounts_resolve_into_the_argument_tree() {
        let fixture = Fixture::new();
        std::fs::create_dir(fixture.root.path().join("data")).unwrap();
        let container = Arc::new(Container::new(ContainerConfig {
            mounts: vec![Mount {
                container_path: String::from("/data"),
                host_path: String::from("/data"),
                readonly: false,
            }],
            ..config("volume: !<tag:nuxi.nl,2015:cloudabi/kubernetes/mount> \"/data\"")
        }));
        let (child, _exit) = ScriptedChild::new();
        fixture.spawner.push_child(Box::new(child));

        fixture.start(&container).await.unwrap();
        let spawned = fixture.spawner.spawned();
        assert_eq!(spawned.len(), 1);
        // One descriptor in the tree: the mount handle.
        assert_eq!(spawned[0].file_descriptors().len(), 1);
    }

    #[tokio::test]
    async fn missing_mount_directory_aborts_start() {
        let fixture = Fixture::new();
        let container = Arc::new(Container::new(ContainerConfig {
            mounts: vec![Mount {
                container_path: String::from("/data"),
                host_path: String::from("/no/such/path"),
                readonly: false,
            }],
            ..config("{}")
        }));

        match fixture.start(&container).await {
            Err(StartError::Mount { path, .. }) => assert_eq!(path, "/no/such/path"),
            other => panic!("expected mount failure, got {other:?}"),
        }
        assert_eq!(state_of(&container).await, ContainerState::ContainerCreated);
    }

    #[tokio::test]
    async fn stop_records_sigkill() {
        let fixture = Fixture::new();
        let container = Arc::new(Container::new(config("{}")));
        let (child, _exit) = ScriptedChild::new();
        fixture.spawner.push_child(Box::new(child));

        fixture.start(&container).await.unwrap();
        container.stop(10).await;

        let status = container.get_status().await;
        assert_eq!(status.state, ContainerState::ContainerExited as i32);
        assert_eq!(status.exit_code, SIGKILL);
        assert!(status.finished_at > 0);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_stop_before_start_is_a_noop() {
        let fixture = Fixture::new();
        let container = Arc::new(Container::new(config("{}")));

        // Stopping a CREATED container changes nothing.
        container.stop(0).await;
        assert_eq!(state_of(&container).await, ContainerState::ContainerCreated);

        let (child, _exit) = ScriptedChild::new();
        fixture.spawner.push_child(Box::new(child));
        fixture.start(&container).await.unwrap();
        container.stop(0).await;
        let first = container.get_status().await;
        container.stop(0).await;
        let second = container.get_status().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn child_exit_transitions_to_exited() {
        let fixture = Fixture::new();
        let container = Arc::new(Container::new(config("{}")));
        let (child, exit) = ScriptedChild::new();
        fixture.spawner.push_child(Box::new(child));

        fixture.start(&container).await.unwrap();
        exit.send(exit_status(3)).unwrap();
        settle().await;

        let status = container.get_status().await;
        assert_eq!(status.state, ContainerState::ContainerExited as i32);
        assert_eq!(status.exit_code, 3);
    }

    #[tokio::test]
    async fn signal_termination_reports_the_signal_number() {
        let fixture = Fixture::new();
        let container = Arc::new(Container::new(config("{}")));
        let (child, exit) = ScriptedChild::new();
        fixture.spawner.push_child(Box::new(child));

        fixture.start(&container).await.unwrap();
        exit.send(signal_status(15)).unwrap();
        settle().await;

        assert_eq!(container.get_status().await.exit_code, 15);
    }

    #[tokio::test]
    async fn matches_filter_is_a_label_subset_test() {
        let mut labels = HashMap::new();
        labels.insert(String::from("app"), String::from("db"));
        labels.insert(String::from("tier"), String::from("backend"));
        let container = Container::new(ContainerConfig {
            labels,
            ..config("{}")
        });

        let mut filter = HashMap::new();
        assert!(container.matches_filter(None, &filter).await);
        filter.insert(String::from("app"), String::from("db"));
        assert!(container.matches_filter(None, &filter).await);
        filter.insert(String::from("tier"), String::from("frontend"));
        assert!(!container.matches_filter(None, &filter).await);

        assert!(
            container
                .matches_filter(Some(ContainerState::ContainerCreated), &HashMap::new())
                .await
        );
        assert!(
            !container
                .matches_filter(Some(ContainerState::ContainerRunning), &HashMap::new())
                .await
        );
    }
}
