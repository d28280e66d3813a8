use std::{
    process::Stdio,
    sync::{Arc, Weak},
    time::Duration,
};

use launchpad_process::{ExitSummary, ServerConfig, ServerState, ServerStatus, unix_ms_now};
use tokio::{
    io::AsyncWriteExt,
    process::{Child, ChildStdin},
    sync::{Mutex, oneshot, watch},
    task::JoinHandle,
};

use crate::materialize::{self, MaterializeError};
use crate::output::{self, LogSink, LogTail};
use crate::provision::{ProvisionError, Provisioner};
use crate::settings::AgentSettings;

// How long to wait for the process to disappear after SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(10);
const DRAIN_GRACE: Duration = Duration::from_secs(5);
// How long a failed stop-command write waits for an exit already under way.
const EXIT_RACE_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Server is already running")]
    AlreadyRunning,
    #[error("Server is not running")]
    NotRunning,
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    #[error("failed to spawn server process `{cmd}`: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to send stop command ({0}); server was terminated")]
    GracefulStopFailed(#[source] std::io::Error),
    #[error("stop task failed: {0}")]
    StopTask(#[source] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The server exited on its own after the stop command.
    Graceful,
    /// The server was killed after the stop timeout.
    Terminated,
}

#[cfg(target_os = "linux")]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    // If the launcher dies, take the game server down with it.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn kill_process_group(pgid: Option<i32>) {
    if let Some(pgid) = pgid {
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: Option<i32>) {}

/// The live game server. Exists only while the process does.
struct ServerHandle {
    run_id: u64,
    pid: Option<u32>,
    config: ServerConfig,
    started_at_unix_ms: u64,
    stdin: Option<ChildStdin>,
    exited: watch::Receiver<Option<ExitSummary>>,
    // Dropping the sender also kills the process.
    kill_tx: Option<oneshot::Sender<()>>,
    drain: JoinHandle<()>,
}

impl ServerHandle {
    async fn wait_exit(&mut self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.exited.wait_for(Option::is_some)).await,
            Ok(_)
        )
    }

    async fn terminate(&mut self) -> bool {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
        self.wait_exit(KILL_GRACE).await
    }

    fn exit_summary(&self) -> Option<ExitSummary> {
        self.exited.borrow().clone()
    }

    async fn finish_drain(mut self) {
        if tokio::time::timeout(DRAIN_GRACE, &mut self.drain)
            .await
            .is_err()
        {
            tracing::debug!(run_id = self.run_id, "output drain still busy; aborting it");
            self.drain.abort();
        }
    }
}

#[derive(Default)]
struct ControllerState {
    handle: Option<ServerHandle>,
    next_run_id: u64,
    last_exit: Option<ExitSummary>,
}

struct Inner {
    settings: AgentSettings,
    provisioner: Provisioner,
    state: Mutex<ControllerState>,
    status_tx: watch::Sender<ServerStatus>,
    logs: LogSink,
}

/// Owns the game server process.
///
/// `start` and `stop` run under one mutex, so two callers can never both
/// observe `Stopped` and spawn. `status` reads a snapshot published on every
/// transition and never waits for a running `start` or `stop`.
#[derive(Clone)]
pub struct ServerController {
    inner: Arc<Inner>,
}

impl ServerController {
    pub fn new(settings: AgentSettings) -> Result<Self, ControllerError> {
        let provisioner = Provisioner::new()?;
        let logs = LogSink::new(settings.log_max_lines);
        let (status_tx, _) = watch::channel(ServerStatus::stopped(None));
        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                provisioner,
                state: Mutex::new(ControllerState::default()),
                status_tx,
                logs,
            }),
        })
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.inner.settings
    }

    pub fn status(&self) -> ServerStatus {
        self.inner.status_tx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    pub async fn tail_logs(&self, cursor: u64, limit: usize) -> LogTail {
        self.inner.logs.tail(cursor, limit).await
    }

    /// Provisions the jar, writes the config files and spawns the server.
    ///
    /// Any failure leaves the controller stopped. Files already written stay.
    pub async fn start(&self, config: ServerConfig) -> Result<ServerStatus, ControllerError> {
        let mut state = self.inner.state.lock().await;
        if state.handle.is_some() {
            return Err(ControllerError::AlreadyRunning);
        }

        let settings = &self.inner.settings;
        let layout = &settings.layout;

        self.inner
            .provisioner
            .ensure(&layout.jar_path(), &settings.jar_url)
            .await?;
        materialize::materialize(
            &config,
            layout,
            &settings.bootstrap,
            settings.bootstrap_timeout,
        )
        .await?;

        state.next_run_id = state.next_run_id.saturating_add(1);
        let run_id = state.next_run_id;
        let handle = self.spawn_server(run_id, config).await?;

        tracing::info!(run_id, pid = ?handle.pid, port = handle.config.port, "server started");
        state.handle = Some(handle);
        self.publish(&state);
        Ok(self.status())
    }

    async fn spawn_server(
        &self,
        run_id: u64,
        config: ServerConfig,
    ) -> Result<ServerHandle, ControllerError> {
        let spec = &self.inner.settings.launch;
        let cwd = self.inner.settings.layout.dir();

        let mut cmd = spec.command(cwd);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            unsafe {
                cmd.pre_exec(|| {
                    // New session: the server's whole process tree shares one pgid.
                    set_parent_death_signal()?;
                    if libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        self.inner
            .logs
            .note(format!("exec: {} (cwd {})", spec.display(), cwd.display()))
            .await;

        let mut child = cmd.spawn().map_err(|source| ControllerError::Spawn {
            cmd: spec.display(),
            source,
        })?;
        let pid = child.id();
        let pgid = pid.map(|p| p as i32);
        let stdin = child.stdin.take();

        let drain = match (child.stdout.take(), child.stderr.take()) {
            (Some(out), Some(err)) => {
                tokio::spawn(output::drain_output(out, err, self.inner.logs.clone()))
            }
            _ => tokio::spawn(async {}),
        };

        let (exit_tx, exited) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(watch_exit(
            child,
            pgid,
            kill_rx,
            exit_tx,
            run_id,
            Arc::downgrade(&self.inner),
        ));

        Ok(ServerHandle {
            run_id,
            pid,
            config,
            started_at_unix_ms: unix_ms_now(),
            stdin,
            exited,
            kill_tx: Some(kill_tx),
            drain,
        })
    }

    /// Sends the stop command and waits; kills the server if it does not exit in time.
    ///
    /// Always ends stopped, even when an error is returned. The sequence runs on its
    /// own task, so dropping the returned future does not interrupt it.
    pub async fn stop(&self) -> Result<StopOutcome, ControllerError> {
        let this = self.clone();
        tokio::spawn(async move { this.stop_locked().await })
            .await
            .map_err(ControllerError::StopTask)?
    }

    async fn stop_locked(&self) -> Result<StopOutcome, ControllerError> {
        let mut state = self.inner.state.lock().await;
        let Some(mut handle) = state.handle.take() else {
            return Err(ControllerError::NotRunning);
        };

        let result = self.stop_sequence(&mut handle).await;

        state.last_exit = Some(handle.exit_summary().unwrap_or_else(|| ExitSummary {
            exit_code: None,
            message: "stopped".to_string(),
            at_unix_ms: unix_ms_now(),
        }));
        handle.finish_drain().await;
        self.publish(&state);
        drop(state);

        self.inner.logs.note("server stopped").await;
        result.map_err(ControllerError::GracefulStopFailed)
    }

    // Everything between taking the handle and clearing it. The process is gone
    // when this returns, unless SIGKILL itself did not take.
    async fn stop_sequence(&self, handle: &mut ServerHandle) -> std::io::Result<StopOutcome> {
        let timeout = self.inner.settings.stop_timeout;
        let logs = &self.inner.logs;
        logs.note(format!(
            "stop requested (timeout_ms={})",
            timeout.as_millis()
        ))
        .await;

        if handle.exit_summary().is_some() {
            logs.note("stop: server had already exited").await;
            return Ok(StopOutcome::Graceful);
        }

        let result = match self.send_stop_command(handle).await {
            Ok(()) => {
                logs.note("stop: sent stop command").await;
                if handle.wait_exit(timeout).await {
                    return Ok(StopOutcome::Graceful);
                }
                logs.note("stop: no exit before timeout; killing").await;
                Ok(StopOutcome::Terminated)
            }
            Err(e) => {
                // A closed pipe usually means the process is on its way out.
                if handle.wait_exit(EXIT_RACE_GRACE).await {
                    logs.note("stop: server had already exited").await;
                    return Ok(StopOutcome::Graceful);
                }
                logs.note(format!("stop: could not send stop command ({e}); killing"))
                    .await;
                Err(e)
            }
        };

        if !handle.terminate().await {
            tracing::error!(
                run_id = handle.run_id,
                pid = ?handle.pid,
                "server did not exit after SIGKILL"
            );
        }
        result
    }

    async fn send_stop_command(&self, handle: &mut ServerHandle) -> std::io::Result<()> {
        let Some(mut stdin) = handle.stdin.take() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "stdin is closed",
            ));
        };
        let mut line = self.inner.settings.stop_command.clone();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        // stdin is dropped here, so the server also sees EOF.
        Ok(())
    }

    /// Stops the server if it is running. Used on launcher shutdown.
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        match self.stop().await {
            Ok(_) | Err(ControllerError::NotRunning) => Ok(()),
            Err(e) => Err(e),
        }
    }

    // Called by the exit watcher. A stop in progress holds the lock and has
    // already taken the handle, so only unrequested exits get past the run_id check.
    async fn reap(&self, run_id: u64, summary: ExitSummary) {
        let mut state = self.inner.state.lock().await;
        if !state.handle.as_ref().is_some_and(|h| h.run_id == run_id) {
            return;
        }
        let Some(handle) = state.handle.take() else {
            return;
        };

        tracing::warn!(
            run_id,
            exit_code = ?summary.exit_code,
            "server exited without a stop request"
        );
        self.inner
            .logs
            .note(format!("server exited unexpectedly ({})", summary.message))
            .await;
        state.last_exit = Some(summary);
        handle.finish_drain().await;
        self.publish(&state);
    }

    fn publish(&self, state: &ControllerState) {
        let status = match &state.handle {
            Some(h) => ServerStatus {
                state: ServerState::Running,
                pid: h.pid,
                port: Some(h.config.port),
                config: Some(h.config.clone()),
                started_at_unix_ms: Some(h.started_at_unix_ms),
                last_exit: state.last_exit.clone(),
            },
            None => ServerStatus::stopped(state.last_exit.clone()),
        };
        self.inner.status_tx.send_replace(status);
    }
}

async fn watch_exit(
    mut child: Child,
    pgid: Option<i32>,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitSummary>>,
    run_id: u64,
    controller: Weak<Inner>,
) {
    let waited = tokio::select! {
        res = child.wait() => Some(res),
        _ = kill_rx => None,
    };
    let (res, killed) = match waited {
        Some(res) => {
            // Helpers left in the server's session still hold its pipes.
            kill_process_group(pgid);
            (res, false)
        }
        None => {
            kill_process_group(pgid);
            let _ = child.start_kill();
            (child.wait().await, true)
        }
    };

    let exit_code = res.as_ref().ok().and_then(|s| s.code());
    let message = match (&res, killed) {
        (Err(e), _) => format!("wait failed: {e}"),
        (Ok(_), true) => "killed after timeout".to_string(),
        (Ok(status), false) => match status.code() {
            Some(0) => "exited".to_string(),
            Some(code) => format!("exited with code {code}"),
            None => "terminated by signal".to_string(),
        },
    };
    let summary = ExitSummary {
        exit_code,
        message,
        at_unix_ms: unix_ms_now(),
    };

    let _ = exit_tx.send(Some(summary.clone()));
    if let Some(inner) = controller.upgrade() {
        ServerController { inner }.reap(run_id, summary).await;
    }
}
