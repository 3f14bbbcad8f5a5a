// Backend process supervisor — spawn, log forwarding, health polling, shutdown.

use std::process::Stdio;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{error, info, warn};

use super::locate::locate_backend;
use crate::config::{backend_base_url, SupervisorConfig};

/// Lifecycle state of the supervised backend process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    NotStarted,
    Starting,
    Healthy,
    /// Process exited after a healthy start; carries the exit code if known.
    Exited(Option<i32>),
    FailedToStart,
}

/// Startup-fatal failures. None of these are retried; the host must not
/// open any session-bearing surface after one.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("backend executable not found")]
    NotFound,
    #[error("failed to spawn backend: {0}")]
    SpawnFailed(#[source] std::io::Error),
    #[error("backend did not become healthy within the poll budget")]
    Timeout,
}

/// Owns the one backend process of the application. Created by the shell at
/// bootstrap and passed down explicitly; there is no global handle.
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    state: Arc<Mutex<BackendState>>,
    pid: Arc<Mutex<Option<u32>>>,
    http: reqwest::Client,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(BackendState::NotStarted)),
            pid: Arc::new(Mutex::new(None)),
            http: reqwest::Client::new(),
        }
    }

    pub fn state(&self) -> BackendState {
        *self.state.lock()
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == BackendState::Healthy
    }

    /// Locate, spawn and health-poll the backend. Resolves once the backend
    /// answers `/health`, or with a startup error after the fixed poll budget.
    pub async fn start(&self) -> Result<(), StartupError> {
        let launch = locate_backend(
            self.config.resource_dir.as_deref(),
            self.config.dev_backend_dir.as_deref(),
            self.config.port,
        )
        .ok_or_else(|| {
            *self.state.lock() = BackendState::FailedToStart;
            StartupError::NotFound
        })?;

        *self.state.lock() = BackendState::Starting;

        let (program, args) = launch.command_line();
        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = launch.working_dir() {
            cmd.current_dir(dir);
        }

        info!("spawning backend: {}", program.display());
        let mut child = cmd.spawn().map_err(|e| {
            *self.state.lock() = BackendState::FailedToStart;
            StartupError::SpawnFailed(e)
        })?;

        *self.pid.lock() = child.id();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "backend", "{}", line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "backend", "{}", line);
                }
            });
        }

        // The watcher owns the child from here on; termination is signalled
        // by pid, matching how the desktop host stops the backend.
        let state = self.state.clone();
        let pid = self.pid.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            let code = status.ok().and_then(|s| s.code());
            let mut st = state.lock();
            *st = match *st {
                BackendState::Healthy => BackendState::Exited(code),
                BackendState::Starting => BackendState::FailedToStart,
                other => other,
            };
            *pid.lock() = None;
            error!("backend process exited with code {:?}", code);
        });

        self.wait_for_health().await
    }

    /// Poll `/health` once per interval until it answers or the attempt
    /// budget is spent. The loop is bounded; there is no retry beyond it.
    async fn wait_for_health(&self) -> Result<(), StartupError> {
        let url = format!("{}/health", backend_base_url(self.config.port));
        for attempt in 1..=self.config.health_attempts {
            let resp = self
                .http
                .get(&url)
                .timeout(self.config.health_timeout)
                .send()
                .await;
            match resp {
                Ok(r) if r.status().is_success() => {
                    info!("backend healthy after {} attempt(s)", attempt);
                    *self.state.lock() = BackendState::Healthy;
                    return Ok(());
                }
                _ => tokio::time::sleep(self.config.health_interval).await,
            }
        }
        warn!(
            "backend not healthy after {} attempts, giving up",
            self.config.health_attempts
        );
        *self.state.lock() = BackendState::FailedToStart;
        self.stop();
        Err(StartupError::Timeout)
    }

    /// Terminate the backend. Idempotent; a no-op when nothing is running.
    /// Unix gets a graceful SIGTERM, windows a tree-kill (the bundled
    /// backend spawns helper processes that must die with it).
    pub fn stop(&self) {
        let Some(pid) = self.pid.lock().take() else {
            return;
        };
        info!("stopping backend (pid {})", pid);
        terminate(pid);
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(unix)]
fn terminate(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    if let Ok(pid) = i32::try_from(pid) {
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            warn!("SIGTERM to backend failed: {}", e);
        }
    }
}

#[cfg(windows)]
fn terminate(pid: u32) {
    let result = std::process::Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/f", "/t"])
        .status();
    if let Err(e) = result {
        warn!("taskkill for backend failed: {}", e);
    }
}
