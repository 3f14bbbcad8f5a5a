use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Host the backend binds to. Loopback only; nothing here is remote.
pub const BACKEND_HOST: &str = "127.0.0.1";

/// Port the backend listens on in both bundled and dev launches.
pub const BACKEND_PORT: u16 = 8000;

/// Timeout for a single health-check request.
pub const HEALTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Delay between health-check attempts.
pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Maximum number of health-check attempts before startup is declared failed.
pub const HEALTH_POLL_MAX_ATTEMPTS: u32 = 30;

/// Delay after loading persisted sessions before passive reattach begins,
/// so the UI can settle first.
pub const RECONNECT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// File name of the durable session snapshot inside the data directory.
pub const SNAPSHOT_FILE_NAME: &str = "sessions.json";

/// Name of the bundled backend executable.
#[cfg(windows)]
pub const BACKEND_EXEC_NAME: &str = "torrent_server.exe";
#[cfg(not(windows))]
pub const BACKEND_EXEC_NAME: &str = "torrent_server";

/// Directory (relative to the packaged resources dir) holding the bundled backend.
pub const BACKEND_RESOURCE_DIR: &str = "python-backend";

/// Base URL of the backend control API.
pub fn backend_base_url(port: u16) -> String {
    format!("http://{}:{}", BACKEND_HOST, port)
}

/// Tunables for the process supervisor. Defaults are the fixed production
/// policy; tests shrink the poll budget.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Port the backend is expected on.
    pub port: u16,
    /// Health-check attempt budget.
    pub health_attempts: u32,
    /// Delay between health-check attempts.
    pub health_interval: Duration,
    /// Per-request health-check timeout.
    pub health_timeout: Duration,
    /// Directory searched for the bundled executable. `None` means the
    /// platform resources directory next to the running executable.
    pub resource_dir: Option<PathBuf>,
    /// Directory of the backend sources for the dev launcher.
    pub dev_backend_dir: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            port: BACKEND_PORT,
            health_attempts: HEALTH_POLL_MAX_ATTEMPTS,
            health_interval: HEALTH_POLL_INTERVAL,
            health_timeout: HEALTH_REQUEST_TIMEOUT,
            resource_dir: None,
            dev_backend_dir: None,
        }
    }
}

/// Top-level configuration for the shell core.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    /// Backend port.
    pub port: u16,
    /// Directory holding the session snapshot. Empty means the platform
    /// data directory.
    pub data_dir: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            port: BACKEND_PORT,
            data_dir: String::new(),
        }
    }
}

impl ShellConfig {
    /// Resolve the snapshot path from the configured data directory.
    pub fn snapshot_path(&self) -> PathBuf {
        let dir = if self.data_dir.is_empty() {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("torrdown")
        } else {
            PathBuf::from(&self.data_dir)
        };
        dir.join(SNAPSHOT_FILE_NAME)
    }
}
