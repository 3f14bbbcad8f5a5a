// Application bootstrap — tracing, backend startup, session restore.

use std::sync::Arc;
use std::sync::Once;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::backend::client::HttpBackend;
use crate::backend::supervisor::{ProcessSupervisor, StartupError};
use crate::config::{ShellConfig, SupervisorConfig};
use crate::session::manager::SessionManager;
use crate::session::registry::SessionRegistry;
use crate::session::store::SnapshotStore;

static INIT_TRACING: Once = Once::new();

/// Initialize tracing once for the process.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn,tungstenite=warn"));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();

        info!("torrdown core tracing initialized");
    });
}

/// The running core: one supervised backend process plus the session
/// manager. Owned by the application root; the UI layer reaches the
/// manager through it.
pub struct Shell {
    supervisor: Arc<ProcessSupervisor>,
    manager: SessionManager,
}

impl Shell {
    /// Boot the core with the default supervision policy. The backend must
    /// reach healthy before any session surface exists; a startup error
    /// here aborts application bootstrap.
    pub async fn launch(config: ShellConfig) -> Result<Self, StartupError> {
        let supervisor_config = SupervisorConfig {
            port: config.port,
            ..SupervisorConfig::default()
        };
        Self::launch_with(config, supervisor_config).await
    }

    /// Boot with an explicit supervisor configuration (dev launcher paths,
    /// shrunk poll budgets).
    pub async fn launch_with(
        config: ShellConfig,
        supervisor_config: SupervisorConfig,
    ) -> Result<Self, StartupError> {
        init_tracing();

        let supervisor = Arc::new(ProcessSupervisor::new(supervisor_config));
        supervisor.start().await?;

        let store = SnapshotStore::new(config.snapshot_path());
        let mut registry = SessionRegistry::new(store);
        if let Err(e) = registry.load() {
            // A broken snapshot should not take the application down.
            tracing::warn!("failed to load session snapshot: {:#}", e);
        }

        let backend = Arc::new(HttpBackend::new(config.port));
        let manager = SessionManager::new(backend, registry, config.port);

        // Passive reattach for everything that was active before the restart.
        let restore_manager = manager.clone();
        tokio::spawn(async move { restore_manager.restore().await });

        Ok(Self {
            supervisor,
            manager,
        })
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Stop the backend process. Idempotent.
    pub fn shutdown(&self) {
        self.supervisor.stop();
    }
}
