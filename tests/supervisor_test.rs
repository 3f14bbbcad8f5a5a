// Process supervisor integration tests: discovery failure, the bounded
// health-check loop, and idempotent shutdown. Unix-only where a fake
// backend executable is spawned.

use std::time::{Duration, Instant};

use torrdown_core::backend::supervisor::{BackendState, ProcessSupervisor, StartupError};
use torrdown_core::config::{SupervisorConfig, BACKEND_EXEC_NAME, BACKEND_RESOURCE_DIR};

/// Start a fake `/health` endpoint on an ephemeral port.
async fn spawn_health_server() -> u16 {
    use axum::{routing::get, Router};
    let app = Router::new().route("/health", get(|| async { "ok" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    port
}

/// Lay down a resources directory containing a fake backend executable
/// that just sleeps.
#[cfg(unix)]
fn fake_bundled_backend(dir: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    let bundle = dir.join(BACKEND_RESOURCE_DIR);
    std::fs::create_dir_all(&bundle).unwrap();
    let exec = bundle.join(BACKEND_EXEC_NAME);
    std::fs::write(&exec, "#!/bin/sh\nsleep 30\n").unwrap();
    std::fs::set_permissions(&exec, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn config(port: u16, resource_dir: std::path::PathBuf) -> SupervisorConfig {
    SupervisorConfig {
        port,
        health_attempts: 3,
        health_interval: Duration::from_millis(50),
        health_timeout: Duration::from_millis(200),
        resource_dir: Some(resource_dir),
        dev_backend_dir: None,
    }
}

#[tokio::test]
async fn missing_executable_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let supervisor = ProcessSupervisor::new(config(8000, tmp.path().to_path_buf()));

    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err, StartupError::NotFound));
    assert_eq!(supervisor.state(), BackendState::FailedToStart);
}

#[cfg(unix)]
#[tokio::test]
async fn becomes_healthy_once_health_answers() {
    let tmp = tempfile::tempdir().unwrap();
    fake_bundled_backend(tmp.path());
    let port = spawn_health_server().await;

    let supervisor = ProcessSupervisor::new(config(port, tmp.path().to_path_buf()));
    supervisor.start().await.unwrap();
    assert_eq!(supervisor.state(), BackendState::Healthy);
    assert!(supervisor.is_healthy());

    supervisor.stop();
    // Stop is idempotent and safe with nothing running.
    supervisor.stop();

    // The exit watcher observes the terminated child.
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if matches!(supervisor.state(), BackendState::Exited(_)) {
            break;
        }
        assert!(Instant::now() < deadline, "backend never reported exited");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[cfg(unix)]
#[tokio::test]
async fn health_poll_is_bounded() {
    let tmp = tempfile::tempdir().unwrap();
    fake_bundled_backend(tmp.path());

    // Nothing listens on this port; every attempt fails.
    let cfg = config(1, tmp.path().to_path_buf());
    let budget = cfg.health_attempts;
    let supervisor = ProcessSupervisor::new(cfg);

    let started = Instant::now();
    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err, StartupError::Timeout));
    // Bounded: attempts x (timeout + interval), with generous slack.
    assert!(started.elapsed() < Duration::from_secs(budget as u64 * 2));
    assert_eq!(supervisor.state(), BackendState::FailedToStart);
}

#[tokio::test]
async fn stop_without_start_is_noop() {
    let tmp = tempfile::tempdir().unwrap();
    let supervisor = ProcessSupervisor::new(config(8000, tmp.path().to_path_buf()));
    supervisor.stop();
    assert_eq!(supervisor.state(), BackendState::NotStarted);
}
