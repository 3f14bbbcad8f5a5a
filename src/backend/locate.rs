use std::env;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{BACKEND_EXEC_NAME, BACKEND_HOST, BACKEND_RESOURCE_DIR};

/// How the backend process should be launched.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendLaunch {
    /// Bundled executable shipped beside the packaged application.
    Bundled { exec: PathBuf },
    /// Development mode: run the backend module with the venv python.
    DevServer {
        python: PathBuf,
        backend_dir: PathBuf,
        port: u16,
    },
}

impl BackendLaunch {
    /// Program and arguments for spawning.
    pub fn command_line(&self) -> (PathBuf, Vec<String>) {
        match self {
            BackendLaunch::Bundled { exec } => (exec.clone(), Vec::new()),
            BackendLaunch::DevServer { python, port, .. } => (
                python.clone(),
                vec![
                    "-m".into(),
                    "uvicorn".into(),
                    "main:app".into(),
                    "--host".into(),
                    BACKEND_HOST.into(),
                    "--port".into(),
                    port.to_string(),
                ],
            ),
        }
    }

    /// Working directory for the spawned process, if one is required.
    pub fn working_dir(&self) -> Option<&Path> {
        match self {
            BackendLaunch::Bundled { .. } => None,
            BackendLaunch::DevServer { backend_dir, .. } => Some(backend_dir),
        }
    }
}

/// Resolve how to launch the backend. Search order is fixed: the bundled
/// executable wins; the dev launcher is the fallback. `None` means neither
/// exists and startup must fail.
pub fn locate_backend(
    resource_dir: Option<&Path>,
    dev_backend_dir: Option<&Path>,
    port: u16,
) -> Option<BackendLaunch> {
    let resources = resource_dir
        .map(Path::to_path_buf)
        .or_else(default_resource_dir);

    if let Some(resources) = resources {
        let exec = resources.join(BACKEND_RESOURCE_DIR).join(BACKEND_EXEC_NAME);
        debug!("checking for bundled backend at {}", exec.display());
        if exec.is_file() {
            info!("using bundled backend: {}", exec.display());
            return Some(BackendLaunch::Bundled { exec });
        }
    }

    let backend_dir = dev_backend_dir.map(Path::to_path_buf)?;
    let python = venv_python(&backend_dir);
    if python.is_file() {
        info!("using development backend in {}", backend_dir.display());
        return Some(BackendLaunch::DevServer {
            python,
            backend_dir,
            port,
        });
    }

    None
}

/// The resources directory of the packaged application: next to the
/// running executable.
fn default_resource_dir() -> Option<PathBuf> {
    let exe = env::current_exe().ok()?;
    exe.parent().map(|p| p.join("resources"))
}

fn venv_python(backend_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        backend_dir.join("venv").join("Scripts").join("python.exe")
    } else {
        backend_dir.join("venv").join("bin").join("python")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_wins_over_dev() {
        let tmp = tempfile::tempdir().unwrap();
        let bundled_dir = tmp.path().join(BACKEND_RESOURCE_DIR);
        std::fs::create_dir_all(&bundled_dir).unwrap();
        let exec = bundled_dir.join(BACKEND_EXEC_NAME);
        std::fs::write(&exec, b"").unwrap();

        let backend_dir = tmp.path().join("backend");
        let venv = venv_python(&backend_dir);
        std::fs::create_dir_all(venv.parent().unwrap()).unwrap();
        std::fs::write(&venv, b"").unwrap();

        let launch = locate_backend(Some(tmp.path()), Some(&backend_dir), 8000).unwrap();
        assert_eq!(launch, BackendLaunch::Bundled { exec });
    }

    #[test]
    fn dev_launcher_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        let backend_dir = tmp.path().join("backend");
        let venv = venv_python(&backend_dir);
        std::fs::create_dir_all(venv.parent().unwrap()).unwrap();
        std::fs::write(&venv, b"").unwrap();

        let launch = locate_backend(Some(tmp.path()), Some(&backend_dir), 9000).unwrap();
        match &launch {
            BackendLaunch::DevServer { port, .. } => assert_eq!(*port, 9000),
            other => panic!("expected dev launcher, got {:?}", other),
        }

        let (program, args) = launch.command_line();
        assert!(program.ends_with(venv_python(Path::new("backend")).file_name().unwrap()));
        assert!(args.contains(&"uvicorn".to_string()));
        assert!(args.contains(&"9000".to_string()));
    }

    #[test]
    fn nothing_found() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(locate_backend(Some(tmp.path()), Some(&tmp.path().join("nope")), 8000).is_none());
    }
}
