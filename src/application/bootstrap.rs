use crate::infrastructure::config::{ensure_default_configs, load_app_config};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::mirror_store::SqliteMirrorStore;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const APP_DIR_NAME: &str = "marvin-timesync";

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub database_path: PathBuf,
}

/// `<data dir>/marvin-timesync`, or the current directory when the platform
/// has no data dir.
pub fn default_workspace_root() -> Result<PathBuf, InfraError> {
    match dirs::data_dir() {
        Some(data_dir) => Ok(data_dir.join(APP_DIR_NAME)),
        None => {
            warn!("no user data directory found, using the current directory");
            Ok(std::env::current_dir()?)
        }
    }
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let database_path = state_dir.join("mirror.sqlite");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;

    ensure_default_configs(&config_dir)?;
    let _ = load_app_config(&config_dir)?;
    SqliteMirrorStore::open(&database_path)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        database_path,
    })
}
