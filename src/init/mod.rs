//! `dealflow init`: create the `.dealflow/` directory in a project.
//!
//! ```text
//! .dealflow/
//! ├── dealflow.toml    # Configuration (all fields optional)
//! └── data/            # JSON snapshots: deal-store, audit-store, activity-store
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{CONFIG_FILE, DEALFLOW_DIR, DealflowToml, StorageBackendKind};

/// Result of initializing a dealflow project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the .dealflow directory
    pub dealflow_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
    /// Whether a config file was written by this call
    pub wrote_config: bool,
}

/// Options recorded in a freshly written config file.
#[derive(Debug, Default)]
pub struct InitOptions<'a> {
    pub backend: Option<StorageBackendKind>,
    pub user: Option<&'a str>,
}

/// Initialize a dealflow project in the given directory.
///
/// Running it again completes a partial structure and never overwrites an
/// existing config file.
pub fn init_project(project_dir: &Path, options: InitOptions<'_>) -> Result<InitResult> {
    let dealflow_dir = project_dir.join(DEALFLOW_DIR);
    let created = !dealflow_dir.exists();

    std::fs::create_dir_all(&dealflow_dir)
        .with_context(|| format!("Failed to create directory: {}", dealflow_dir.display()))?;

    let data_dir = dealflow_dir.join("data");
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

    let config_file = dealflow_dir.join(CONFIG_FILE);
    let wrote_config = if config_file.exists() {
        false
    } else {
        let mut config = DealflowToml::default();
        if let Some(backend) = options.backend {
            config.storage.backend = backend;
        }
        config.session.user = options.user.map(str::to_string);
        config.save(&config_file)?;
        true
    };

    Ok(InitResult {
        dealflow_dir,
        created,
        wrote_config,
    })
}

/// Check if a project is already initialized with dealflow.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(DEALFLOW_DIR).join(CONFIG_FILE).exists()
}

/// Get the path to the dealflow directory for a project.
pub fn get_dealflow_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(DEALFLOW_DIR)
}
