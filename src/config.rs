//! Configuration for dealflow, read from `.dealflow/dealflow.toml`.
//!
//! Every field has a default, so an empty or missing file is valid.
//! Values are layered file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [session]
//! user = "alice@example.com"
//!
//! [storage]
//! backend = "sqlite"          # json | sqlite | memory
//! path = ".dealflow/pipeline.db"
//!
//! [pipeline]
//! default_stage = "lead"
//! on_delete = "cascade"       # cascade | orphan
//!
//! [rotting]
//! enabled = true
//! warning_days = 7
//! danger_days = 14
//!
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! cors = false
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::persist::{JsonFileBackend, KvBackend, MemoryBackend, SqliteBackend};
use crate::pipeline::models::default_stages;
use crate::pipeline::stats::RottingThresholds;
use crate::pipeline::{DeletePolicy, stage_ids};
use crate::workspace::{DEFAULT_USER, Workspace, WorkspaceSettings};

/// Name of the per-project directory.
pub const DEALFLOW_DIR: &str = ".dealflow";
/// Config file inside [`DEALFLOW_DIR`].
pub const CONFIG_FILE: &str = "dealflow.toml";
/// Environment variable naming the current user.
pub const USER_ENV: &str = "DEALFLOW_USER";

/// Where pipeline state is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    /// One JSON file per persisted collection.
    #[default]
    Json,
    /// A single SQLite database.
    Sqlite,
    /// Nothing survives the process. Useful for demos.
    Memory,
}

impl std::fmt::Display for StorageBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Sqlite => write!(f, "sqlite"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for StorageBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            _ => anyhow::bail!(
                "Invalid storage backend '{}'. Valid values: json, sqlite, memory",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSection {
    /// Identity recorded on audit and activity entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub backend: StorageBackendKind,
    /// Data directory (json) or database file (sqlite), relative to the project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Where new deals land and reopened deals fall back to
    #[serde(default = "default_stage")]
    pub default_stage: String,
    #[serde(default)]
    pub on_delete: DeletePolicy,
}

fn default_stage() -> String {
    stage_ids::LEAD.to_string()
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            default_stage: default_stage(),
            on_delete: DeletePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allow cross-origin requests from any origin
    #[serde(default)]
    pub cors: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors: false,
        }
    }
}

/// The complete dealflow.toml structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DealflowToml {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub rotting: RottingThresholds,
    #[serde(default)]
    pub server: ServerSection,
}

impl DealflowToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse dealflow.toml")
    }

    /// Load `dealflow.toml` from the given directory, or defaults when absent.
    pub fn load_or_default(dealflow_dir: &Path) -> Result<Self> {
        let config_path = dealflow_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize dealflow.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let stage = &self.pipeline.default_stage;
        if stage == stage_ids::CLOSED_WON || stage == stage_ids::CLOSED_LOST {
            warnings.push(format!(
                "default_stage '{}' is a closed stage; new deals cannot start there",
                stage
            ));
        } else if !default_stages().iter().any(|s| &s.id == stage) {
            warnings.push(format!(
                "default_stage '{}' is not one of the built-in stages; make sure it exists",
                stage
            ));
        }

        if self.rotting.warning_days < 0 || self.rotting.danger_days < 0 {
            warnings.push("rotting thresholds must not be negative".to_string());
        }
        if self.rotting.danger_days < self.rotting.warning_days {
            warnings.push(format!(
                "rotting danger_days ({}) is lower than warning_days ({})",
                self.rotting.danger_days, self.rotting.warning_days
            ));
        }

        if self.server.port == 0 {
            warnings.push("server port 0 picks a random port on every start".to_string());
        }

        if self
            .session
            .user
            .as_deref()
            .is_some_and(|u| u.trim().is_empty())
        {
            warnings.push(format!(
                "session user is blank; '{}' will be used",
                DEFAULT_USER
            ));
        }

        warnings
    }
}

/// Runtime configuration: dealflow.toml plus environment and CLI overrides.
#[derive(Debug, Clone)]
pub struct DealflowConfig {
    /// Path to the project directory
    pub project_dir: PathBuf,
    /// Path to the .dealflow directory
    pub dealflow_dir: PathBuf,
    /// Parsed dealflow.toml configuration
    pub toml: DealflowToml,
    /// CLI override: current user
    pub cli_user: Option<String>,
    /// Value of `DEALFLOW_USER` at startup
    pub env_user: Option<String>,
    /// CLI override: storage backend
    pub cli_backend: Option<StorageBackendKind>,
}

impl DealflowConfig {
    /// Create a config from a project directory, without environment overrides.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let dealflow_dir = project_dir.join(DEALFLOW_DIR);
        let toml = DealflowToml::load_or_default(&dealflow_dir)?;

        Ok(Self {
            project_dir,
            dealflow_dir,
            toml,
            cli_user: None,
            env_user: None,
            cli_backend: None,
        })
    }

    /// Create a config with environment and CLI overrides applied.
    pub fn with_cli_args(
        project_dir: PathBuf,
        user: Option<String>,
        backend: Option<StorageBackendKind>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.env_user = std::env::var(USER_ENV).ok();
        config.cli_user = user;
        config.cli_backend = backend;
        Ok(config)
    }

    /// Current user (CLI → env → file → default).
    pub fn current_user(&self) -> String {
        [
            self.cli_user.as_deref(),
            self.env_user.as_deref(),
            self.toml.session.user.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|u| !u.is_empty())
        .unwrap_or(DEFAULT_USER)
        .to_string()
    }

    /// Storage backend (CLI → file → default).
    pub fn backend_kind(&self) -> StorageBackendKind {
        self.cli_backend.unwrap_or(self.toml.storage.backend)
    }

    /// Get path to the config file.
    pub fn config_file(&self) -> PathBuf {
        self.dealflow_dir.join(CONFIG_FILE)
    }

    /// Get path to the default JSON data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.dealflow_dir.join("data")
    }

    /// Location the selected backend stores to. `None` for memory.
    pub fn storage_path(&self) -> Option<PathBuf> {
        let configured = self.toml.storage.path.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                self.project_dir.join(p)
            }
        });
        match self.backend_kind() {
            StorageBackendKind::Json => Some(configured.unwrap_or_else(|| self.data_dir())),
            StorageBackendKind::Sqlite => {
                Some(configured.unwrap_or_else(|| self.dealflow_dir.join("dealflow.db")))
            }
            StorageBackendKind::Memory => None,
        }
    }

    /// Open the configured backend.
    pub fn open_backend(&self) -> Result<Box<dyn KvBackend>> {
        let backend: Box<dyn KvBackend> = match (self.backend_kind(), self.storage_path()) {
            (StorageBackendKind::Json, Some(dir)) => Box::new(
                JsonFileBackend::open(&dir)
                    .with_context(|| format!("Failed to open data directory {}", dir.display()))?,
            ),
            (StorageBackendKind::Sqlite, Some(path)) => Box::new(
                SqliteBackend::open(&path)
                    .with_context(|| format!("Failed to open database {}", path.display()))?,
            ),
            _ => Box::new(MemoryBackend::new()),
        };
        Ok(backend)
    }

    pub fn workspace_settings(&self) -> WorkspaceSettings {
        WorkspaceSettings {
            default_stage: self.toml.pipeline.default_stage.clone(),
            delete_policy: self.toml.pipeline.on_delete,
            rotting: self.toml.rotting.clone(),
        }
    }

    /// Open the backend and load a workspace for the current user.
    pub fn open_workspace(&self) -> Result<Workspace> {
        let backend = self.open_backend()?;
        let workspace = Workspace::open(backend, &self.current_user(), self.workspace_settings())
            .context("Failed to load workspace state")?;
        Ok(workspace)
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_file_uses_defaults() -> Result<()> {
        let config = DealflowToml::parse("")?;
        assert_eq!(config.storage.backend, StorageBackendKind::Json);
        assert_eq!(config.pipeline.default_stage, "lead");
        assert_eq!(config.pipeline.on_delete, DeletePolicy::Cascade);
        assert_eq!(config.rotting.warning_days, 7);
        assert_eq!(config.rotting.danger_days, 14);
        assert_eq!(config.server.port, 3141);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.session.user.is_none());
        Ok(())
    }

    #[test]
    fn test_parse_full_config() -> Result<()> {
        let config = DealflowToml::parse(
            r#"
            [session]
            user = "alice"

            [storage]
            backend = "sqlite"
            path = "db/pipeline.db"

            [pipeline]
            default_stage = "proposal"
            on_delete = "orphan"

            [rotting]
            enabled = false
            warning_days = 3

            [server]
            port = 8080
            cors = true
            "#,
        )?;
        assert_eq!(config.session.user.as_deref(), Some("alice"));
        assert_eq!(config.storage.backend, StorageBackendKind::Sqlite);
        assert_eq!(config.pipeline.on_delete, DeletePolicy::Orphan);
        assert!(!config.rotting.enabled);
        assert_eq!(config.rotting.warning_days, 3);
        assert_eq!(config.rotting.danger_days, 14);
        assert_eq!(config.server.port, 8080);
        assert!(config.server.cors);
        Ok(())
    }

    #[test]
    fn test_parse_rejects_unknown_backend() {
        let result = DealflowToml::parse("[storage]\nbackend = \"redis\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_backend_kind_from_str() -> Result<()> {
        assert_eq!("SQLite".parse::<StorageBackendKind>()?, StorageBackendKind::Sqlite);
        assert_eq!(StorageBackendKind::Memory.to_string(), "memory");
        let err = "redis".parse::<StorageBackendKind>().unwrap_err();
        assert!(err.to_string().contains("Invalid storage backend"));
        Ok(())
    }

    #[test]
    fn test_validate_flags_problems() -> Result<()> {
        let config = DealflowToml::parse(
            r#"
            [pipeline]
            default_stage = "closed-won"

            [rotting]
            warning_days = 10
            danger_days = 5

            [server]
            port = 0
            "#,
        )?;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 3, "{:?}", warnings);
        assert!(warnings[0].contains("closed stage"));
        assert!(warnings[1].contains("danger_days"));
        assert!(warnings[2].contains("port 0"));
        assert!(DealflowToml::default().validate().is_empty());
        Ok(())
    }

    #[test]
    fn test_save_and_reload() -> Result<()> {
        let dir = tempdir()?;
        let mut config = DealflowToml::default();
        config.session.user = Some("bob".into());
        config.storage.backend = StorageBackendKind::Sqlite;
        let path = dir.path().join(CONFIG_FILE);
        config.save(&path)?;

        let loaded = DealflowToml::load_or_default(dir.path())?;
        assert_eq!(loaded.session.user.as_deref(), Some("bob"));
        assert_eq!(loaded.storage.backend, StorageBackendKind::Sqlite);
        Ok(())
    }

    #[test]
    fn test_user_layering() -> Result<()> {
        let dir = tempdir()?;
        let mut config = DealflowConfig::new(dir.path().to_path_buf())?;
        assert_eq!(config.current_user(), DEFAULT_USER);

        config.toml.session.user = Some("file-user".into());
        assert_eq!(config.current_user(), "file-user");

        config.env_user = Some("env-user".into());
        assert_eq!(config.current_user(), "env-user");

        config.cli_user = Some("cli-user".into());
        assert_eq!(config.current_user(), "cli-user");

        config.cli_user = Some("   ".into());
        assert_eq!(config.current_user(), "env-user");
        Ok(())
    }

    #[test]
    fn test_storage_paths() -> Result<()> {
        let dir = tempdir()?;
        let mut config = DealflowConfig::new(dir.path().to_path_buf())?;
        assert_eq!(config.storage_path(), Some(config.dealflow_dir.join("data")));

        config.cli_backend = Some(StorageBackendKind::Sqlite);
        assert_eq!(
            config.storage_path(),
            Some(config.dealflow_dir.join("dealflow.db"))
        );

        config.toml.storage.path = Some(PathBuf::from("custom.db"));
        assert_eq!(
            config.storage_path(),
            Some(config.project_dir.join("custom.db"))
        );

        config.cli_backend = Some(StorageBackendKind::Memory);
        assert_eq!(config.storage_path(), None);
        Ok(())
    }

    #[test]
    fn test_open_workspace_persists_to_json_dir() -> Result<()> {
        let dir = tempdir()?;
        let config = DealflowConfig::new(dir.path().to_path_buf())?;
        let mut ws = config.open_workspace()?;
        ws.add_stage("qualified", "Qualified")?;
        assert!(config.data_dir().join("deal-store.json").exists());

        let reopened = config.open_workspace()?;
        assert!(reopened.store().has_stage("qualified"));
        Ok(())
    }
}
