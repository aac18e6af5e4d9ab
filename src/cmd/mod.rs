//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled         |
//! |-----------|--------------------------|
//! | `project` | `Init`, `Serve`          |
//! | `deal`    | `Deal`                   |
//! | `stage`   | `Stage`                  |
//! | `note`    | `Note`                   |
//! | `board`   | `Board`, `Stats`         |
//! | `audit`   | `Audit`, `Activity`      |
//! | `config`  | `Config`                 |

use anyhow::{Result, bail};
use serde::Serialize;
use std::path::PathBuf;

use dealflow::config::{DealflowConfig, StorageBackendKind};
use dealflow::init::is_initialized;
use dealflow::pipeline::Deal;
use dealflow::workspace::Workspace;

pub mod audit;
pub mod board;
pub mod config;
pub mod deal;
pub mod note;
pub mod project;
pub mod stage;

pub use audit::{cmd_activity, cmd_audit};
pub use board::{cmd_board, cmd_stats};
pub use config::cmd_config;
pub use deal::cmd_deal;
pub use note::cmd_note;
pub use project::{cmd_init, cmd_serve};
pub use stage::cmd_stage;

/// Global flags every command needs.
pub struct CmdContext {
    pub project_dir: PathBuf,
    pub user: Option<String>,
    pub storage: Option<StorageBackendKind>,
    pub json: bool,
}

impl CmdContext {
    pub fn config(&self) -> Result<DealflowConfig> {
        DealflowConfig::with_cli_args(self.project_dir.clone(), self.user.clone(), self.storage)
    }

    /// Open the project's workspace. Persistent backends need `dealflow init` first.
    pub fn workspace(&self) -> Result<Workspace> {
        let config = self.config()?;
        if config.backend_kind() != StorageBackendKind::Memory
            && !is_initialized(&self.project_dir)
        {
            bail!(
                "No dealflow project found in {}. Run 'dealflow init' first.",
                self.project_dir.display()
            );
        }
        config.open_workspace()
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Accept a full deal id or an unambiguous prefix of one.
pub fn resolve_deal_id(ws: &Workspace, input: &str) -> Result<String> {
    if ws.store().deal(input).is_some() {
        return Ok(input.to_string());
    }
    let matches: Vec<&Deal> = ws
        .store()
        .deals()
        .iter()
        .filter(|d| d.id.starts_with(input))
        .collect();
    match matches.as_slice() {
        [deal] => Ok(deal.id.clone()),
        [] => bail!("Deal '{}' not found", input),
        _ => bail!(
            "Deal id '{}' is ambiguous ({} matches); use more characters",
            input,
            matches.len()
        ),
    }
}

pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

pub fn money(value: f64) -> String {
    format!("{:.2}", value)
}
