//! Configuration view and validation commands: `dealflow config`.

use anyhow::Result;
use console::style;

use dealflow::config::{CONFIG_FILE, DealflowToml};
use dealflow::init::get_dealflow_dir;

use super::super::ConfigCommands;
use super::{CmdContext, print_json};

pub fn cmd_config(ctx: &CmdContext, command: Option<ConfigCommands>) -> Result<()> {
    let dealflow_dir = get_dealflow_dir(&ctx.project_dir);
    let config_path = dealflow_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            let config = ctx.config()?;
            let storage_path = config.storage_path();

            if ctx.json {
                return print_json(&serde_json::json!({
                    "config_file": config_path.exists().then_some(&config_path),
                    "file": config.toml,
                    "effective": {
                        "user": config.current_user(),
                        "backend": config.backend_kind().to_string(),
                        "storage_path": storage_path,
                    },
                }));
            }

            println!();
            println!("dealflow Configuration");
            println!("======================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No dealflow.toml found at {}", config_path.display());
                println!("Using default configuration:");
            }
            println!();
            print!("{}", toml::to_string_pretty(&config.toml)?);
            println!();

            println!("Effective values (with env/CLI overrides):");
            println!("  user = \"{}\"", config.current_user());
            println!("  backend = \"{}\"", config.backend_kind());
            match storage_path {
                Some(path) => println!("  storage = \"{}\"", path.display()),
                None => println!("  storage = (in memory, not persisted)"),
            }
            println!();
            if !config_path.exists() {
                println!("Run 'dealflow config init' to create a dealflow.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No dealflow.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = DealflowToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("{}", style("Configuration is valid.").green());
            } else {
                println!("{}", style("Configuration warnings:").yellow());
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("dealflow.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !dealflow_dir.exists() {
                std::fs::create_dir_all(&dealflow_dir)?;
            }

            DealflowToml::default().save(&config_path)?;

            println!("Created dealflow.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [session] user");
            println!("  - [storage] backend (json, sqlite, memory) and path");
            println!("  - [pipeline] default_stage, on_delete (cascade, orphan)");
            println!("  - [rotting] enabled, warning_days, danger_days");
            println!("  - [server] host, port, cors");
            println!();
        }
    }

    Ok(())
}
