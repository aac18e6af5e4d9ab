//! Project-level commands: `dealflow init` and `dealflow serve`.

use anyhow::Result;
use console::style;

use dealflow::init::{InitOptions, init_project, is_initialized};
use dealflow::server::{ServerConfig, start_server};

use super::CmdContext;

pub fn cmd_init(ctx: &CmdContext) -> Result<()> {
    let was_initialized = is_initialized(&ctx.project_dir);

    let result = init_project(
        &ctx.project_dir,
        InitOptions {
            backend: ctx.storage,
            user: ctx.user.as_deref(),
        },
    )?;

    if result.created {
        println!(
            "{} dealflow project at {}",
            style("Initialized").green().bold(),
            result.dealflow_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .dealflow/");
        println!("  ├── dealflow.toml   # Configuration (see `dealflow config show`)");
        println!("  └── data/           # Deals, stages, notes, audit and activity");
        println!();
        println!("Next steps:");
        println!("  1. Run `dealflow deal add \"<title>\" --value 5000` to add a deal");
        println!("  2. Run `dealflow board` to see the pipeline");
        println!("  3. Run `dealflow serve` to open the HTTP API");
    } else if was_initialized {
        println!(
            "dealflow project already initialized at {}",
            result.dealflow_dir.display()
        );
        println!("Directory structure verified.");
    } else {
        println!(
            "Completed dealflow initialization at {}",
            result.dealflow_dir.display()
        );
    }

    Ok(())
}

pub async fn cmd_serve(
    ctx: &CmdContext,
    port: Option<u16>,
    host: Option<String>,
    cors: bool,
) -> Result<()> {
    let config = ctx.config()?;
    let workspace = ctx.workspace()?;

    let mut server = ServerConfig::from_toml(&config.toml);
    if let Some(port) = port {
        server.port = port;
    }
    if let Some(host) = host {
        server.host = host;
    }
    server.cors |= cors;

    println!(
        "Serving {} deals from {} storage as {}",
        workspace.store().deals().len(),
        workspace.backend_name(),
        style(workspace.current_user()).cyan()
    );
    start_server(server, workspace).await
}
