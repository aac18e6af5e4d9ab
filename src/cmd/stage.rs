//! Stage commands: `dealflow stage add|rename|delete|list`.

use anyhow::Result;
use console::style;
use serde_json::json;

use super::super::StageCommands;
use super::{CmdContext, print_json};

pub fn cmd_stage(ctx: &CmdContext, command: StageCommands) -> Result<()> {
    let mut ws = ctx.workspace()?;

    match command {
        StageCommands::Add { id, name } => {
            let stage = ws.add_stage(&id, &name)?;
            if ctx.json {
                return print_json(&stage);
            }
            println!("{} stage {} ({})", style("Added").green().bold(), stage.name, stage.id);
        }
        StageCommands::Rename { id, name } => {
            let stage = ws.rename_stage(&id, &name)?;
            if ctx.json {
                return print_json(&stage);
            }
            println!("{} stage {} to {}", style("Renamed").green().bold(), stage.id, stage.name);
        }
        StageCommands::Delete { id, reassign_to } => {
            let removal = ws.delete_stage(&id, reassign_to.as_deref())?;
            if ctx.json {
                return print_json(&removal);
            }
            println!("{} stage {}", style("Deleted").green().bold(), removal.stage_id);
            if let Some(fallback) = &removal.reassigned_to {
                println!("  moved {} deal(s) to {}", removal.deals_moved, fallback);
            }
            if removal.deals_left_dangling > 0 {
                println!(
                    "  {} {} deal(s) still reference '{}'; move them with `dealflow deal move`",
                    style("warning:").yellow(),
                    removal.deals_left_dangling,
                    removal.stage_id
                );
            }
        }
        StageCommands::List => {
            let store = ws.store();
            if ctx.json {
                let stages: Vec<_> = store
                    .stages()
                    .iter()
                    .map(|s| {
                        json!({
                            "id": s.id,
                            "name": s.name,
                            "terminal": s.is_terminal(),
                            "deal_count": store.deals_in_stage(&s.id).count(),
                        })
                    })
                    .collect();
                return print_json(&stages);
            }

            println!("{:<20} {:<24} {:>6}", "ID", "NAME", "DEALS");
            for stage in store.stages() {
                let count = store.deals_in_stage(&stage.id).count();
                let marker = if stage.is_terminal() {
                    style(" (closed)").dim().to_string()
                } else {
                    String::new()
                };
                println!("{:<20} {:<24} {:>6}{}", stage.id, stage.name, count, marker);
            }

            let dangling = store.dangling_deals().count();
            if dangling > 0 {
                println!();
                println!(
                    "{} {} deal(s) point at a deleted stage",
                    style("warning:").yellow(),
                    dangling
                );
            }
        }
    }

    Ok(())
}
