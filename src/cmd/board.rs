//! Read-only views: `dealflow board` and `dealflow stats`.

use anyhow::Result;
use chrono::Utc;
use console::style;
use serde_json::json;

use dealflow::pipeline::board::BoardFilter;
use dealflow::pipeline::stats::RotLevel;

use super::deal::truncate;
use super::{CmdContext, money, print_json, short_id};

pub fn cmd_board(ctx: &CmdContext, filter: &str, show_archived: bool) -> Result<()> {
    let filter: BoardFilter = filter.parse().map_err(anyhow::Error::msg)?;
    let ws = ctx.workspace()?;
    let board = ws.board(filter, show_archived);

    if ctx.json {
        return print_json(&board);
    }

    let thresholds = ws.rotting_thresholds();
    let now = Utc::now();
    for column in &board.columns {
        println!(
            "{} {}  {}",
            style(&column.stage.name).bold(),
            style(format!("({})", column.deals.len())).dim(),
            money(column.total_value)
        );
        for deal in &column.deals {
            let marker = match thresholds.level(deal, now) {
                RotLevel::Danger => style("●").red().to_string(),
                RotLevel::Warning => style("●").yellow().to_string(),
                RotLevel::Fresh => " ".to_string(),
            };
            println!(
                "  {} {} {:<30} {:>12} {:>4}%",
                marker,
                style(short_id(&deal.id)).dim(),
                truncate(&deal.title, 30),
                money(deal.value),
                deal.probability
            );
        }
        println!();
    }
    Ok(())
}

pub fn cmd_stats(ctx: &CmdContext) -> Result<()> {
    let ws = ctx.workspace()?;
    let stats = ws.stats();
    let rotting = ws.rotting(Utc::now());

    if ctx.json {
        let rotting: Vec<_> = rotting
            .iter()
            .map(|(deal, level)| json!({ "deal_id": deal.id, "title": deal.title, "level": level }))
            .collect();
        return print_json(&json!({ "stats": stats, "rotting": rotting }));
    }

    println!("{:<24} {:>6} {:>14} {:>14}", "STAGE", "DEALS", "VALUE", "WEIGHTED");
    for stage in &stats.stages {
        println!(
            "{:<24} {:>6} {:>14} {:>14}",
            stage.stage_name,
            stage.deal_count,
            money(stage.total_value),
            money(stage.weighted_value)
        );
    }
    println!();
    println!("Open pipeline:     {}", money(stats.open_value));
    println!("Weighted forecast: {}", money(stats.weighted_forecast));
    println!(
        "Won:               {} ({} deal(s))",
        money(stats.won_value),
        stats.won_count
    );
    println!(
        "Lost:              {} ({} deal(s))",
        money(stats.lost_value),
        stats.lost_count
    );
    match stats.win_rate {
        Some(rate) => println!("Win rate:          {:.0}%", rate * 100.0),
        None => println!("Win rate:          n/a"),
    }

    if !rotting.is_empty() {
        println!();
        println!("Stale deals:");
        for (deal, level) in rotting {
            let label = match level {
                RotLevel::Danger => style("rotting").red(),
                _ => style("stale").yellow(),
            };
            println!(
                "  {} {:<30} last touched {}",
                label,
                truncate(&deal.title, 30),
                deal.updated_at.format("%Y-%m-%d")
            );
        }
    }
    Ok(())
}
