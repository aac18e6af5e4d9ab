//! Deal commands: `dealflow deal add|update|move|win|lose|...`.

use anyhow::{Result, bail};
use chrono::Utc;
use console::style;
use serde_json::json;

use dealflow::pipeline::{CustomField, Deal, DealPatch, DealStatus};
use dealflow::pipeline::board::BoardFilter;
use dealflow::pipeline::stats::RotLevel;
use dealflow::workspace::{NewDeal, Workspace};

use super::super::DealCommands;
use super::{CmdContext, money, print_json, resolve_deal_id, short_id};

pub fn cmd_deal(ctx: &CmdContext, command: DealCommands) -> Result<()> {
    let mut ws = ctx.workspace()?;

    match command {
        DealCommands::Add {
            title,
            company,
            contact,
            value,
            probability,
            stage,
            close_date,
            assign,
            fields,
        } => {
            let deal = ws.create_deal(NewDeal {
                title,
                company: company.unwrap_or_default(),
                contact: contact.unwrap_or_default(),
                value,
                probability,
                stage,
                expected_close_date: close_date,
                assigned_to: assign,
                custom_fields: parse_fields(&fields)?,
                ..NewDeal::default()
            })?;
            report(ctx, "Created", &deal)
        }
        DealCommands::Update {
            id,
            title,
            company,
            contact,
            value,
            probability,
            close_date,
            clear_close_date,
            assign,
            unassign,
            fields,
        } => {
            let id = resolve_deal_id(&ws, &id)?;
            let custom_fields = if fields.is_empty() {
                None
            } else {
                Some(parse_fields(&fields)?)
            };
            let deal = ws.update_deal(
                &id,
                DealPatch {
                    title,
                    company,
                    contact,
                    value,
                    probability,
                    expected_close_date: close_date,
                    clear_expected_close_date: clear_close_date,
                    assigned_to: assign,
                    clear_assigned_to: unassign,
                    custom_fields,
                    ..DealPatch::default()
                },
            )?;
            report(ctx, "Updated", &deal)
        }
        DealCommands::Move {
            id,
            stage,
            before,
            after,
        } => {
            let id = resolve_deal_id(&ws, &id)?;
            let insert_before = after.is_none();
            let target = match before.or(after) {
                Some(t) => Some(resolve_deal_id(&ws, &t)?),
                None => None,
            };
            let deal = ws.move_deal(&id, &stage, target.as_deref(), insert_before)?;
            report(ctx, "Moved", &deal)
        }
        DealCommands::Win { id } => {
            let id = resolve_deal_id(&ws, &id)?;
            let deal = ws.win_deal(&id)?;
            report(ctx, "Won", &deal)
        }
        DealCommands::Lose { id, reason, notes } => {
            let id = resolve_deal_id(&ws, &id)?;
            let deal = ws.lose_deal(&id, &reason, notes.as_deref())?;
            report(ctx, "Lost", &deal)
        }
        DealCommands::Reopen { id } => {
            let id = resolve_deal_id(&ws, &id)?;
            let deal = ws.reopen_deal(&id)?;
            report(ctx, "Reopened", &deal)
        }
        DealCommands::Archive { id } => {
            let id = resolve_deal_id(&ws, &id)?;
            let deal = ws.archive_deal(&id)?;
            report(ctx, "Archived", &deal)
        }
        DealCommands::Unarchive { id } => {
            let id = resolve_deal_id(&ws, &id)?;
            let deal = ws.unarchive_deal(&id)?;
            report(ctx, "Unarchived", &deal)
        }
        DealCommands::Delete { id } => {
            let id = resolve_deal_id(&ws, &id)?;
            let deal = ws.delete_deal(&id)?;
            report(ctx, "Deleted", &deal)
        }
        DealCommands::List { filter, archived } => {
            let filter: BoardFilter = filter.parse().map_err(anyhow::Error::msg)?;
            list_deals(ctx, &ws, filter, archived)
        }
        DealCommands::Show { id } => {
            let id = resolve_deal_id(&ws, &id)?;
            show_deal(ctx, &ws, &id)
        }
    }
}

/// Parse repeated `--field label=value` arguments.
fn parse_fields(raw: &[String]) -> Result<Vec<CustomField>> {
    raw.iter()
        .map(|entry| match entry.split_once('=') {
            Some((label, value)) if !label.trim().is_empty() => {
                Ok(CustomField::new(label.trim(), value.trim()))
            }
            _ => bail!("Invalid field '{}': expected label=value", entry),
        })
        .collect()
}

fn report(ctx: &CmdContext, verb: &str, deal: &Deal) -> Result<()> {
    if ctx.json {
        return print_json(deal);
    }
    println!(
        "{} {} {} ({})",
        style(verb).green().bold(),
        style(short_id(&deal.id)).dim(),
        deal.title,
        deal.stage
    );
    Ok(())
}

fn status_label(deal: &Deal) -> String {
    let label = match deal.status {
        Some(DealStatus::Won) => style("won").green().to_string(),
        Some(DealStatus::Lost) => style("lost").red().to_string(),
        None => "open".to_string(),
    };
    if deal.is_archived {
        format!("{} {}", label, style("(archived)").dim())
    } else {
        label
    }
}

fn list_deals(
    ctx: &CmdContext,
    ws: &Workspace,
    filter: BoardFilter,
    show_archived: bool,
) -> Result<()> {
    let deals = ws.list(filter, show_archived);
    if ctx.json {
        return print_json(&deals);
    }
    if deals.is_empty() {
        println!("No {} deals.", filter.as_str());
        return Ok(());
    }

    println!(
        "{:<10} {:<30} {:<16} {:>12} {:>5}  {}",
        "ID", "TITLE", "STAGE", "VALUE", "PROB", "STATUS"
    );
    for deal in deals {
        println!(
            "{:<10} {:<30} {:<16} {:>12} {:>4}%  {}",
            short_id(&deal.id),
            truncate(&deal.title, 30),
            truncate(&deal.stage, 16),
            money(deal.value),
            deal.probability,
            status_label(deal)
        );
    }
    Ok(())
}

fn show_deal(ctx: &CmdContext, ws: &Workspace, id: &str) -> Result<()> {
    let deal = ws.deal(id)?;
    let store = ws.store();
    let notes: Vec<_> = store.notes_for(id).collect();
    let lost_reasons: Vec<_> = store.lost_reasons_for(id).collect();
    let activities = ws.activities_for(id);
    let rot_level = ws.rotting_thresholds().level(deal, Utc::now());

    if ctx.json {
        return print_json(&json!({
            "deal": deal,
            "notes": notes,
            "lost_reasons": lost_reasons,
            "activities": activities,
            "rot_level": rot_level,
        }));
    }

    println!("{}", style(&deal.title).bold());
    println!("  id:          {}", deal.id);
    println!("  stage:       {}", deal.stage);
    println!("  status:      {}", status_label(deal));
    if !deal.company.is_empty() {
        println!("  company:     {}", deal.company);
    }
    if !deal.contact.is_empty() {
        println!("  contact:     {}", deal.contact);
    }
    println!(
        "  value:       {} ({}% -> {})",
        money(deal.value),
        deal.probability,
        money(deal.weighted_value())
    );
    if let Some(date) = deal.expected_close_date {
        println!("  close date:  {}", date);
    }
    if let Some(owner) = &deal.assigned_to {
        println!("  assigned to: {}", owner);
    }
    println!("  updated:     {}", deal.updated_at.format("%Y-%m-%d %H:%M"));
    match rot_level {
        RotLevel::Warning => println!("  {}", style("going stale").yellow()),
        RotLevel::Danger => println!("  {}", style("rotting").red()),
        RotLevel::Fresh => {}
    }
    for field in &deal.custom_fields {
        println!("  {}: {}", field.label, field.value);
    }

    if !lost_reasons.is_empty() {
        println!();
        println!("Lost reasons:");
        for reason in lost_reasons {
            match &reason.notes {
                Some(notes) => println!("  - {} ({})", reason.reason, notes),
                None => println!("  - {}", reason.reason),
            }
        }
    }

    if !notes.is_empty() {
        println!();
        println!("Notes:");
        for note in notes {
            println!(
                "  {} {}  {}",
                style(short_id(&note.id)).dim(),
                note.created_at.format("%Y-%m-%d"),
                note.content
            );
        }
    }

    if !activities.is_empty() {
        println!();
        println!("Activity:");
        for activity in activities.iter().take(10) {
            println!(
                "  {}  {:<8} {}",
                activity.timestamp.format("%Y-%m-%d %H:%M"),
                activity.kind.as_str(),
                activity.title
            );
        }
    }
    Ok(())
}

pub(super) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
