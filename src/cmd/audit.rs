//! Audit trail and activity timeline: `dealflow audit`, `dealflow activity`.

use anyhow::{Result, bail};
use chrono::{TimeDelta, Utc};
use console::style;
use serde_json::json;

use dealflow::audit::{ActivityKind, AuditFilter};

use super::super::AuditCommands;
use super::{CmdContext, print_json, resolve_deal_id};

pub fn cmd_audit(ctx: &CmdContext, command: AuditCommands) -> Result<()> {
    let mut ws = ctx.workspace()?;

    match command {
        AuditCommands::List {
            entity_type,
            entity_id,
            action,
            performed_by,
            since,
            limit,
        } => {
            let filter = AuditFilter {
                entity_type,
                entity_id,
                action,
                performed_by,
                start: since
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| dt.and_utc()),
                end: None,
            };
            let logs: Vec<_> = ws.audit_logs(&filter).into_iter().take(limit).collect();
            if ctx.json {
                return print_json(&logs);
            }
            if logs.is_empty() {
                println!("No audit entries.");
            }
            for log in logs {
                println!(
                    "{}  {:<16} {:<6} {:<38} {}",
                    log.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    log.action,
                    log.entity_type,
                    log.entity_id,
                    style(&log.performed_by).cyan()
                );
            }
        }
        AuditCommands::Prune {
            older_than_days,
            activities,
        } => {
            if older_than_days < 0 {
                bail!("--older-than-days must not be negative");
            }
            let Some(cutoff) = TimeDelta::try_days(older_than_days)
                .and_then(|age| Utc::now().checked_sub_signed(age))
            else {
                bail!("--older-than-days {} is out of range", older_than_days);
            };
            let audit_removed = ws.prune_audit(cutoff);
            let activity_removed = if activities {
                ws.prune_activities(cutoff)
            } else {
                0
            };
            if ctx.json {
                return print_json(&json!({
                    "before": cutoff,
                    "audit_removed": audit_removed,
                    "activities_removed": activity_removed,
                }));
            }
            println!(
                "{} {} audit entr{} older than {}",
                style("Pruned").green().bold(),
                audit_removed,
                if audit_removed == 1 { "y" } else { "ies" },
                cutoff.format("%Y-%m-%d")
            );
            if activities {
                println!(
                    "  and {} activit{}",
                    activity_removed,
                    if activity_removed == 1 { "y" } else { "ies" }
                );
            }
        }
    }

    Ok(())
}

pub fn cmd_activity(
    ctx: &CmdContext,
    entity_id: &str,
    log: Option<&str>,
    title: Option<&str>,
    description: &str,
) -> Result<()> {
    let mut ws = ctx.workspace()?;
    // Stage ids are used verbatim; anything else may be a deal id prefix.
    let entity_id = if ws.store().has_stage(entity_id) {
        entity_id.to_string()
    } else {
        resolve_deal_id(&ws, entity_id)?
    };

    if let Some(kind) = log {
        let kind: ActivityKind = kind.parse().map_err(anyhow::Error::msg)?;
        let activity = ws.log_activity(&entity_id, kind, title.unwrap_or_default(), description)?;
        if ctx.json {
            return print_json(&activity);
        }
        println!(
            "{} {} on {}",
            style("Logged").green().bold(),
            activity.kind.as_str(),
            activity.entity_id
        );
        return Ok(());
    }

    let activities = ws.activities_for(&entity_id);
    if ctx.json {
        return print_json(&activities);
    }
    if activities.is_empty() {
        println!("No activity for {}.", entity_id);
    }
    for activity in activities {
        println!(
            "{}  {:<8} {}",
            activity.timestamp.format("%Y-%m-%d %H:%M"),
            activity.kind.as_str(),
            style(&activity.title).bold()
        );
        if !activity.description.is_empty() {
            println!("    {}", activity.description);
        }
        println!("    {}", style(format!("by {}", activity.performed_by)).dim());
    }
    Ok(())
}
