//! Note commands: `dealflow note add|edit|delete|list`.

use anyhow::{Result, bail};
use console::style;

use dealflow::pipeline::Note;
use dealflow::workspace::Workspace;

use super::super::NoteCommands;
use super::{CmdContext, print_json, resolve_deal_id, short_id};

pub fn cmd_note(ctx: &CmdContext, command: NoteCommands) -> Result<()> {
    let mut ws = ctx.workspace()?;

    match command {
        NoteCommands::Add { deal_id, content } => {
            let deal_id = resolve_deal_id(&ws, &deal_id)?;
            let note = ws.add_note(&deal_id, &content)?;
            report(ctx, "Added", &note)
        }
        NoteCommands::Edit { id, content } => {
            let id = resolve_note_id(&ws, &id)?;
            let note = ws.edit_note(&id, &content)?;
            report(ctx, "Edited", &note)
        }
        NoteCommands::Delete { id } => {
            let id = resolve_note_id(&ws, &id)?;
            let note = ws.delete_note(&id)?;
            report(ctx, "Deleted", &note)
        }
        NoteCommands::List { deal_id } => {
            let deal_id = resolve_deal_id(&ws, &deal_id)?;
            let notes: Vec<&Note> = ws.store().notes_for(&deal_id).collect();
            if ctx.json {
                return print_json(&notes);
            }
            if notes.is_empty() {
                println!("No notes.");
            }
            for note in notes {
                println!(
                    "{} {}  {}",
                    style(short_id(&note.id)).dim(),
                    note.updated_at.format("%Y-%m-%d %H:%M"),
                    note.content
                );
            }
            Ok(())
        }
    }
}

fn resolve_note_id(ws: &Workspace, input: &str) -> Result<String> {
    let matches: Vec<&Note> = ws
        .store()
        .notes()
        .iter()
        .filter(|n| n.id == input || n.id.starts_with(input))
        .collect();
    if let Some(exact) = matches.iter().find(|n| n.id == input) {
        return Ok(exact.id.clone());
    }
    match matches.as_slice() {
        [note] => Ok(note.id.clone()),
        [] => bail!("Note '{}' not found", input),
        _ => bail!("Note id '{}' is ambiguous; use more characters", input),
    }
}

fn report(ctx: &CmdContext, verb: &str, note: &Note) -> Result<()> {
    if ctx.json {
        return print_json(note);
    }
    println!(
        "{} note {} on deal {}",
        style(verb).green().bold(),
        style(short_id(&note.id)).dim(),
        short_id(&note.deal_id)
    );
    Ok(())
}
