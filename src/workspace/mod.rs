//! The session object every surface talks to.
//!
//! A `Workspace` owns the pipeline store, the audit trail and the activity
//! feed together with the backend they are persisted to. Each command
//! validates its arguments, forwards to the store, and when the store's
//! revision moved it records one activity entry and one audit entry for
//! the current user, writes all three snapshots and publishes a
//! [`ChangeEvent`].
//!
//! Persistence is best-effort: a failed write is logged and the in-memory
//! state stays authoritative.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::audit::{
    Activity, ActivityFeed, ActivityKind, AuditFilter, AuditLog, AuditTrail, NewActivity,
};
use crate::errors::{PipelineError, StorageError, WorkspaceError};
use crate::persist::{KvBackend, LoadOutcome, keys, load_versioned, save_versioned};
use crate::pipeline::board::{self, BoardFilter, BoardView};
use crate::pipeline::models::is_terminal_stage;
use crate::pipeline::stats::{self, PipelineStats, RotLevel, RottingThresholds};
use crate::pipeline::{
    CustomField, Deal, DealPatch, DealStatus, DeletePolicy, LostReason, Note, PipelineSnapshot,
    PipelineStore, Stage, stage_ids,
};

pub mod events;

pub use events::ChangeEvent;

/// Identity used when nobody is configured.
pub const DEFAULT_USER: &str = "local-user";

type Result<T> = std::result::Result<T, WorkspaceError>;

/// Knobs that shape store behaviour, usually taken from `[pipeline]` and
/// `[rotting]` in the config file.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceSettings {
    pub default_stage: String,
    pub delete_policy: DeletePolicy,
    pub rotting: RottingThresholds,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            default_stage: stage_ids::LEAD.to_string(),
            delete_policy: DeletePolicy::default(),
            rotting: RottingThresholds::default(),
        }
    }
}

/// Fields for a deal that does not exist yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDeal {
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub contact_id: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub probability: u8,
    /// Defaults to the configured default stage.
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub expected_close_date: Option<NaiveDate>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
}

impl NewDeal {
    pub fn titled(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }
}

/// Result of removing a stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageRemoval {
    pub stage_id: String,
    pub reassigned_to: Option<String>,
    pub deals_moved: usize,
    pub deals_left_dangling: usize,
}

/// What gets written to the activity feed and audit trail for one change.
struct Change<'a> {
    action: &'a str,
    entity_type: &'a str,
    entity_id: &'a str,
    title: &'a str,
    description: String,
    details: Option<serde_json::Value>,
}

pub struct Workspace {
    store: PipelineStore,
    audit: AuditTrail,
    activity: ActivityFeed,
    backend: Box<dyn KvBackend>,
    current_user: String,
    rotting: RottingThresholds,
    events: broadcast::Sender<ChangeEvent>,
}

impl Workspace {
    /// Load all persisted state from `backend`. Missing, corrupt or
    /// mismatched snapshots start from defaults. A backend that cannot be
    /// read at all is an error, so the first save never overwrites data
    /// that was merely unreachable.
    pub fn open(
        backend: Box<dyn KvBackend>,
        current_user: &str,
        settings: WorkspaceSettings,
    ) -> std::result::Result<Self, StorageError> {
        let (snapshot, pipeline_outcome): (PipelineSnapshot, _) =
            load_versioned(backend.as_ref(), keys::DEAL_STORE);
        let (audit, audit_outcome): (AuditTrail, _) =
            load_versioned(backend.as_ref(), keys::AUDIT_STORE);
        let (activity, activity_outcome): (ActivityFeed, _) =
            load_versioned(backend.as_ref(), keys::ACTIVITY_STORE);

        for (key, outcome) in [
            (keys::DEAL_STORE, &pipeline_outcome),
            (keys::AUDIT_STORE, &audit_outcome),
            (keys::ACTIVITY_STORE, &activity_outcome),
        ] {
            match outcome {
                LoadOutcome::Unavailable(reason) => {
                    return Err(StorageError::Unavailable {
                        key: key.to_string(),
                        reason: reason.clone(),
                    });
                }
                LoadOutcome::VersionMismatch { .. } | LoadOutcome::Corrupt(_) => {
                    warn!(key, ?outcome, "persisted state discarded");
                }
                LoadOutcome::Restored | LoadOutcome::Missing => {}
            }
        }

        let store = PipelineStore::from_snapshot(snapshot)
            .with_default_stage(&settings.default_stage)
            .with_delete_policy(settings.delete_policy);

        let current_user = match current_user.trim() {
            "" => DEFAULT_USER.to_string(),
            user => user.to_string(),
        };

        info!(
            backend = backend.name(),
            user = %current_user,
            deals = store.deals().len(),
            stages = store.stages().len(),
            "workspace opened"
        );

        let (events, _) = broadcast::channel(events::EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            store,
            audit,
            activity,
            backend,
            current_user,
            rotting: settings.rotting,
            events,
        })
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn store(&self) -> &PipelineStore {
        &self.store
    }

    pub fn current_user(&self) -> &str {
        &self.current_user
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn rotting_thresholds(&self) -> &RottingThresholds {
        &self.rotting
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    pub fn deal(&self, id: &str) -> Result<&Deal> {
        self.store.deal(id).ok_or_else(|| WorkspaceError::NotFound {
            kind: "Deal",
            id: id.to_string(),
        })
    }

    pub fn stage(&self, id: &str) -> Result<&Stage> {
        self.store.stage(id).ok_or_else(|| WorkspaceError::NotFound {
            kind: "Stage",
            id: id.to_string(),
        })
    }

    pub fn note(&self, id: &str) -> Result<&Note> {
        self.store.note(id).ok_or_else(|| WorkspaceError::NotFound {
            kind: "Note",
            id: id.to_string(),
        })
    }

    pub fn list(&self, filter: BoardFilter, show_archived: bool) -> Vec<&Deal> {
        board::list_view(&self.store, filter, show_archived)
    }

    pub fn board(&self, filter: BoardFilter, show_archived: bool) -> BoardView {
        board::board_view(&self.store, filter, show_archived)
    }

    pub fn stats(&self) -> PipelineStats {
        stats::pipeline_stats(&self.store)
    }

    pub fn rotting(&self, now: DateTime<Utc>) -> Vec<(&Deal, RotLevel)> {
        stats::rotting_deals(&self.store, &self.rotting, now)
    }

    pub fn audit_logs(&self, filter: &AuditFilter) -> Vec<&AuditLog> {
        self.audit.get_logs(filter)
    }

    pub fn activities_for(&self, entity_id: &str) -> Vec<&Activity> {
        self.activity.for_entity(entity_id)
    }

    // ── Deals ─────────────────────────────────────────────────────────

    pub fn create_deal(&mut self, new: NewDeal) -> Result<Deal> {
        let title = new.title.trim();
        if title.is_empty() {
            return Err(invalid("deal title cannot be empty"));
        }
        validate_amounts(Some(new.value), Some(new.probability))?;

        let stage = new
            .stage
            .unwrap_or_else(|| self.store.default_stage().to_string());
        self.require_open_stage(&stage)?;

        let mut deal = Deal::new(title, &stage);
        deal.company = new.company;
        deal.contact = new.contact;
        deal.contact_id = new.contact_id;
        deal.value = new.value;
        deal.probability = new.probability;
        deal.expected_close_date = new.expected_close_date;
        deal.assigned_to = new.assigned_to;
        deal.custom_fields = new.custom_fields;

        self.store.add_deal(deal.clone());
        self.record(
            Change {
                action: "deal_created",
                entity_type: "deal",
                entity_id: &deal.id,
                title: "Deal Created",
                description: format!("Created in {}", self.stage_name(&stage)),
                details: Some(json!({ "title": deal.title, "value": deal.value })),
            },
            ChangeEvent::DealCreated { deal: deal.clone() },
        );
        Ok(deal)
    }

    /// Edit descriptive fields. Stage and status changes have their own
    /// commands and are refused here.
    pub fn update_deal(&mut self, id: &str, patch: DealPatch) -> Result<Deal> {
        self.deal(id)?;
        if patch.stage.is_some() || patch.status.is_some() {
            return Err(invalid(
                "stage and status change through move, win, lose and reopen",
            ));
        }
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(invalid("deal title cannot be empty"));
        }
        if patch.clear_assigned_to && patch.assigned_to.is_some() {
            return Err(invalid("cannot both set and clear assigned_to"));
        }
        if patch.clear_expected_close_date && patch.expected_close_date.is_some() {
            return Err(invalid("cannot both set and clear expected_close_date"));
        }
        validate_amounts(patch.value, patch.probability)?;

        let fields = patched_fields(&patch);
        if fields.is_empty() {
            return self.deal(id).cloned();
        }

        self.store.update_deal(id, patch);
        let deal = self.deal(id)?.clone();
        self.record(
            Change {
                action: "deal_updated",
                entity_type: "deal",
                entity_id: id,
                title: "Deal Updated",
                description: format!("Updated {}", fields.join(", ")),
                details: Some(json!({ "fields": fields })),
            },
            ChangeEvent::DealUpdated { deal: deal.clone() },
        );
        Ok(deal)
    }

    /// Drag-and-drop: move an active deal to `to_stage`, next to `target` when given.
    pub fn move_deal(
        &mut self,
        id: &str,
        to_stage: &str,
        target: Option<&str>,
        insert_before: bool,
    ) -> Result<Deal> {
        let deal = self.deal(id)?;
        if let Some(status) = deal.status {
            return Err(WorkspaceError::InvalidTransition {
                id: id.to_string(),
                status: status.as_str().to_string(),
            });
        }
        let from_stage = deal.stage.clone();
        self.require_open_stage(to_stage)?;

        let revision = self.store.revision();
        self.store
            .move_deal(id, &from_stage, to_stage, target, insert_before);
        let deal = self.deal(id)?.clone();
        if self.store.revision() == revision {
            return Ok(deal);
        }

        let description = if from_stage == to_stage {
            format!("Reordered within {}", self.stage_name(to_stage))
        } else {
            format!(
                "Moved from {} to {}",
                self.stage_name(&from_stage),
                self.stage_name(to_stage)
            )
        };
        self.record(
            Change {
                action: "deal_moved",
                entity_type: "deal",
                entity_id: id,
                title: "Stage Changed",
                description,
                details: Some(json!({
                    "from_stage": from_stage,
                    "to_stage": to_stage,
                    "target_deal_id": target,
                    "insert_before": insert_before,
                })),
            },
            ChangeEvent::DealMoved {
                deal: deal.clone(),
                from_stage,
                to_stage: to_stage.to_string(),
            },
        );
        Ok(deal)
    }

    pub fn win_deal(&mut self, id: &str) -> Result<Deal> {
        let deal = self.deal(id)?;
        if deal.status == Some(DealStatus::Lost) {
            return Err(WorkspaceError::InvalidTransition {
                id: id.to_string(),
                status: DealStatus::Lost.as_str().to_string(),
            });
        }

        let revision = self.store.revision();
        self.store.mark_as_won(id);
        let deal = self.deal(id)?.clone();
        if self.store.revision() == revision {
            return Ok(deal);
        }

        self.record(
            Change {
                action: "deal_won",
                entity_type: "deal",
                entity_id: id,
                title: "Deal Won",
                description: format!("Closed as won at {:.2}", deal.value),
                details: Some(json!({ "previous_stage": deal.previous_stage })),
            },
            ChangeEvent::DealWon { deal: deal.clone() },
        );
        Ok(deal)
    }

    /// Close an active deal as lost. A non-blank reason is required.
    pub fn lose_deal(&mut self, id: &str, reason: &str, notes: Option<&str>) -> Result<Deal> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(invalid("a lost reason is required"));
        }
        let deal = self.deal(id)?;
        if let Some(status) = deal.status {
            return Err(WorkspaceError::InvalidTransition {
                id: id.to_string(),
                status: status.as_str().to_string(),
            });
        }

        let notes = notes.map(str::trim).filter(|n| !n.is_empty());
        self.store
            .mark_as_lost(id, LostReason::new(id, reason, notes));
        let deal = self.deal(id)?.clone();
        self.record(
            Change {
                action: "deal_lost",
                entity_type: "deal",
                entity_id: id,
                title: "Deal Lost",
                description: format!("Reason: {}", reason),
                details: Some(json!({ "reason": reason, "notes": notes })),
            },
            ChangeEvent::DealLost {
                deal: deal.clone(),
                reason: reason.to_string(),
            },
        );
        Ok(deal)
    }

    /// Return a closed deal to the pipeline. Active deals are returned unchanged.
    pub fn reopen_deal(&mut self, id: &str) -> Result<Deal> {
        let deal = self.deal(id)?;
        let Some(status) = deal.status else {
            return Ok(deal.clone());
        };

        let revision = self.store.revision();
        self.store.reopen_deal(id);
        if self.store.revision() == revision {
            return Err(invalid("there is no open stage to reopen the deal into"));
        }
        let deal = self.deal(id)?.clone();
        self.record(
            Change {
                action: "deal_reopened",
                entity_type: "deal",
                entity_id: id,
                title: "Deal Reopened",
                description: format!("Reopened into {}", self.stage_name(&deal.stage)),
                details: Some(json!({ "was": status.as_str(), "stage": deal.stage })),
            },
            ChangeEvent::DealReopened { deal: deal.clone() },
        );
        Ok(deal)
    }

    pub fn archive_deal(&mut self, id: &str) -> Result<Deal> {
        self.deal(id)?;
        let revision = self.store.revision();
        self.store.archive_deal(id);
        let deal = self.deal(id)?.clone();
        if self.store.revision() != revision {
            self.record(
                Change {
                    action: "deal_archived",
                    entity_type: "deal",
                    entity_id: id,
                    title: "Deal Archived",
                    description: "Archived".to_string(),
                    details: None,
                },
                ChangeEvent::DealArchived { deal: deal.clone() },
            );
        }
        Ok(deal)
    }

    pub fn unarchive_deal(&mut self, id: &str) -> Result<Deal> {
        self.deal(id)?;
        let revision = self.store.revision();
        self.store.unarchive_deal(id);
        let deal = self.deal(id)?.clone();
        if self.store.revision() != revision {
            self.record(
                Change {
                    action: "deal_unarchived",
                    entity_type: "deal",
                    entity_id: id,
                    title: "Deal Restored",
                    description: "Restored from archive".to_string(),
                    details: None,
                },
                ChangeEvent::DealUnarchived { deal: deal.clone() },
            );
        }
        Ok(deal)
    }

    /// Delete a deal; returns the removed record.
    pub fn delete_deal(&mut self, id: &str) -> Result<Deal> {
        let deal = self.deal(id)?.clone();
        self.store.delete_deal(id);
        self.record(
            Change {
                action: "deal_deleted",
                entity_type: "deal",
                entity_id: id,
                title: "Deal Deleted",
                description: format!("Deleted '{}'", deal.title),
                details: Some(json!({
                    "title": deal.title,
                    "policy": self.store.delete_policy(),
                })),
            },
            ChangeEvent::DealDeleted {
                deal_id: id.to_string(),
            },
        );
        Ok(deal)
    }

    // ── Stages ────────────────────────────────────────────────────────

    pub fn add_stage(&mut self, id: &str, name: &str) -> Result<Stage> {
        let (id, name) = (id.trim(), name.trim());
        if id.is_empty() || name.is_empty() {
            return Err(invalid("stage id and name cannot be empty"));
        }
        if self.store.has_stage(id) {
            return Err(invalid(&format!("stage id '{}' is already taken", id)));
        }

        let stage = Stage::new(id, name);
        self.store.add_stage(stage.clone());
        self.record(
            Change {
                action: "stage_added",
                entity_type: "stage",
                entity_id: id,
                title: "Stage Added",
                description: format!("Added stage {}", name),
                details: None,
            },
            ChangeEvent::StageAdded {
                stage: stage.clone(),
            },
        );
        Ok(stage)
    }

    pub fn rename_stage(&mut self, id: &str, name: &str) -> Result<Stage> {
        let name = name.trim();
        if name.is_empty() {
            return Err(invalid("stage name cannot be empty"));
        }
        let old = self.stage(id)?.name.clone();
        if old == name {
            return self.stage(id).cloned();
        }

        self.store.update_stage(id, name);
        let stage = self.stage(id)?.clone();
        self.record(
            Change {
                action: "stage_renamed",
                entity_type: "stage",
                entity_id: id,
                title: "Stage Renamed",
                description: format!("Renamed {} to {}", old, name),
                details: Some(json!({ "from": old, "to": name })),
            },
            ChangeEvent::StageRenamed {
                stage: stage.clone(),
            },
        );
        Ok(stage)
    }

    /// Remove a stage. With `reassign_to`, its deals move there first;
    /// without, they are left pointing at the removed id.
    pub fn delete_stage(&mut self, id: &str, reassign_to: Option<&str>) -> Result<StageRemoval> {
        let stage = self.stage(id)?;
        if stage.is_terminal() {
            return Err(invalid(&format!("closed stage '{}' cannot be deleted", id)));
        }

        let removal = match reassign_to {
            Some(fallback) => {
                if is_terminal_stage(fallback) {
                    return Err(invalid("deals cannot be reassigned into a closed stage"));
                }
                let moved = self.store.reassign_stage(id, fallback)?;
                StageRemoval {
                    stage_id: id.to_string(),
                    reassigned_to: Some(fallback.to_string()),
                    deals_moved: moved,
                    deals_left_dangling: 0,
                }
            }
            None => {
                let dangling = self.store.deals_in_stage(id).count();
                self.store.delete_stage(id);
                StageRemoval {
                    stage_id: id.to_string(),
                    reassigned_to: None,
                    deals_moved: 0,
                    deals_left_dangling: dangling,
                }
            }
        };

        let description = match &removal.reassigned_to {
            Some(fallback) => format!(
                "Deleted stage {}, moved {} deal(s) to {}",
                id, removal.deals_moved, fallback
            ),
            None => format!("Deleted stage {}", id),
        };
        self.record(
            Change {
                action: "stage_deleted",
                entity_type: "stage",
                entity_id: id,
                title: "Stage Deleted",
                description,
                details: serde_json::to_value(&removal).ok(),
            },
            ChangeEvent::StageDeleted {
                stage_id: id.to_string(),
                reassigned_to: removal.reassigned_to.clone(),
                deals_moved: removal.deals_moved,
            },
        );
        Ok(removal)
    }

    // ── Notes ─────────────────────────────────────────────────────────

    pub fn add_note(&mut self, deal_id: &str, content: &str) -> Result<Note> {
        self.deal(deal_id)?;
        let content = content.trim();
        if content.is_empty() {
            return Err(invalid("note content cannot be empty"));
        }

        let note = Note::new(deal_id, content);
        self.store.add_note(note.clone());
        self.record(
            Change {
                action: "note_added",
                entity_type: "deal",
                entity_id: deal_id,
                title: "Note Added",
                description: preview(content),
                details: Some(json!({ "note_id": note.id })),
            },
            ChangeEvent::NoteAdded { note: note.clone() },
        );
        Ok(note)
    }

    pub fn edit_note(&mut self, id: &str, content: &str) -> Result<Note> {
        let content = content.trim();
        if content.is_empty() {
            return Err(invalid("note content cannot be empty"));
        }
        let deal_id = self.note(id)?.deal_id.clone();

        self.store.update_note(id, content);
        let note = self.note(id)?.clone();
        self.record(
            Change {
                action: "note_updated",
                entity_type: "deal",
                entity_id: &deal_id,
                title: "Note Edited",
                description: preview(content),
                details: Some(json!({ "note_id": id })),
            },
            ChangeEvent::NoteUpdated { note: note.clone() },
        );
        Ok(note)
    }

    pub fn delete_note(&mut self, id: &str) -> Result<Note> {
        let note = self.note(id)?.clone();
        self.store.delete_note(id);
        self.record(
            Change {
                action: "note_deleted",
                entity_type: "deal",
                entity_id: &note.deal_id,
                title: "Note Deleted",
                description: preview(&note.content),
                details: Some(json!({ "note_id": id })),
            },
            ChangeEvent::NoteDeleted {
                note_id: id.to_string(),
                deal_id: note.deal_id.clone(),
            },
        );
        Ok(note)
    }

    // ── Activity & retention ──────────────────────────────────────────

    /// Log a call, email, meeting or task against a deal.
    pub fn log_activity(
        &mut self,
        deal_id: &str,
        kind: ActivityKind,
        title: &str,
        description: &str,
    ) -> Result<Activity> {
        self.deal(deal_id)?;
        if kind == ActivityKind::System {
            return Err(invalid("system activities are recorded automatically"));
        }
        let title = title.trim();
        if title.is_empty() {
            return Err(invalid("activity title cannot be empty"));
        }

        let activity = self
            .activity
            .add_activity(NewActivity {
                kind,
                title,
                description,
                entity_type: "deal",
                entity_id: deal_id,
                performed_by: &self.current_user,
                metadata: None,
            })
            .clone();
        self.audit.add_log(
            "activity_logged",
            "deal",
            deal_id,
            &self.current_user,
            Some(json!({ "kind": kind.as_str(), "activity_id": activity.id })),
        );
        self.persist();
        events::publish(
            &self.events,
            ChangeEvent::ActivityLogged {
                activity: activity.clone(),
            },
        );
        Ok(activity)
    }

    /// Drop audit entries older than `before`.
    pub fn prune_audit(&mut self, before: DateTime<Utc>) -> usize {
        let removed = self.audit.clear_logs(before);
        if removed > 0 {
            info!(removed, %before, "pruned audit trail");
            self.persist();
        }
        removed
    }

    /// Drop activity entries older than `before`.
    pub fn prune_activities(&mut self, before: DateTime<Utc>) -> usize {
        let removed = self.activity.prune_before(before);
        if removed > 0 {
            info!(removed, %before, "pruned activity feed");
            self.persist();
        }
        removed
    }

    // ── Internals ─────────────────────────────────────────────────────

    fn require_open_stage(&self, stage: &str) -> Result<()> {
        if !self.store.has_stage(stage) {
            return Err(PipelineError::UnknownStage {
                id: stage.to_string(),
            }
            .into());
        }
        if is_terminal_stage(stage) {
            return Err(invalid(&format!(
                "'{}' is a closed stage; use win or lose instead",
                stage
            )));
        }
        Ok(())
    }

    fn stage_name(&self, id: &str) -> String {
        self.store
            .stage(id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn record(&mut self, change: Change<'_>, event: ChangeEvent) {
        self.activity.add_activity(NewActivity {
            kind: ActivityKind::System,
            title: change.title,
            description: &change.description,
            entity_type: change.entity_type,
            entity_id: change.entity_id,
            performed_by: &self.current_user,
            metadata: change.details.clone(),
        });
        self.audit.add_log(
            change.action,
            change.entity_type,
            change.entity_id,
            &self.current_user,
            change.details,
        );
        self.persist();
        events::publish(&self.events, event);
    }

    fn persist(&mut self) {
        save_or_warn(
            self.backend.as_mut(),
            keys::DEAL_STORE,
            &self.store.snapshot(),
        );
        save_or_warn(self.backend.as_mut(), keys::AUDIT_STORE, &self.audit);
        save_or_warn(self.backend.as_mut(), keys::ACTIVITY_STORE, &self.activity);
    }
}

fn save_or_warn<T: Serialize>(backend: &mut dyn KvBackend, key: &str, state: &T) {
    if let Err(e) = save_versioned(backend, key, state) {
        warn!(key, backend = backend.name(), error = %e, "failed to persist state");
    }
}

fn invalid(message: &str) -> WorkspaceError {
    WorkspaceError::InvalidArgument(message.to_string())
}

fn validate_amounts(value: Option<f64>, probability: Option<u8>) -> Result<()> {
    if value.is_some_and(|v| !v.is_finite() || v < 0.0) {
        return Err(invalid("deal value must be a non-negative number"));
    }
    if probability.is_some_and(|p| p > 100) {
        return Err(invalid("probability must be between 0 and 100"));
    }
    Ok(())
}

fn patched_fields(patch: &DealPatch) -> Vec<&'static str> {
    [
        ("title", patch.title.is_some()),
        ("company", patch.company.is_some()),
        ("contact", patch.contact.is_some()),
        ("contact_id", patch.contact_id.is_some()),
        ("value", patch.value.is_some()),
        ("probability", patch.probability.is_some()),
        (
            "expected_close_date",
            patch.expected_close_date.is_some() || patch.clear_expected_close_date,
        ),
        ("custom_fields", patch.custom_fields.is_some()),
        (
            "assigned_to",
            patch.assigned_to.is_some() || patch.clear_assigned_to,
        ),
    ]
    .into_iter()
    .filter_map(|(name, set)| set.then_some(name))
    .collect()
}

fn preview(content: &str) -> String {
    const MAX: usize = 80;
    match content.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryBackend;
    use chrono::Duration;

    fn workspace() -> (Workspace, MemoryBackend) {
        let backend = MemoryBackend::new();
        let ws = Workspace::open(
            Box::new(backend.clone()),
            "alice",
            WorkspaceSettings::default(),
        )
        .expect("open workspace");
        (ws, backend)
    }

    fn deal_with(ws: &mut Workspace, title: &str, stage: &str) -> Deal {
        let new = NewDeal {
            stage: Some(stage.to_string()),
            value: 1000.0,
            probability: 40,
            ..NewDeal::titled(title)
        };
        ws.create_deal(new).expect("create deal")
    }

    #[test]
    fn test_create_records_activity_audit_and_persists() -> anyhow::Result<()> {
        let (mut ws, backend) = workspace();
        let deal = deal_with(&mut ws, "Acme", stage_ids::LEAD);

        let acts = ws.activities_for(&deal.id);
        assert_eq!(acts.len(), 1);
        assert_eq!(acts[0].title, "Deal Created");
        assert_eq!(acts[0].performed_by, "alice");

        let logs = ws.audit_logs(&AuditFilter {
            action: Some("deal_created".into()),
            ..AuditFilter::default()
        });
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].entity_id, deal.id);

        assert_eq!(
            backend.keys(),
            vec!["activity-store", "audit-store", "deal-store"]
        );
        Ok(())
    }

    #[test]
    fn test_reopening_workspace_restores_state() {
        let (mut ws, backend) = workspace();
        let deal = deal_with(&mut ws, "Acme", stage_ids::PROPOSAL);
        ws.add_note(&deal.id, "Call back Tuesday").expect("note");

        let reopened = Workspace::open(Box::new(backend), "bob", WorkspaceSettings::default())
            .expect("reopen workspace");
        assert_eq!(reopened.store().deals().len(), 1);
        assert_eq!(reopened.store().notes().len(), 1);
        assert_eq!(reopened.activities_for(&deal.id).len(), 2);
        assert_eq!(reopened.current_user(), "bob");
    }

    /// Delegates writes to a shared map but fails every read.
    struct UnreadableBackend(MemoryBackend);

    impl KvBackend for UnreadableBackend {
        fn get(&self, _key: &str) -> std::result::Result<Option<String>, StorageError> {
            Err(StorageError::LockPoisoned)
        }
        fn set(&mut self, key: &str, value: &str) -> std::result::Result<(), StorageError> {
            self.0.set(key, value)
        }
        fn remove(&mut self, key: &str) -> std::result::Result<(), StorageError> {
            self.0.remove(key)
        }
        fn name(&self) -> &'static str {
            "unreadable"
        }
    }

    #[test]
    fn test_unreadable_backend_refuses_to_open() {
        let (mut ws, backend) = workspace();
        for title in ["A", "B", "C"] {
            deal_with(&mut ws, title, stage_ids::LEAD);
        }
        drop(ws);

        let err = Workspace::open(
            Box::new(UnreadableBackend(backend.clone())),
            "alice",
            WorkspaceSettings::default(),
        )
        .err()
        .expect("open must fail when reads fail");
        assert!(matches!(
            err,
            StorageError::Unavailable { ref key, .. } if key == keys::DEAL_STORE
        ));

        let reopened = Workspace::open(Box::new(backend), "alice", WorkspaceSettings::default())
            .expect("reopen workspace");
        assert_eq!(reopened.store().deals().len(), 3);
    }

    #[test]
    fn test_blank_user_falls_back_to_default() {
        let ws = Workspace::open(
            Box::new(MemoryBackend::new()),
            "  ",
            WorkspaceSettings::default(),
        )
        .expect("open workspace");
        assert_eq!(ws.current_user(), DEFAULT_USER);
    }

    #[test]
    fn test_create_validation() {
        let (mut ws, _) = workspace();
        assert!(matches!(
            ws.create_deal(NewDeal::titled("   ")),
            Err(WorkspaceError::InvalidArgument(_))
        ));
        assert!(matches!(
            ws.create_deal(NewDeal {
                probability: 101,
                ..NewDeal::titled("x")
            }),
            Err(WorkspaceError::InvalidArgument(_))
        ));
        assert!(matches!(
            ws.create_deal(NewDeal {
                value: -5.0,
                ..NewDeal::titled("x")
            }),
            Err(WorkspaceError::InvalidArgument(_))
        ));
        assert!(matches!(
            ws.create_deal(NewDeal {
                stage: Some("qualified".into()),
                ..NewDeal::titled("x")
            }),
            Err(WorkspaceError::Pipeline(PipelineError::UnknownStage { .. }))
        ));
        assert!(matches!(
            ws.create_deal(NewDeal {
                stage: Some(stage_ids::CLOSED_WON.into()),
                ..NewDeal::titled("x")
            }),
            Err(WorkspaceError::InvalidArgument(_))
        ));
        assert!(ws.store().deals().is_empty());
        assert!(ws.audit_logs(&AuditFilter::default()).is_empty());
    }

    #[test]
    fn test_create_defaults_to_configured_stage() -> anyhow::Result<()> {
        let settings = WorkspaceSettings {
            default_stage: stage_ids::CONTACT.to_string(),
            ..WorkspaceSettings::default()
        };
        let mut ws = Workspace::open(Box::new(MemoryBackend::new()), "alice", settings)?;
        let deal = ws.create_deal(NewDeal::titled("Acme"))?;
        assert_eq!(deal.stage, stage_ids::CONTACT);
        Ok(())
    }

    #[test]
    fn test_lose_requires_reason() {
        let (mut ws, _) = workspace();
        let deal = deal_with(&mut ws, "Acme", stage_ids::LEAD);
        assert!(matches!(
            ws.lose_deal(&deal.id, "  ", None),
            Err(WorkspaceError::InvalidArgument(_))
        ));
        assert!(ws.store().deal(&deal.id).is_some_and(|d| d.status.is_none()));
        assert!(ws.store().lost_reasons().is_empty());
    }

    #[test]
    fn test_won_to_lost_requires_reopen() -> anyhow::Result<()> {
        let (mut ws, _) = workspace();
        let deal = deal_with(&mut ws, "Acme", stage_ids::NEGOTIATION);
        ws.win_deal(&deal.id)?;

        assert!(matches!(
            ws.lose_deal(&deal.id, "Budget", None),
            Err(WorkspaceError::InvalidTransition { .. })
        ));
        let reopened = ws.reopen_deal(&deal.id)?;
        assert_eq!(reopened.stage, stage_ids::NEGOTIATION);
        assert_eq!(reopened.status, None);

        let lost = ws.lose_deal(&deal.id, "Budget", Some("  "))?;
        assert_eq!(lost.status, Some(DealStatus::Lost));
        assert_eq!(ws.store().lost_reasons()[0].notes, None);
        assert!(matches!(
            ws.win_deal(&deal.id),
            Err(WorkspaceError::InvalidTransition { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_idempotent_commands_record_nothing() -> anyhow::Result<()> {
        let (mut ws, _) = workspace();
        let deal = deal_with(&mut ws, "Acme", stage_ids::LEAD);
        ws.win_deal(&deal.id)?;
        let before = ws.audit_logs(&AuditFilter::default()).len();

        ws.win_deal(&deal.id)?;
        ws.unarchive_deal(&deal.id)?;
        ws.update_deal(&deal.id, DealPatch::default())?;
        ws.rename_stage(stage_ids::LEAD, "Lead")?;
        assert_eq!(ws.audit_logs(&AuditFilter::default()).len(), before);

        let active = deal_with(&mut ws, "Beta", stage_ids::LEAD);
        let reopened = ws.reopen_deal(&active.id)?;
        assert_eq!(reopened, active);
        Ok(())
    }

    #[test]
    fn test_move_rules() -> anyhow::Result<()> {
        let (mut ws, _) = workspace();
        let a = deal_with(&mut ws, "A", stage_ids::LEAD);
        let b = deal_with(&mut ws, "B", stage_ids::PROPOSAL);

        let moved = ws.move_deal(&a.id, stage_ids::PROPOSAL, Some(&b.id), true)?;
        assert_eq!(moved.previous_stage.as_deref(), Some(stage_ids::LEAD));
        let ids: Vec<&str> = ws.store().deals().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec![a.id.as_str(), b.id.as_str()]);

        assert!(matches!(
            ws.move_deal(&a.id, stage_ids::CLOSED_WON, None, false),
            Err(WorkspaceError::InvalidArgument(_))
        ));
        assert!(matches!(
            ws.move_deal(&a.id, "qualified", None, false),
            Err(WorkspaceError::Pipeline(PipelineError::UnknownStage { .. }))
        ));
        assert!(matches!(
            ws.move_deal("nope", stage_ids::LEAD, None, false),
            Err(WorkspaceError::NotFound { kind: "Deal", .. })
        ));

        ws.win_deal(&b.id)?;
        assert!(matches!(
            ws.move_deal(&b.id, stage_ids::LEAD, None, false),
            Err(WorkspaceError::InvalidTransition { .. })
        ));

        let acts = ws.activities_for(&a.id);
        assert_eq!(acts[0].title, "Stage Changed");
        assert_eq!(acts[0].description, "Moved from Lead to Proposal");
        Ok(())
    }

    #[test]
    fn test_update_refuses_stage_and_status() {
        let (mut ws, _) = workspace();
        let deal = deal_with(&mut ws, "Acme", stage_ids::LEAD);
        let patch = DealPatch {
            stage: Some(stage_ids::PROPOSAL.into()),
            ..DealPatch::default()
        };
        assert!(matches!(
            ws.update_deal(&deal.id, patch),
            Err(WorkspaceError::InvalidArgument(_))
        ));

        let patch = DealPatch {
            value: Some(2500.0),
            company: Some("Acme Corp".into()),
            ..DealPatch::default()
        };
        let updated = ws.update_deal(&deal.id, patch).expect("update");
        assert_eq!(updated.value, 2500.0);
        assert_eq!(
            ws.activities_for(&deal.id)[0].description,
            "Updated company, value"
        );
    }

    #[test]
    fn test_update_can_unassign_and_clear_close_date() -> anyhow::Result<()> {
        let (mut ws, _) = workspace();
        let deal = deal_with(&mut ws, "Acme", stage_ids::LEAD);
        ws.update_deal(
            &deal.id,
            DealPatch {
                assigned_to: Some("bob".into()),
                expected_close_date: NaiveDate::from_ymd_opt(2025, 6, 30),
                ..DealPatch::default()
            },
        )?;

        assert!(matches!(
            ws.update_deal(
                &deal.id,
                DealPatch {
                    assigned_to: Some("carol".into()),
                    clear_assigned_to: true,
                    ..DealPatch::default()
                },
            ),
            Err(WorkspaceError::InvalidArgument(_))
        ));

        let cleared = ws.update_deal(
            &deal.id,
            DealPatch {
                clear_assigned_to: true,
                clear_expected_close_date: true,
                ..DealPatch::default()
            },
        )?;
        assert_eq!(cleared.assigned_to, None);
        assert_eq!(cleared.expected_close_date, None);
        assert_eq!(
            ws.activities_for(&deal.id)[0].description,
            "Updated expected_close_date, assigned_to"
        );
        Ok(())
    }

    #[test]
    fn test_delete_stage_with_and_without_reassignment() -> anyhow::Result<()> {
        let (mut ws, _) = workspace();
        deal_with(&mut ws, "A", stage_ids::CONTACT);
        deal_with(&mut ws, "B", stage_ids::PROPOSAL);

        let removal = ws.delete_stage(stage_ids::CONTACT, Some(stage_ids::LEAD))?;
        assert_eq!(removal.deals_moved, 1);
        assert_eq!(ws.store().deals_in_stage(stage_ids::LEAD).count(), 1);

        let removal = ws.delete_stage(stage_ids::PROPOSAL, None)?;
        assert_eq!(removal.deals_left_dangling, 1);
        assert_eq!(ws.store().dangling_deals().count(), 1);

        assert!(matches!(
            ws.delete_stage(stage_ids::CLOSED_LOST, None),
            Err(WorkspaceError::InvalidArgument(_))
        ));
        assert!(matches!(
            ws.delete_stage(stage_ids::LEAD, Some(stage_ids::LEAD)),
            Err(WorkspaceError::Pipeline(PipelineError::SelfReassignment { .. }))
        ));
        assert!(matches!(
            ws.delete_stage("ghost", None),
            Err(WorkspaceError::NotFound { kind: "Stage", .. })
        ));
        Ok(())
    }

    #[test]
    fn test_add_stage_rejects_duplicates() -> anyhow::Result<()> {
        let (mut ws, _) = workspace();
        ws.add_stage("qualified", "Qualified")?;
        assert!(matches!(
            ws.add_stage("qualified", "Again"),
            Err(WorkspaceError::InvalidArgument(_))
        ));
        assert_eq!(ws.store().stages().len(), 7);
        Ok(())
    }

    #[test]
    fn test_note_lifecycle_is_logged_against_deal() -> anyhow::Result<()> {
        let (mut ws, _) = workspace();
        let deal = deal_with(&mut ws, "Acme", stage_ids::LEAD);
        let note = ws.add_note(&deal.id, "First call went well")?;
        ws.edit_note(&note.id, "First call went very well")?;
        ws.delete_note(&note.id)?;

        let titles: Vec<&str> = ws
            .activities_for(&deal.id)
            .iter()
            .map(|a| a.title.as_str())
            .collect();
        assert!(titles.contains(&"Note Added"));
        assert!(titles.contains(&"Note Edited"));
        assert!(titles.contains(&"Note Deleted"));
        assert!(matches!(
            ws.add_note("ghost", "x"),
            Err(WorkspaceError::NotFound { kind: "Deal", .. })
        ));
        Ok(())
    }

    #[test]
    fn test_delete_deal_cascades_by_default() -> anyhow::Result<()> {
        let (mut ws, _) = workspace();
        let deal = deal_with(&mut ws, "Acme", stage_ids::LEAD);
        ws.add_note(&deal.id, "hello")?;
        ws.lose_deal(&deal.id, "Price", None)?;
        ws.delete_deal(&deal.id)?;
        assert!(ws.store().notes().is_empty());
        assert!(ws.store().lost_reasons().is_empty());
        Ok(())
    }

    #[test]
    fn test_log_activity() -> anyhow::Result<()> {
        let (mut ws, _) = workspace();
        let deal = deal_with(&mut ws, "Acme", stage_ids::LEAD);
        let call = ws.log_activity(&deal.id, ActivityKind::Call, "Intro call", "30 minutes")?;
        assert_eq!(call.kind, ActivityKind::Call);
        assert_eq!(call.performed_by, "alice");
        assert!(matches!(
            ws.log_activity(&deal.id, ActivityKind::System, "x", ""),
            Err(WorkspaceError::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn test_prune_keeps_recent_entries() {
        let (mut ws, _) = workspace();
        deal_with(&mut ws, "Acme", stage_ids::LEAD);
        assert_eq!(ws.prune_audit(Utc::now() - Duration::days(1)), 0);
        assert_eq!(ws.prune_audit(Utc::now() + Duration::days(1)), 1);
        assert_eq!(ws.prune_activities(Utc::now() + Duration::days(1)), 1);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() -> anyhow::Result<()> {
        let (mut ws, _) = workspace();
        let mut rx = ws.subscribe();
        let deal = deal_with(&mut ws, "Acme", stage_ids::LEAD);
        ws.win_deal(&deal.id)?;

        match rx.recv().await? {
            ChangeEvent::DealCreated { deal: d } => assert_eq!(d.id, deal.id),
            other => panic!("Expected DealCreated, got {:?}", other),
        }
        match rx.recv().await? {
            ChangeEvent::DealWon { deal: d } => assert_eq!(d.probability, 100),
            other => panic!("Expected DealWon, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_preview_truncates_long_content() {
        let long = "x".repeat(100);
        assert_eq!(preview(&long).len(), 83);
        assert_eq!(preview("short"), "short");
    }
}
