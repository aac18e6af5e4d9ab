//! The pipeline store: single source of truth for deals and stages.
//!
//! All deals live in one flat sequence. A stage's column is that sequence
//! filtered by `deal.stage`, so moving a deal is a remove + insert on the
//! shared sequence and no other deal is ever renumbered. Every mutator is a
//! silent no-op when it references an unknown id, and `revision()` only
//! advances when something actually changed.

use chrono::Utc;
use tracing::{debug, warn};

use super::models::*;
use crate::errors::PipelineError;

#[derive(Debug, Clone)]
pub struct PipelineStore {
    deals: Vec<Deal>,
    stages: Vec<Stage>,
    notes: Vec<Note>,
    lost_reasons: Vec<LostReason>,
    default_stage: String,
    delete_policy: DeletePolicy,
    revision: u64,
}

impl Default for PipelineStore {
    fn default() -> Self {
        Self::from_snapshot(PipelineSnapshot::default())
    }
}

impl PipelineStore {
    pub fn from_snapshot(snapshot: PipelineSnapshot) -> Self {
        Self {
            deals: snapshot.deals,
            stages: snapshot.stages,
            notes: snapshot.notes,
            lost_reasons: snapshot.lost_reasons,
            default_stage: stage_ids::LEAD.to_string(),
            delete_policy: DeletePolicy::default(),
            revision: 0,
        }
    }

    /// Stage a reopened deal falls back to when it has no usable previous stage.
    pub fn with_default_stage(mut self, stage: &str) -> Self {
        self.default_stage = stage.to_string();
        self
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    // ── Accessors ─────────────────────────────────────────────────────

    pub fn deals(&self) -> &[Deal] {
        &self.deals
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn lost_reasons(&self) -> &[LostReason] {
        &self.lost_reasons
    }

    pub fn deal(&self, id: &str) -> Option<&Deal> {
        self.deals.iter().find(|d| d.id == id)
    }

    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn has_stage(&self, id: &str) -> bool {
        self.stage(id).is_some()
    }

    pub fn note(&self, id: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    /// Column order for one stage: the deal sequence filtered by stage.
    pub fn deals_in_stage<'a>(&'a self, stage: &'a str) -> impl Iterator<Item = &'a Deal> + 'a {
        self.deals.iter().filter(move |d| d.stage == stage)
    }

    pub fn notes_for<'a>(&'a self, deal_id: &'a str) -> impl Iterator<Item = &'a Note> + 'a {
        self.notes.iter().filter(move |n| n.deal_id == deal_id)
    }

    pub fn lost_reasons_for<'a>(
        &'a self,
        deal_id: &'a str,
    ) -> impl Iterator<Item = &'a LostReason> + 'a {
        self.lost_reasons.iter().filter(move |r| r.deal_id == deal_id)
    }

    /// Deals whose stage id no longer names a stage.
    pub fn dangling_deals(&self) -> impl Iterator<Item = &Deal> {
        self.deals.iter().filter(|d| !self.has_stage(&d.stage))
    }

    pub fn default_stage(&self) -> &str {
        &self.default_stage
    }

    pub fn delete_policy(&self) -> DeletePolicy {
        self.delete_policy
    }

    /// Counts effective mutations since the store was built.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            deals: self.deals.clone(),
            stages: self.stages.clone(),
            notes: self.notes.clone(),
            lost_reasons: self.lost_reasons.clone(),
        }
    }

    fn position(&self, deal_id: &str) -> Option<usize> {
        self.deals.iter().position(|d| d.id == deal_id)
    }

    fn deal_mut(&mut self, id: &str) -> Option<&mut Deal> {
        self.deals.iter_mut().find(|d| d.id == id)
    }

    fn bump(&mut self) {
        self.revision += 1;
    }

    // ── Deal CRUD ─────────────────────────────────────────────────────

    /// Append a fully-formed deal. Ids are not checked for duplicates.
    pub fn add_deal(&mut self, deal: Deal) {
        debug!(deal_id = %deal.id, stage = %deal.stage, "add_deal");
        self.deals.push(deal);
        self.bump();
    }

    /// Merge `patch` into the deal and refresh `updated_at`.
    ///
    /// Cross-field rules are not re-checked: a patch can set `status` without
    /// touching `stage` or `probability`. Use `mark_as_won`/`mark_as_lost`.
    pub fn update_deal(&mut self, id: &str, patch: DealPatch) {
        let Some(deal) = self.deal_mut(id) else {
            debug!(deal_id = id, "update_deal: unknown deal");
            return;
        };
        patch.apply_to(deal);
        deal.updated_at = Utc::now();
        debug!(deal_id = id, "update_deal");
        self.bump();
    }

    /// Move a deal to `to_stage`, placing it next to `target_deal_id` when given.
    ///
    /// The deal is taken out of the sequence first, then re-inserted before
    /// (or after) the target's index in the shortened sequence, or at the
    /// very end when there is no usable target. `previous_stage` records the
    /// caller's `from_stage`.
    pub fn move_deal(
        &mut self,
        deal_id: &str,
        from_stage: &str,
        to_stage: &str,
        target_deal_id: Option<&str>,
        insert_before: bool,
    ) {
        if !self.has_stage(to_stage) {
            debug!(deal_id, to_stage, "move_deal: unknown destination stage");
            return;
        }
        let Some(index) = self.position(deal_id) else {
            debug!(deal_id, "move_deal: unknown deal");
            return;
        };

        let mut deal = self.deals.remove(index);
        let insert_at = match target_deal_id.and_then(|t| self.position(t)) {
            Some(target) if insert_before => target,
            Some(target) => target + 1,
            None => self.deals.len(),
        };

        deal.stage = to_stage.to_string();
        deal.previous_stage = Some(from_stage.to_string());
        deal.updated_at = Utc::now();
        debug!(deal_id, from_stage, to_stage, index, insert_at, "move_deal");
        self.deals.insert(insert_at, deal);
        self.bump();
    }

    /// Delete a deal. Its notes and lost reasons follow the delete policy.
    pub fn delete_deal(&mut self, deal_id: &str) {
        let Some(index) = self.position(deal_id) else {
            debug!(deal_id, "delete_deal: unknown deal");
            return;
        };
        self.deals.remove(index);
        if self.delete_policy == DeletePolicy::Cascade {
            self.notes.retain(|n| n.deal_id != deal_id);
            self.lost_reasons.retain(|r| r.deal_id != deal_id);
        }
        debug!(deal_id, policy = ?self.delete_policy, "delete_deal");
        self.bump();
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    /// Close a deal as won. Calling it on a won deal changes nothing.
    pub fn mark_as_won(&mut self, deal_id: &str) {
        let Some(deal) = self.deal_mut(deal_id) else {
            debug!(deal_id, "mark_as_won: unknown deal");
            return;
        };
        if deal.status == Some(DealStatus::Won)
            && deal.stage == stage_ids::CLOSED_WON
            && deal.probability == 100
        {
            return;
        }
        close_deal(deal, stage_ids::CLOSED_WON, DealStatus::Won, 100);
        debug!(deal_id, "mark_as_won");
        self.bump();
    }

    /// Close a deal as lost and append `reason` to the lost-reasons log.
    ///
    /// A reason recorded against a different deal is refused, and nothing
    /// changes.
    pub fn mark_as_lost(&mut self, deal_id: &str, reason: LostReason) {
        if reason.deal_id != deal_id {
            debug!(deal_id, reason_deal = %reason.deal_id, "mark_as_lost: reason for another deal");
            return;
        }
        let Some(deal) = self.deal_mut(deal_id) else {
            debug!(deal_id, "mark_as_lost: unknown deal");
            return;
        };
        close_deal(deal, stage_ids::CLOSED_LOST, DealStatus::Lost, 0);
        debug!(deal_id, reason = %reason.reason, "mark_as_lost");
        self.lost_reasons.push(reason);
        self.bump();
    }

    /// Return a won or lost deal to the stage it held before closing.
    ///
    /// Falls back to the default stage, then the first open stage, when the
    /// recorded stage is missing or has since been deleted. Active deals are
    /// left alone.
    pub fn reopen_deal(&mut self, deal_id: &str) {
        let Some(deal) = self.deal(deal_id) else {
            debug!(deal_id, "reopen_deal: unknown deal");
            return;
        };
        if deal.status.is_none() {
            debug!(deal_id, "reopen_deal: deal is not closed");
            return;
        }
        let Some(stage) = self.reopen_stage(deal.previous_stage.as_deref()) else {
            warn!(deal_id, "reopen_deal: no open stage to return to");
            return;
        };
        if let Some(deal) = self.deal_mut(deal_id) {
            deal.stage = stage;
            deal.status = None;
            deal.updated_at = Utc::now();
        }
        debug!(deal_id, "reopen_deal");
        self.bump();
    }

    fn reopen_stage(&self, previous: Option<&str>) -> Option<String> {
        previous
            .filter(|s| self.has_stage(s))
            .or_else(|| Some(self.default_stage.as_str()).filter(|s| self.has_stage(s)))
            .or_else(|| {
                self.stages
                    .iter()
                    .find(|s| !s.is_terminal())
                    .map(|s| s.id.as_str())
            })
            .map(str::to_string)
    }

    pub fn archive_deal(&mut self, deal_id: &str) {
        let Some(deal) = self.deal_mut(deal_id) else {
            debug!(deal_id, "archive_deal: unknown deal");
            return;
        };
        if deal.is_archived {
            return;
        }
        let now = Utc::now();
        deal.is_archived = true;
        deal.archived_at = Some(now);
        deal.updated_at = now;
        debug!(deal_id, "archive_deal");
        self.bump();
    }

    pub fn unarchive_deal(&mut self, deal_id: &str) {
        let Some(deal) = self.deal_mut(deal_id) else {
            debug!(deal_id, "unarchive_deal: unknown deal");
            return;
        };
        if !deal.is_archived {
            return;
        }
        deal.is_archived = false;
        deal.archived_at = None;
        deal.updated_at = Utc::now();
        debug!(deal_id, "unarchive_deal");
        self.bump();
    }

    // ── Stages ────────────────────────────────────────────────────────

    /// Append a stage. A stage whose id is already taken is ignored.
    pub fn add_stage(&mut self, stage: Stage) {
        if self.has_stage(&stage.id) {
            debug!(stage_id = %stage.id, "add_stage: id already taken");
            return;
        }
        debug!(stage_id = %stage.id, "add_stage");
        self.stages.push(stage);
        self.bump();
    }

    pub fn update_stage(&mut self, id: &str, name: &str) {
        let Some(stage) = self.stages.iter_mut().find(|s| s.id == id) else {
            debug!(stage_id = id, "update_stage: unknown stage");
            return;
        };
        stage.name = name.to_string();
        debug!(stage_id = id, name, "update_stage");
        self.bump();
    }

    /// Remove a stage without touching the deals that reference it.
    ///
    /// Those deals keep a dangling stage id; `reassign_stage` is the
    /// variant that migrates them first.
    pub fn delete_stage(&mut self, id: &str) {
        let Some(index) = self.stages.iter().position(|s| s.id == id) else {
            debug!(stage_id = id, "delete_stage: unknown stage");
            return;
        };
        self.stages.remove(index);
        let dangling = self.deals.iter().filter(|d| d.stage == id).count();
        if dangling > 0 {
            warn!(stage_id = id, dangling, "delete_stage left deals without a stage");
        }
        debug!(stage_id = id, "delete_stage");
        self.bump();
    }

    /// Move every deal in stage `id` to `fallback`, then delete `id`.
    ///
    /// Returns the number of deals moved. An unknown `id` is a no-op.
    pub fn reassign_stage(&mut self, id: &str, fallback: &str) -> Result<usize, PipelineError> {
        if id == fallback {
            return Err(PipelineError::SelfReassignment { id: id.to_string() });
        }
        if !self.has_stage(fallback) {
            return Err(PipelineError::UnknownStage {
                id: fallback.to_string(),
            });
        }
        if !self.has_stage(id) {
            return Ok(0);
        }

        let now = Utc::now();
        let mut moved = 0;
        for deal in self.deals.iter_mut().filter(|d| d.stage == id) {
            deal.stage = fallback.to_string();
            deal.updated_at = now;
            moved += 1;
        }
        self.stages.retain(|s| s.id != id);
        debug!(stage_id = id, fallback, moved, "reassign_stage");
        self.bump();
        Ok(moved)
    }

    // ── Notes ─────────────────────────────────────────────────────────

    pub fn add_note(&mut self, note: Note) {
        debug!(note_id = %note.id, deal_id = %note.deal_id, "add_note");
        self.notes.push(note);
        self.bump();
    }

    pub fn update_note(&mut self, id: &str, content: &str) {
        let Some(note) = self.notes.iter_mut().find(|n| n.id == id) else {
            debug!(note_id = id, "update_note: unknown note");
            return;
        };
        note.content = content.to_string();
        note.updated_at = Utc::now();
        debug!(note_id = id, "update_note");
        self.bump();
    }

    pub fn delete_note(&mut self, id: &str) {
        let before = self.notes.len();
        self.notes.retain(|n| n.id != id);
        if self.notes.len() == before {
            debug!(note_id = id, "delete_note: unknown note");
            return;
        }
        debug!(note_id = id, "delete_note");
        self.bump();
    }
}

fn close_deal(deal: &mut Deal, stage: &str, status: DealStatus, probability: u8) {
    if !is_terminal_stage(&deal.stage) {
        deal.previous_stage = Some(deal.stage.clone());
    }
    deal.stage = stage.to_string();
    deal.status = Some(status);
    deal.probability = probability;
    deal.updated_at = Utc::now();
}
