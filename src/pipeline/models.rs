use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed stage ids. The two closed stages are terminal.
pub mod stage_ids {
    pub const LEAD: &str = "lead";
    pub const CONTACT: &str = "contact-made";
    pub const PROPOSAL: &str = "proposal";
    pub const NEGOTIATION: &str = "negotiation";
    pub const CLOSED_WON: &str = "closed-won";
    pub const CLOSED_LOST: &str = "closed-lost";
}

/// Whether a stage id is one of the two reserved terminal stages.
pub fn is_terminal_stage(id: &str) -> bool {
    id == stage_ids::CLOSED_WON || id == stage_ids::CLOSED_LOST
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    Won,
    Lost,
}

impl DealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Won => "won",
            Self::Lost => "lost",
        }
    }
}

impl FromStr for DealStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "won" => Ok(Self::Won),
            "lost" => Ok(Self::Lost),
            _ => Err(format!("Invalid deal status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomField {
    pub id: String,
    pub label: String,
    pub value: String,
}

impl CustomField {
    pub fn new(label: &str, value: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deal {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub contact_id: String,
    pub value: f64,
    pub probability: u8,
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_close_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DealStatus>,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
}

impl Deal {
    /// A fresh active deal with a generated id and both timestamps set to now.
    pub fn new(title: &str, stage: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            company: String::new(),
            contact: String::new(),
            contact_id: String::new(),
            value: 0.0,
            probability: 0,
            stage: stage.to_string(),
            previous_stage: None,
            expected_close_date: None,
            created_at: now,
            updated_at: now,
            status: None,
            is_archived: false,
            archived_at: None,
            custom_fields: Vec::new(),
            assigned_to: None,
        }
    }

    pub fn weighted_value(&self) -> f64 {
        self.value * f64::from(self.probability) / 100.0
    }

    pub fn is_closed(&self) -> bool {
        self.status.is_some()
    }
}

/// Partial field set merged by `update_deal`. `None` leaves a field alone;
/// the `clear_*` flags reset the optional fields to unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DealPatch {
    pub title: Option<String>,
    pub company: Option<String>,
    pub contact: Option<String>,
    pub contact_id: Option<String>,
    pub value: Option<f64>,
    pub probability: Option<u8>,
    pub stage: Option<String>,
    pub expected_close_date: Option<NaiveDate>,
    pub status: Option<DealStatus>,
    pub custom_fields: Option<Vec<CustomField>>,
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub clear_expected_close_date: bool,
    #[serde(default)]
    pub clear_assigned_to: bool,
}

impl DealPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.company.is_none()
            && self.contact.is_none()
            && self.contact_id.is_none()
            && self.value.is_none()
            && self.probability.is_none()
            && self.stage.is_none()
            && self.expected_close_date.is_none()
            && self.status.is_none()
            && self.custom_fields.is_none()
            && self.assigned_to.is_none()
            && !self.clear_expected_close_date
            && !self.clear_assigned_to
    }

    /// Merge every populated field into `deal`. Timestamps are the caller's job.
    pub fn apply_to(self, deal: &mut Deal) {
        if let Some(v) = self.title {
            deal.title = v;
        }
        if let Some(v) = self.company {
            deal.company = v;
        }
        if let Some(v) = self.contact {
            deal.contact = v;
        }
        if let Some(v) = self.contact_id {
            deal.contact_id = v;
        }
        if let Some(v) = self.value {
            deal.value = v;
        }
        if let Some(v) = self.probability {
            deal.probability = v;
        }
        if let Some(v) = self.stage {
            deal.stage = v;
        }
        if self.clear_expected_close_date {
            deal.expected_close_date = None;
        }
        if let Some(v) = self.expected_close_date {
            deal.expected_close_date = Some(v);
        }
        if let Some(v) = self.status {
            deal.status = Some(v);
        }
        if let Some(v) = self.custom_fields {
            deal.custom_fields = v;
        }
        if self.clear_assigned_to {
            deal.assigned_to = None;
        }
        if let Some(v) = self.assigned_to {
            deal.assigned_to = Some(v);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stage {
    pub id: String,
    pub name: String,
}

impl Stage {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        is_terminal_stage(&self.id)
    }
}

/// The stage list a fresh pipeline starts with.
pub fn default_stages() -> Vec<Stage> {
    vec![
        Stage::new(stage_ids::LEAD, "Lead"),
        Stage::new(stage_ids::CONTACT, "Contact Made"),
        Stage::new(stage_ids::PROPOSAL, "Proposal"),
        Stage::new(stage_ids::NEGOTIATION, "Negotiation"),
        Stage::new(stage_ids::CLOSED_WON, "Closed Won"),
        Stage::new(stage_ids::CLOSED_LOST, "Closed Lost"),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub id: String,
    pub deal_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn new(deal_id: &str, content: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            deal_id: deal_id.to_string(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LostReason {
    pub id: String,
    pub deal_id: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LostReason {
    pub fn new(deal_id: &str, reason: &str, notes: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            deal_id: deal_id.to_string(),
            reason: reason.to_string(),
            notes: notes.map(str::to_string),
            timestamp: Utc::now(),
        }
    }
}

/// What happens to a deal's notes and lost reasons when the deal is deleted.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeletePolicy {
    /// Remove the deal's notes and lost reasons along with it.
    #[default]
    Cascade,
    /// Leave them behind, keyed by a deal id that no longer exists.
    Orphan,
}

impl FromStr for DeletePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cascade" => Ok(Self::Cascade),
            "orphan" => Ok(Self::Orphan),
            _ => Err(format!("Invalid delete policy: {}", s)),
        }
    }
}

/// The full persisted pipeline state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSnapshot {
    pub deals: Vec<Deal>,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub lost_reasons: Vec<LostReason>,
}

impl Default for PipelineSnapshot {
    fn default() -> Self {
        Self {
            deals: Vec::new(),
            stages: default_stages(),
            notes: Vec::new(),
            lost_reasons: Vec::new(),
        }
    }
}
