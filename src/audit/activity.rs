use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    System,
    Note,
    Call,
    Email,
    Meeting,
    Task,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Note => "note",
            Self::Call => "call",
            Self::Email => "email",
            Self::Meeting => "meeting",
            Self::Task => "task",
        }
    }
}

impl FromStr for ActivityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "note" => Ok(Self::Note),
            "call" => Ok(Self::Call),
            "email" => Ok(Self::Email),
            "meeting" => Ok(Self::Meeting),
            "task" => Ok(Self::Task),
            _ => Err(format!("Invalid activity kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    pub id: String,
    pub kind: ActivityKind,
    pub title: String,
    pub description: String,
    pub entity_type: String,
    pub entity_id: String,
    pub performed_by: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Fields a caller supplies; id and timestamp are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewActivity<'a> {
    pub kind: ActivityKind,
    pub title: &'a str,
    pub description: &'a str,
    pub entity_type: &'a str,
    pub entity_id: &'a str,
    pub performed_by: &'a str,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActivityFeed {
    activities: Vec<Activity>,
}

impl ActivityFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_activity(&mut self, new: NewActivity<'_>) -> &Activity {
        let activity = Activity {
            id: Uuid::new_v4().to_string(),
            kind: new.kind,
            title: new.title.to_string(),
            description: new.description.to_string(),
            entity_type: new.entity_type.to_string(),
            entity_id: new.entity_id.to_string(),
            performed_by: new.performed_by.to_string(),
            timestamp: Utc::now(),
            metadata: new.metadata,
        };
        self.activities.insert(0, activity);
        &self.activities[0]
    }

    pub fn activities(&self) -> &[Activity] {
        &self.activities
    }

    /// Everything recorded against one entity, newest first.
    pub fn for_entity(&self, entity_id: &str) -> Vec<&Activity> {
        let mut hits: Vec<&Activity> = self
            .activities
            .iter()
            .filter(|a| a.entity_id == entity_id)
            .collect();
        hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        hits
    }

    /// Drop activities older than `before`. Returns how many were removed.
    pub fn prune_before(&mut self, before: DateTime<Utc>) -> usize {
        let len = self.activities.len();
        self.activities.retain(|a| a.timestamp >= before);
        len - self.activities.len()
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}
