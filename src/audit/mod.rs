//! Append-only audit trail and activity feed.
//!
//! Both collections are newest-first and never mutated after an entry is
//! written; the only way to shrink them is an explicit retention call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod activity;
pub use activity::{Activity, ActivityFeed, ActivityKind, NewActivity};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditLog {
    pub id: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub performed_by: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Every populated field must match. Date bounds are inclusive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<String>,
    pub performed_by: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn matches(&self, log: &AuditLog) -> bool {
        fn field_ok(want: &Option<String>, have: &str) -> bool {
            want.as_deref().is_none_or(|w| w == have)
        }
        field_ok(&self.entity_type, &log.entity_type)
            && field_ok(&self.entity_id, &log.entity_id)
            && field_ok(&self.action, &log.action)
            && field_ok(&self.performed_by, &log.performed_by)
            && self.start.is_none_or(|s| log.timestamp >= s)
            && self.end.is_none_or(|e| log.timestamp <= e)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditTrail {
    logs: Vec<AuditLog>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an action. The entry gets a fresh id and the current time.
    pub fn add_log(
        &mut self,
        action: &str,
        entity_type: &str,
        entity_id: &str,
        performed_by: &str,
        details: Option<serde_json::Value>,
    ) -> &AuditLog {
        let log = AuditLog {
            id: Uuid::new_v4().to_string(),
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            performed_by: performed_by.to_string(),
            timestamp: Utc::now(),
            details,
        };
        self.logs.insert(0, log);
        &self.logs[0]
    }

    pub fn logs(&self) -> &[AuditLog] {
        &self.logs
    }

    pub fn get_logs(&self, filter: &AuditFilter) -> Vec<&AuditLog> {
        self.logs.iter().filter(|l| filter.matches(l)).collect()
    }

    /// Drop entries older than `before`. Returns how many were removed.
    pub fn clear_logs(&mut self, before: DateTime<Utc>) -> usize {
        let len = self.logs.len();
        self.logs.retain(|l| l.timestamp >= before);
        len - self.logs.len()
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn trail() -> AuditTrail {
        let mut trail = AuditTrail::new();
        trail.add_log("deal.created", "deal", "d1", "alice", None);
        trail.add_log("deal.moved", "deal", "d1", "bob", None);
        trail.add_log("stage.renamed", "stage", "lead", "alice", None);
        trail
    }

    #[test]
    fn test_add_log_prepends_newest_first() {
        let trail = trail();
        assert_eq!(trail.len(), 3);
        assert_eq!(trail.logs()[0].action, "stage.renamed");
        assert_eq!(trail.logs()[2].action, "deal.created");
        assert_ne!(trail.logs()[0].id, trail.logs()[1].id);
    }

    #[test]
    fn test_filter_by_entity_and_performer() {
        let trail = trail();
        let filter = AuditFilter {
            entity_type: Some("deal".into()),
            performed_by: Some("alice".into()),
            ..Default::default()
        };
        let hits = trail.get_logs(&filter);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].action, "deal.created");
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let trail = trail();
        assert_eq!(trail.get_logs(&AuditFilter::default()).len(), 3);
    }

    #[test]
    fn test_date_bounds_are_inclusive() {
        let trail = trail();
        let ts = trail.logs()[1].timestamp;
        let filter = AuditFilter {
            start: Some(ts),
            end: Some(ts),
            action: Some("deal.moved".into()),
            ..Default::default()
        };
        assert_eq!(trail.get_logs(&filter).len(), 1);

        let future = AuditFilter {
            start: Some(Utc::now() + Duration::hours(1)),
            ..Default::default()
        };
        assert!(trail.get_logs(&future).is_empty());
    }

    #[test]
    fn test_clear_logs_keeps_recent_entries() {
        let mut trail = trail();
        let mut old = trail.logs()[2].clone();
        old.id = "old".into();
        old.timestamp = Utc::now() - Duration::days(90);
        trail.logs.push(old);

        let removed = trail.clear_logs(Utc::now() - Duration::days(30));
        assert_eq!(removed, 1);
        assert_eq!(trail.len(), 3);
        assert!(trail.logs().iter().all(|l| l.id != "old"));
    }

    #[test]
    fn test_details_survive_serde() {
        let mut trail = AuditTrail::new();
        trail.add_log(
            "deal.lost",
            "deal",
            "d9",
            "carol",
            Some(serde_json::json!({"reason": "price"})),
        );
        let json = serde_json::to_string(&trail).unwrap();
        let back: AuditTrail = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trail);
        assert_eq!(back.logs()[0].details.as_ref().unwrap()["reason"], "price");
    }
}
