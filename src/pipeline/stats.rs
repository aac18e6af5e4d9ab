//! Pipeline analytics: per-stage value, weighted forecast, win rate, rotting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::models::{Deal, DealStatus};
use super::store::PipelineStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageSummary {
    pub stage_id: String,
    pub stage_name: String,
    pub deal_count: usize,
    pub total_value: f64,
    pub weighted_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineStats {
    pub stages: Vec<StageSummary>,
    pub open_value: f64,
    pub weighted_forecast: f64,
    pub won_count: usize,
    pub won_value: f64,
    pub lost_count: usize,
    pub lost_value: f64,
    /// `None` until at least one deal has been closed.
    pub win_rate: Option<f64>,
}

/// Aggregate the store's non-archived deals.
pub fn pipeline_stats(store: &PipelineStore) -> PipelineStats {
    let live: Vec<&Deal> = store.deals().iter().filter(|d| !d.is_archived).collect();

    let stages = store
        .stages()
        .iter()
        .map(|stage| {
            let in_stage = live.iter().filter(|d| d.stage == stage.id);
            let (mut deal_count, mut total_value, mut weighted_value) = (0, 0.0, 0.0);
            for deal in in_stage {
                deal_count += 1;
                total_value += deal.value;
                weighted_value += deal.weighted_value();
            }
            StageSummary {
                stage_id: stage.id.clone(),
                stage_name: stage.name.clone(),
                deal_count,
                total_value,
                weighted_value,
            }
        })
        .collect();

    let open: Vec<&&Deal> = live.iter().filter(|d| d.status.is_none()).collect();
    let won: Vec<&&Deal> = live
        .iter()
        .filter(|d| d.status == Some(DealStatus::Won))
        .collect();
    let lost: Vec<&&Deal> = live
        .iter()
        .filter(|d| d.status == Some(DealStatus::Lost))
        .collect();

    let closed = won.len() + lost.len();
    let win_rate = (closed > 0).then(|| won.len() as f64 / closed as f64);

    PipelineStats {
        stages,
        open_value: open.iter().map(|d| d.value).sum(),
        weighted_forecast: open.iter().map(|d| d.weighted_value()).sum(),
        won_count: won.len(),
        won_value: won.iter().map(|d| d.value).sum(),
        lost_count: lost.len(),
        lost_value: lost.iter().map(|d| d.value).sum(),
        win_rate,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RotLevel {
    Fresh,
    Warning,
    Danger,
}

/// Days without an update before a deal is flagged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RottingThresholds {
    #[serde(default = "default_rotting_enabled")]
    pub enabled: bool,
    #[serde(default = "default_warning_days")]
    pub warning_days: i64,
    #[serde(default = "default_danger_days")]
    pub danger_days: i64,
}

fn default_rotting_enabled() -> bool {
    true
}

fn default_warning_days() -> i64 {
    7
}

fn default_danger_days() -> i64 {
    14
}

impl Default for RottingThresholds {
    fn default() -> Self {
        Self {
            enabled: default_rotting_enabled(),
            warning_days: default_warning_days(),
            danger_days: default_danger_days(),
        }
    }
}

impl RottingThresholds {
    /// Closed deals and disabled thresholds always report `Fresh`.
    pub fn level(&self, deal: &Deal, now: DateTime<Utc>) -> RotLevel {
        if !self.enabled || deal.is_closed() {
            return RotLevel::Fresh;
        }
        let idle = (now - deal.updated_at).num_days();
        if idle >= self.danger_days {
            RotLevel::Danger
        } else if idle >= self.warning_days {
            RotLevel::Warning
        } else {
            RotLevel::Fresh
        }
    }
}

/// Open deals at `Warning` or worse, stalest first.
pub fn rotting_deals<'a>(
    store: &'a PipelineStore,
    thresholds: &RottingThresholds,
    now: DateTime<Utc>,
) -> Vec<(&'a Deal, RotLevel)> {
    let mut flagged: Vec<(&Deal, RotLevel)> = store
        .deals()
        .iter()
        .filter(|d| !d.is_archived)
        .map(|d| (d, thresholds.level(d, now)))
        .filter(|(_, level)| *level != RotLevel::Fresh)
        .collect();
    flagged.sort_by_key(|(d, _)| d.updated_at);
    flagged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::models::{LostReason, PipelineSnapshot, stage_ids};
    use chrono::Duration;

    fn deal(id: &str, stage: &str, value: f64, probability: u8) -> Deal {
        let mut d = Deal::new(id, stage);
        d.id = id.to_string();
        d.value = value;
        d.probability = probability;
        d
    }

    fn store() -> PipelineStore {
        let mut store = PipelineStore::from_snapshot(PipelineSnapshot::default());
        store.add_deal(deal("a", stage_ids::LEAD, 10_000.0, 20));
        store.add_deal(deal("b", stage_ids::PROPOSAL, 50_000.0, 60));
        store.add_deal(deal("c", stage_ids::PROPOSAL, 20_000.0, 50));
        store.add_deal(deal("d", stage_ids::NEGOTIATION, 5_000.0, 80));
        store
    }

    #[test]
    fn test_stage_summaries_and_forecast() {
        let stats = pipeline_stats(&store());
        let proposal = stats
            .stages
            .iter()
            .find(|s| s.stage_id == stage_ids::PROPOSAL)
            .unwrap();
        assert_eq!(proposal.deal_count, 2);
        assert_eq!(proposal.total_value, 70_000.0);
        assert_eq!(proposal.weighted_value, 40_000.0);
        assert_eq!(stats.open_value, 85_000.0);
        assert_eq!(stats.weighted_forecast, 2_000.0 + 30_000.0 + 10_000.0 + 4_000.0);
        assert_eq!(stats.win_rate, None);
    }

    #[test]
    fn test_win_rate_counts_closed_deals() {
        let mut store = store();
        store.mark_as_won("b");
        store.mark_as_won("d");
        store.mark_as_lost("a", LostReason::new("a", "competitor", None));

        let stats = pipeline_stats(&store);
        assert_eq!(stats.won_count, 2);
        assert_eq!(stats.won_value, 55_000.0);
        assert_eq!(stats.lost_count, 1);
        assert_eq!(stats.lost_value, 10_000.0);
        let rate = stats.win_rate.unwrap();
        assert!((rate - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(stats.open_value, 20_000.0);
    }

    #[test]
    fn test_archived_deals_excluded() {
        let mut store = store();
        store.archive_deal("b");
        let stats = pipeline_stats(&store);
        assert_eq!(stats.open_value, 35_000.0);
    }

    #[test]
    fn test_rot_levels_follow_thresholds() {
        let thresholds = RottingThresholds::default();
        let now = Utc::now();
        let mut d = deal("x", stage_ids::LEAD, 1.0, 10);

        d.updated_at = now - Duration::days(3);
        assert_eq!(thresholds.level(&d, now), RotLevel::Fresh);
        d.updated_at = now - Duration::days(7);
        assert_eq!(thresholds.level(&d, now), RotLevel::Warning);
        d.updated_at = now - Duration::days(20);
        assert_eq!(thresholds.level(&d, now), RotLevel::Danger);

        d.status = Some(DealStatus::Won);
        assert_eq!(thresholds.level(&d, now), RotLevel::Fresh);

        let disabled = RottingThresholds {
            enabled: false,
            ..Default::default()
        };
        d.status = None;
        assert_eq!(disabled.level(&d, now), RotLevel::Fresh);
    }

    #[test]
    fn test_rotting_deals_sorted_stalest_first() {
        let now = Utc::now();
        let mut store = PipelineStore::from_snapshot(PipelineSnapshot::default());
        let mut old = deal("old", stage_ids::LEAD, 1.0, 10);
        old.updated_at = now - Duration::days(30);
        let mut mid = deal("mid", stage_ids::LEAD, 1.0, 10);
        mid.updated_at = now - Duration::days(9);
        let fresh = deal("fresh", stage_ids::LEAD, 1.0, 10);
        store.add_deal(mid);
        store.add_deal(fresh);
        store.add_deal(old);

        let flagged = rotting_deals(&store, &RottingThresholds::default(), now);
        let ids: Vec<(&str, RotLevel)> = flagged.iter().map(|(d, l)| (d.id.as_str(), *l)).collect();
        assert_eq!(ids, vec![("old", RotLevel::Danger), ("mid", RotLevel::Warning)]);
    }
}
