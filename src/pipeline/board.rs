//! Read-only board and list projections for the presentation layer.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::models::{Deal, Stage, stage_ids};
use super::store::PipelineStore;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BoardFilter {
    #[default]
    Active,
    Won,
    Lost,
    All,
}

impl BoardFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Won => "won",
            Self::Lost => "lost",
            Self::All => "all",
        }
    }

    pub fn matches(&self, deal: &Deal) -> bool {
        match self {
            Self::Active => {
                deal.stage != stage_ids::CLOSED_WON && deal.stage != stage_ids::CLOSED_LOST
            }
            Self::Won => deal.stage == stage_ids::CLOSED_WON,
            Self::Lost => deal.stage == stage_ids::CLOSED_LOST,
            Self::All => true,
        }
    }
}

impl FromStr for BoardFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "won" => Ok(Self::Won),
            "lost" => Ok(Self::Lost),
            "all" => Ok(Self::All),
            _ => Err(format!("Invalid board filter: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardView {
    pub filter: BoardFilter,
    pub show_archived: bool,
    pub columns: Vec<ColumnView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnView {
    pub stage: Stage,
    pub deals: Vec<Deal>,
    pub total_value: f64,
}

/// Stages shown on the kanban board: everything except the closed stages.
pub fn active_stages(store: &PipelineStore) -> Vec<&Stage> {
    store.stages().iter().filter(|s| !s.is_terminal()).collect()
}

/// The deal sequence after the board filter and archived toggle, in global order.
pub fn list_view(store: &PipelineStore, filter: BoardFilter, show_archived: bool) -> Vec<&Deal> {
    store
        .deals()
        .iter()
        .filter(|d| show_archived || !d.is_archived)
        .filter(|d| filter.matches(d))
        .collect()
}

/// One column per active stage, each holding the filtered sequence for that stage.
pub fn board_view(store: &PipelineStore, filter: BoardFilter, show_archived: bool) -> BoardView {
    let visible = list_view(store, filter, show_archived);
    let columns = active_stages(store)
        .into_iter()
        .map(|stage| {
            let deals: Vec<Deal> = visible
                .iter()
                .filter(|d| d.stage == stage.id)
                .map(|d| (*d).clone())
                .collect();
            let total_value: f64 = deals.iter().map(|d| d.value).sum();
            ColumnView {
                stage: stage.clone(),
                deals,
                total_value,
            }
        })
        .collect();

    BoardView {
        filter,
        show_archived,
        columns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::models::{LostReason, PipelineSnapshot};

    fn store() -> PipelineStore {
        let mut store = PipelineStore::from_snapshot(PipelineSnapshot::default());
        for (title, stage) in [
            ("Acme renewal", stage_ids::LEAD),
            ("Globex expansion", stage_ids::PROPOSAL),
            ("Initech pilot", stage_ids::LEAD),
            ("Umbrella audit", stage_ids::NEGOTIATION),
        ] {
            let mut deal = Deal::new(title, stage);
            deal.id = title.to_string();
            deal.value = 10_000.0;
            store.add_deal(deal);
        }
        store
    }

    #[test]
    fn test_active_stages_exclude_terminals() {
        let store = store();
        let ids: Vec<&str> = active_stages(&store).iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["lead", "contact-made", "proposal", "negotiation"]);
    }

    #[test]
    fn test_board_columns_follow_sequence_order() {
        let store = store();
        let board = board_view(&store, BoardFilter::Active, false);
        assert_eq!(board.columns.len(), 4);
        let lead: Vec<&str> = board.columns[0].deals.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(lead, vec!["Acme renewal", "Initech pilot"]);
        assert_eq!(board.columns[0].total_value, 20_000.0);
        assert!(board.columns[1].deals.is_empty());
    }

    #[test]
    fn test_archived_deals_hidden_unless_requested() {
        let mut store = store();
        store.archive_deal("Acme renewal");
        assert_eq!(list_view(&store, BoardFilter::All, false).len(), 3);
        assert_eq!(list_view(&store, BoardFilter::All, true).len(), 4);
    }

    #[test]
    fn test_won_and_lost_filters() {
        let mut store = store();
        store.mark_as_won("Globex expansion");
        store.mark_as_lost(
            "Umbrella audit",
            LostReason::new("Umbrella audit", "budget", None),
        );

        let won: Vec<&str> = list_view(&store, BoardFilter::Won, false)
            .iter()
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(won, vec!["Globex expansion"]);
        assert_eq!(list_view(&store, BoardFilter::Lost, false).len(), 1);
        assert_eq!(list_view(&store, BoardFilter::Active, false).len(), 2);
    }

    #[test]
    fn test_board_filter_parses() {
        assert_eq!(BoardFilter::from_str("won"), Ok(BoardFilter::Won));
        assert_eq!(BoardFilter::from_str(BoardFilter::All.as_str()), Ok(BoardFilter::All));
        assert!(BoardFilter::from_str("open").is_err());
    }
}
