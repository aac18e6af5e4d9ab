use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::audit::Activity;
use crate::pipeline::{Deal, Note, Stage};

/// Capacity of the change-event channel. Slow subscribers skip ahead.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Emitted after every mutation that changed the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ChangeEvent {
    DealCreated {
        deal: Deal,
    },
    DealUpdated {
        deal: Deal,
    },
    DealMoved {
        deal: Deal,
        from_stage: String,
        to_stage: String,
    },
    DealWon {
        deal: Deal,
    },
    DealLost {
        deal: Deal,
        reason: String,
    },
    DealReopened {
        deal: Deal,
    },
    DealArchived {
        deal: Deal,
    },
    DealUnarchived {
        deal: Deal,
    },
    DealDeleted {
        deal_id: String,
    },
    StageAdded {
        stage: Stage,
    },
    StageRenamed {
        stage: Stage,
    },
    StageDeleted {
        stage_id: String,
        reassigned_to: Option<String>,
        deals_moved: usize,
    },
    NoteAdded {
        note: Note,
    },
    NoteUpdated {
        note: Note,
    },
    NoteDeleted {
        note_id: String,
        deal_id: String,
    },
    ActivityLogged {
        activity: Activity,
    },
}

impl ChangeEvent {
    /// The `type` tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DealCreated { .. } => "DealCreated",
            Self::DealUpdated { .. } => "DealUpdated",
            Self::DealMoved { .. } => "DealMoved",
            Self::DealWon { .. } => "DealWon",
            Self::DealLost { .. } => "DealLost",
            Self::DealReopened { .. } => "DealReopened",
            Self::DealArchived { .. } => "DealArchived",
            Self::DealUnarchived { .. } => "DealUnarchived",
            Self::DealDeleted { .. } => "DealDeleted",
            Self::StageAdded { .. } => "StageAdded",
            Self::StageRenamed { .. } => "StageRenamed",
            Self::StageDeleted { .. } => "StageDeleted",
            Self::NoteAdded { .. } => "NoteAdded",
            Self::NoteUpdated { .. } => "NoteUpdated",
            Self::NoteDeleted { .. } => "NoteDeleted",
            Self::ActivityLogged { .. } => "ActivityLogged",
        }
    }
}

/// Send to all subscribers. Having none is not an error.
pub fn publish(tx: &broadcast::Sender<ChangeEvent>, event: ChangeEvent) {
    let kind = event.kind();
    match tx.send(event) {
        Ok(receivers) => trace!(kind, receivers, "published change event"),
        Err(_) => trace!(kind, "no subscribers for change event"),
    }
}
