//! Deal pipeline: the store behind the kanban board.
//!
//! ## Overview
//!
//! Deals move through an ordered list of stages. Two stages are reserved
//! and terminal (`closed-won`, `closed-lost`); everything else is the active
//! pipeline shown on the board. Column order is not stored per stage: it is
//! the single global deal sequence filtered by each deal's `stage`.
//!
//! ## Module Map
//!
//! | Module   | Responsibility                                             |
//! |----------|------------------------------------------------------------|
//! | `models` | `Deal`, `Stage`, `Note`, `LostReason`, snapshot + patch    |
//! | `store`  | `PipelineStore`: CRUD, move/reorder, win/lose/reopen       |
//! | `board`  | Kanban/list projections, active/won/lost/all filters       |
//! | `stats`  | Per-stage value, weighted forecast, win rate, rotting      |
//!
//! ## Lifecycle
//!
//! ```text
//!            mark_as_won              mark_as_lost
//!   won  <──────────────  active  ──────────────>  lost
//!        ──────────────>          <──────────────
//!          reopen_deal              reopen_deal
//! ```

pub mod board;
pub mod models;
pub mod stats;
pub mod store;

pub use models::{
    CustomField, Deal, DealPatch, DealStatus, DeletePolicy, LostReason, Note, PipelineSnapshot,
    Stage, stage_ids,
};
pub use store::PipelineStore;
