//! dealflow: a sales pipeline store with a kanban board, won/lost lifecycle,
//! audit trail and pluggable persistence.
//!
//! | Module      | Responsibility                                             |
//! |-------------|------------------------------------------------------------|
//! | `pipeline`  | Deals, stages, notes, lost reasons and the move algorithm  |
//! | `audit`     | Append-only audit trail and activity feed                  |
//! | `persist`   | Versioned key/value persistence (json, sqlite, memory)     |
//! | `workspace` | Validated commands over the store, change events           |
//! | `config`    | `dealflow.toml` loading and env/CLI layering               |
//! | `init`      | `.dealflow/` project scaffolding                           |
//! | `server`    | axum REST API and WebSocket change feed                    |
//! | `errors`    | Error types shared by the modules above                    |

pub mod audit;
pub mod config;
pub mod errors;
pub mod init;
pub mod persist;
pub mod pipeline;
pub mod server;
pub mod workspace;
