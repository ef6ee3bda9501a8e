//! Agent Core: the conversation graph and everything it runs on.
//!
//! Submodules:
//! - `orchestrator`: `FormAssistant`, the per-turn graph and its timeout
//! - `router`: intent routing (rules first, then the model)
//! - `predictor`: form prediction, confidence gate and alternative menu
//! - `selection`: resolving the user's answer to the menu
//! - `filler`: field-by-field filling, commands and the confirmation summary
//! - `validation`: per-type answer validation and normalization
//! - `confirmation`: keyword classifiers for yes/no/review replies
//! - `finalize`: response records, completion stats, fallback references
//! - `search` / `report`: querying and tallying submitted responses
//! - `periods`: relative date periods shared by search and reports
//! - `sessions`: session lifecycle, expiry and the cleanup sweeper
//! - `store` / `database`: storage traits and their SQLite implementation
//! - `forms` / `forms_cache`: form catalogue types and the per-user cache
//! - `types`: session, state machine and history types
//! - `errors`: agent-level error types

pub mod confidence;
pub mod confirmation;
pub mod database;
pub mod errors;
pub mod filler;
pub mod finalize;
pub mod forms;
pub mod forms_cache;
pub mod keywords;
pub mod orchestrator;
pub mod periods;
pub mod predictor;
pub mod reply_parser;
pub mod report;
pub mod router;
pub mod search;
pub mod selection;
pub mod sessions;
pub mod store;
pub mod types;
pub mod validation;

// Re-exports for convenience
pub use database::AssistantDatabase;
pub use errors::AgentError;
pub use forms::{AvailableForm, FieldType, FormContext, FormField, FormTemplate};
pub use forms_cache::FormsCache;
pub use orchestrator::{FormAssistant, TurnReply, TurnState};
pub use router::Intent;
pub use sessions::{SessionManager, SessionStats};
pub use store::{FormRepository, InMemorySessionStore, SessionStore};
pub use types::{FieldAnswer, NodeKind, Session, SessionState, Speaker};
