//! The work item state machine and everything that drives it.
//!
//! The design separates pure logic from side effects:
//! - `transition`: pure functions deciding what an operation does
//! - `effect`: the side effects a committed transition asks for
//! - `interpreter`: executes effects against the board and the notifier
//! - `repository`: atomic, version-checked persistence
//! - `service`: loads, decides, commits, then interprets
//! - `history`: replays the transition log

pub mod effect;
pub mod error;
pub mod history;
pub mod interpreter;
pub mod repository;
pub mod service;
pub mod transition;

pub use effect::{Effect, LogLevel};
pub use error::WorkflowError;
pub use interpreter::{ExternalSync, Interpreter};
pub use repository::{
    CommitOutcome, InMemoryRepository, ItemCommit, RepositoryError, SqliteRepository,
    WorkflowRepository,
};
pub use service::{
    AnsweredClarification, AppliedTransition, NewItem, ServiceSettings, StageOutcome, StageRun,
    WorkflowService,
};
