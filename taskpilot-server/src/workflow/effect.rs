//! Effects (side effects as data).
//!
//! A transition describes what should happen outside the database once it has
//! been committed. The interpreter executes these against the project board
//! and the notifier; none of them can undo a commit.

use serde::{Deserialize, Serialize};
use taskpilot_core::WorkItemStatus;

use crate::notify::Channel;
use crate::project::CommentTarget;

/// All effects that can be produced by transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Write the item's status to the project board.
    MirrorStatus { status: WorkItemStatus },

    /// Post a comment on the item's issue or pull request.
    PostComment { target: CommentTarget, body: String },

    /// Send a chat notification.
    Notify { channel: Channel, message: String },

    /// Log a message.
    Log { level: LogLevel, message: String },
}

/// Log level for logging effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}
