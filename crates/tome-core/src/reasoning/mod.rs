//! The reasoning contract.
//!
//! Every judgment call (reconcile, investigate, recheck, apply) goes through
//! [`ReasoningFunction`], which takes instructions plus JSON context and
//! returns JSON. Production uses [`CommandReasoner`]; tests script their own.

mod command;
pub mod prompts;
mod session;
mod types;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

pub use command::{classify_failure, parse_agent_output, CommandReasoner};
pub use session::ReasoningSession;
pub use types::{
    ApplyOutcome, EntryStatus, Investigation, Issue, IssueSeverity, Recheck, ReconcileAction,
    ReconcileVerdict, SectionEdit,
};

use crate::error::ReasoningError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningKind {
    Reconcile,
    Investigate,
    Recheck,
    Apply,
}

impl ReasoningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningKind::Reconcile => "reconcile",
            ReasoningKind::Investigate => "investigate",
            ReasoningKind::Recheck => "recheck",
            ReasoningKind::Apply => "apply",
        }
    }

    /// Tool access granted for this kind of call.
    pub fn tool_access(&self) -> ToolAccess {
        match self {
            ReasoningKind::Reconcile | ReasoningKind::Apply => ToolAccess::None,
            ReasoningKind::Investigate | ReasoningKind::Recheck => ToolAccess::ReadOnlyCodebase,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolAccess {
    /// Work only from the supplied context.
    None,
    /// File read/search plus restricted history inspection.
    ReadOnlyCodebase,
}

impl ToolAccess {
    pub fn allowed_tools(&self) -> &'static [&'static str] {
        match self {
            ToolAccess::None => &[],
            ToolAccess::ReadOnlyCodebase => &[
                "Read",
                "Grep",
                "Glob",
                "Bash(git log:*)",
                "Bash(git show:*)",
                "Bash(git diff:*)",
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReasoningRequest {
    pub kind: ReasoningKind,
    pub instructions: String,
    pub context: Value,
    /// Session to continue, if any.
    pub session_id: Option<String>,
    pub tools: ToolAccess,
}

impl ReasoningRequest {
    pub fn new(kind: ReasoningKind, context: Value) -> Self {
        Self {
            kind,
            instructions: prompts::instructions(kind).to_string(),
            context,
            session_id: None,
            tools: kind.tool_access(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningResponse {
    pub output: Value,
    /// Session the backend wants continued on the next call.
    pub session_id: Option<String>,
}

impl ReasoningResponse {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            session_id: None,
        }
    }
}

#[async_trait]
pub trait ReasoningFunction: Send + Sync {
    async fn call(&self, request: ReasoningRequest) -> Result<ReasoningResponse, ReasoningError>;
}
