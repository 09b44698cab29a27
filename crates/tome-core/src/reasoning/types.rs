use serde::{Deserialize, Serialize};

use crate::queue::ReviewKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    Duplicate,
    New,
    Update,
    Conflict,
}

impl ReconcileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileAction::Duplicate => "duplicate",
            ReconcileAction::New => "new",
            ReconcileAction::Update => "update",
            ReconcileAction::Conflict => "conflict",
        }
    }
}

/// Decision for one intake item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileVerdict {
    pub action: ReconcileAction,
    /// Overrides for where and what to write; the intake item fills the gaps.
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    /// Existing document the item duplicates, updates, or conflicts with.
    #[serde(default)]
    pub target_file: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub agent_notes: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub ready_for_next: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Valid,
    Stale,
    Conflict,
    Outdated,
}

impl EntryStatus {
    pub fn review_kind(self) -> ReviewKind {
        match self {
            EntryStatus::Stale => ReviewKind::Stale,
            EntryStatus::Conflict => ReviewKind::Conflict,
            EntryStatus::Valid | EntryStatus::Outdated => ReviewKind::Outdated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    AutoFix,
    NeedsReview,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: IssueSeverity,
    #[serde(default)]
    pub summary: String,
    /// Ready-made section body for `auto_fix` issues.
    #[serde(default)]
    pub replacement: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub agent_notes: String,
}

/// Verdict on one entry checked against the codebase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Investigation {
    pub status: EntryStatus,
    #[serde(default)]
    pub issue: Option<Issue>,
}

impl Investigation {
    pub fn valid() -> Self {
        Self {
            status: EntryStatus::Valid,
            issue: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recheck {
    pub still_relevant: bool,
    #[serde(default)]
    pub reason: String,
}

/// A minimal, targeted change to one section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SectionEdit {
    Delete {
        section: String,
    },
    Replace {
        section: String,
        content: String,
    },
    Retitle {
        section: String,
        title: String,
    },
    Keep {
        #[serde(default)]
        section: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    #[serde(default)]
    pub edits: Vec<SectionEdit>,
    #[serde(default)]
    pub message: String,
    /// Set when the recorded answer is ambiguous; the item waits for a reply.
    #[serde(default)]
    pub clarification: Option<String>,
}
