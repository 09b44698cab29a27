//! Instruction text for each kind of reasoning call.

use serde_json::Value;

use super::{ReasoningKind, ReasoningRequest};

pub const RECONCILE: &str = r#"You maintain a project knowledge base made of markdown documents grouped by category.
A new fact was captured. Compare it with the current knowledge base in `knowledge` and decide:
- "duplicate": the fact is already recorded (same meaning, even if worded differently).
- "new": the fact belongs in a new document.
- "update": the fact extends or refines an existing document; set `target_file` to it.
- "conflict": the fact contradicts an existing document; set `target_file`, write a
  self-contained `question` for a human, give `options`, and put implementation detail
  in `agent_notes`. Do not repeat the options inside the question.
For "new" and "update" you may improve `category`, `topic`, and `content` (the section body).
Always set `ready_for_next: true` once your decision is final.
Respond with JSON only:
{"action": "duplicate|new|update|conflict", "category": "...", "topic": "...", "content": "...",
 "target_file": "...", "question": "...", "options": ["..."], "agent_notes": "...",
 "reason": "...", "ready_for_next": true}"#;

pub const INVESTIGATE: &str = r#"You audit one entry of a project knowledge base against the current codebase.
Use the read-only tools to check whether the entry in `entry` is still accurate.
Classify it as "valid", "stale" (no longer true), "conflict" (contradicts the code or
another entry), or "outdated" (partially true, needs refreshing).
If there is a problem, describe it in `issue`:
- severity "auto_fix" when the correction is unambiguous; put the corrected section body
  in `replacement`.
- severity "needs_review" when a human must decide; write a self-contained `question`
  (never list the options inside it), `options`, and `agent_notes` with the technical
  detail whoever applies the fix will need.
Respond with JSON only:
{"status": "valid|stale|conflict|outdated", "issue": {"severity": "auto_fix|needs_review",
 "summary": "...", "replacement": "...", "question": "...", "options": ["..."],
 "agent_notes": "..."}}"#;

pub const RECHECK: &str = r#"A question about the knowledge base is waiting for a human answer (see `review`).
Using the read-only tools and the current document in `document`, decide whether the
underlying issue still exists. If the codebase or the knowledge base has since changed
so that the question is moot, answer false.
Respond with JSON only: {"still_relevant": true|false, "reason": "..."}"#;

pub const APPLY: &str = r#"Apply a recorded decision to one knowledge document.
`review` holds the question, the options, the human `answer` (or, when `auto_apply` is set,
the automatic fix described in `agent_notes`), and any earlier clarification exchange.
`document` holds the current document with its section titles.
Make the smallest change that carries out the decision. Never rewrite the whole document.
Allowed edits, addressed by exact section title:
  {"op": "delete", "section": "..."}
  {"op": "replace", "section": "...", "content": "new section body"}
  {"op": "retitle", "section": "...", "title": "..."}
  {"op": "keep"}
If the answer is ambiguous, make no edits and ask one short question in `clarification`.
Respond with JSON only: {"edits": [...], "message": "...", "clarification": null}"#;

pub fn instructions(kind: ReasoningKind) -> &'static str {
    match kind {
        ReasoningKind::Reconcile => RECONCILE,
        ReasoningKind::Investigate => INVESTIGATE,
        ReasoningKind::Recheck => RECHECK,
        ReasoningKind::Apply => APPLY,
    }
}

/// Full prompt text sent to an external agent.
pub fn render(request: &ReasoningRequest) -> String {
    let context = match &request.context {
        Value::Null => String::from("{}"),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    format!(
        "{}\n\n<context kind=\"{}\">\n{}\n</context>\n",
        request.instructions.trim_end(),
        request.kind.as_str(),
        context
    )
}
