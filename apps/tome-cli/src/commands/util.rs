use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tome_core::{CommandReasoner, ReasoningFunction, Settings};

pub fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{out}");
    Ok(())
}

/// The configured external agent, run from the repository root.
pub fn reasoner(settings: &Settings) -> Arc<dyn ReasoningFunction> {
    Arc::new(CommandReasoner::new(
        settings.reasoning.clone(),
        &settings.repo_root,
    ))
}
