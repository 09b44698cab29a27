use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use tome_core::queue::{ReviewItem, ReviewStore};
use tome_core::Settings;

use super::util::print_json;

#[derive(Subcommand)]
pub enum ReviewsCmd {
    /// List reviews awaiting an answer
    List(ListArgs),
    /// Show one review in full
    Show {
        id: String,
    },
    /// Record an answer; `tome apply` carries it out
    Answer {
        id: String,
        answer: String,
    },
}

#[derive(Args)]
pub struct ListArgs {
    /// Include answered and automatic reviews
    #[arg(long)]
    all: bool,
    /// Emit JSON
    #[arg(long)]
    json: bool,
}

fn summary(item: &ReviewItem) -> String {
    let state = if item.is_answered() {
        "answered"
    } else if item.auto_apply {
        "automatic"
    } else {
        "open"
    };
    format!(
        "{}  {:<8} {:<9} {}  ({})",
        item.id,
        serde_json::to_value(item.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default(),
        state,
        item.subject,
        item.knowledge_file
    )
}

pub async fn execute(settings: &Settings, cmd: ReviewsCmd) -> Result<()> {
    let store = ReviewStore::new(settings.reviews_dir());
    match cmd {
        ReviewsCmd::List(args) => {
            let items: Vec<ReviewItem> = store
                .list()
                .await?
                .into_iter()
                .filter(|r| args.all || (!r.is_answered() && !r.auto_apply))
                .collect();
            if args.json {
                return print_json(&items, true);
            }
            if items.is_empty() {
                println!("No reviews awaiting an answer.");
            }
            for item in &items {
                println!("{}", summary(item));
            }
            Ok(())
        }
        ReviewsCmd::Show { id } => {
            let item = store
                .get(&id)
                .await?
                .ok_or_else(|| anyhow!("review {id} not found"))?;
            println!("{}\n", summary(&item));
            println!("{}", item.question);
            for (i, option) in item.options.iter().enumerate() {
                println!("  {}. {option}", i + 1);
            }
            if !item.agent_notes.is_empty() {
                println!("\nNotes:\n{}", item.agent_notes);
            }
            if let Some(answer) = &item.answer {
                println!("\nAnswer: {answer}");
            }
            Ok(())
        }
        ReviewsCmd::Answer { id, answer } => {
            let item = store.answer(&id, &answer).await?;
            println!("Recorded answer for {}; run `tome apply` to carry it out.", item.id);
            Ok(())
        }
    }
}
