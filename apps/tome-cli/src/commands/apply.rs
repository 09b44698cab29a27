use anyhow::Result;
use clap::{Args, Subcommand};
use tome_core::{Applier, ApplyReport, Settings};

use super::util::{print_json, reasoner};

#[derive(Args)]
pub struct ApplyArgs {
    #[command(subcommand)]
    cmd: Option<ApplyCmd>,
    /// Emit the report as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum ApplyCmd {
    /// Answer a clarification question and resume applying
    Respond {
        /// Review id
        id: String,
        /// Reply to the pending question
        reply: String,
    },
}

fn render(report: &ApplyReport) {
    if report.busy {
        println!("Another apply run is in progress; skipping.");
        return;
    }
    for message in &report.messages {
        println!("{message}");
    }
    if report.skipped > 0 {
        println!("{} review(s) skipped: referenced document no longer exists", report.skipped);
    }
    for c in &report.clarifications {
        println!("? [{}] {}", c.review_id, c.question);
        println!("  reply with: tome apply respond {} \"<answer>\"", c.review_id);
    }
    if report.done {
        println!("All eligible reviews applied.");
    }
}

pub async fn run(settings: &Settings, args: ApplyArgs) -> Result<()> {
    let mut applier = Applier::new(settings, reasoner(settings));
    let report = match args.cmd {
        None => applier.run().await?,
        Some(ApplyCmd::Respond { id, reply }) => applier.respond(&id, &reply).await?,
    };
    if args.json {
        return print_json(&report, true);
    }
    render(&report);
    Ok(())
}
