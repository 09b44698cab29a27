use anyhow::Result;
use clap::Args;
use tome_core::{Coordinator, Settings};

use super::util::print_json;

#[derive(Args)]
pub struct TriggerArgs {
    /// Emit the full report as JSON instead of the status line
    #[arg(long)]
    json: bool,
}

pub async fn run(settings: &Settings, args: TriggerArgs) -> Result<()> {
    let report = Coordinator::detached(settings)?.trigger().await?;
    if args.json {
        return print_json(&report, false);
    }
    println!("{}", report.status);
    Ok(())
}
