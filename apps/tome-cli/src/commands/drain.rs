use anyhow::Result;
use clap::Args;
use tome_core::{Reconciler, Settings};

use super::util::{print_json, reasoner};

#[derive(Args)]
pub struct DrainArgs {
    /// Pretty-print the drain report
    #[arg(long)]
    pretty: bool,
}

pub async fn run(settings: &Settings, args: DrainArgs) -> Result<()> {
    let mut reconciler = Reconciler::new(settings, reasoner(settings));
    let report = reconciler.drain().await?;
    print_json(&report, args.pretty)
}
