use anyhow::Result;
use clap::Args;
use tome_core::Settings;

use super::util::print_json;

#[derive(Args)]
pub struct PathsArgs {
    /// Pretty-print JSON
    #[arg(long)]
    pub pretty: bool,
}

pub fn run(settings: &Settings, args: PathsArgs) -> Result<()> {
    print_json(&settings.describe(), args.pretty)
}
