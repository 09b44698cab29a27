use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

use super::util::print_json;

#[derive(Subcommand)]
pub enum ConfigCmd {
    /// Print the config file JSON schema
    Schema(SchemaArgs),
    /// Validate a config file against the schema
    Check(CheckArgs),
}

#[derive(Args)]
pub struct SchemaArgs {
    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Path to the TOML config file
    path: PathBuf,
}

pub fn execute(cmd: ConfigCmd) -> Result<()> {
    match cmd {
        ConfigCmd::Schema(args) => print_json(&tome_core::config_schema_json(), args.pretty),
        ConfigCmd::Check(args) => {
            tome_core::load_config(&args.path)?;
            println!("{} is valid", args.path.display());
            Ok(())
        }
    }
}
