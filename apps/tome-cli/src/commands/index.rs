use anyhow::{bail, Result};
use clap::Args;
use tome_core::{index, KnowledgeStore, Settings};

use super::util::print_json;

#[derive(Args)]
pub struct IndexArgs {
    /// Only verify the indexes; exit non-zero when a pointer is missing or dangling
    #[arg(long)]
    check: bool,
    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,
}

pub async fn run(settings: &Settings, args: IndexArgs) -> Result<()> {
    let store = KnowledgeStore::new(&settings.knowledge_dir);
    if !args.check {
        let outcome = index::rebuild(&store).await?;
        return print_json(&outcome, args.pretty);
    }
    let report = index::verify(&store).await?;
    print_json(&report, args.pretty)?;
    if !report.is_consistent() {
        bail!(
            "indexes out of sync: {} dangling, {} missing",
            report.dangling.len(),
            report.missing.len()
        );
    }
    Ok(())
}
