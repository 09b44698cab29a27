use anyhow::Result;
use clap::Args;
use tome_core::{Auditor, GitRevisionProbe, RevisionProbe, Settings};

use super::util::{print_json, reasoner};

#[derive(Args)]
pub struct AuditArgs {
    /// Sweep even if this revision was already audited
    #[arg(long)]
    force: bool,
    /// Revision to record instead of `git rev-parse HEAD`
    #[arg(long)]
    revision: Option<String>,
    /// Pretty-print the sweep outcome
    #[arg(long)]
    pretty: bool,
}

pub async fn run(settings: &Settings, args: AuditArgs) -> Result<()> {
    let revision = match args.revision {
        Some(rev) => rev,
        None => {
            GitRevisionProbe::new(&settings.repo_root)
                .current_revision()
                .await?
        }
    };
    let auditor = Auditor::new(settings, reasoner(settings));
    let outcome = auditor
        .sweep(&revision, args.force || settings.audit_force)
        .await?;
    print_json(&outcome, args.pretty)
}
