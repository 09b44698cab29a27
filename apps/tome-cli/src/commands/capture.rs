use std::io::Read;

use anyhow::{bail, Context, Result};
use clap::Args;
use tome_core::{CaptureRequest, Coordinator, Settings};

#[derive(Args)]
pub struct CaptureArgs {
    /// Knowledge category (architecture, conventions, gotchas, patterns, testing, ...)
    #[arg(long, required_unless_present = "stdin")]
    category: Option<String>,
    /// Short topic used as the section title
    #[arg(long, required_unless_present = "stdin")]
    topic: Option<String>,
    /// The fact itself
    #[arg(long, required_unless_present = "stdin")]
    details: Option<String>,
    /// Related file (repeatable)
    #[arg(long = "file")]
    files: Vec<String>,
    /// Read a JSON capture request from stdin instead of flags
    #[arg(long, conflicts_with_all = ["category", "topic", "details", "files"])]
    stdin: bool,
}

impl CaptureArgs {
    fn request(self) -> Result<CaptureRequest> {
        if self.stdin {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("read capture request from stdin")?;
            if raw.trim().is_empty() {
                bail!("no capture request on stdin");
            }
            return serde_json::from_str(&raw).context("parse capture request");
        }
        Ok(CaptureRequest {
            category: self.category.unwrap_or_default(),
            topic: self.topic.unwrap_or_default(),
            details: self.details.unwrap_or_default(),
            files: self.files,
        })
    }
}

pub async fn run(settings: &Settings, args: CaptureArgs) -> Result<()> {
    let request = args.request()?;
    let coordinator = Coordinator::detached(settings)?;
    let ack = coordinator.capture(&request).await?;
    println!("{ack}");
    Ok(())
}
