//! Download command — copy the data volume's files into a local directory
//! through the transfer worker.

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::Result;

use super::CommandContext;

/// Download the data volume into a local directory
#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Local directory to copy files into (created if missing)
    pub dir: PathBuf,
}

pub async fn run(args: DownloadArgs) -> Result<()> {
    let ctx = CommandContext::from_env().await?;
    let worker = ctx.worker();
    worker.ensure_ready().await?;

    let result = worker.download(&args.dir).await;
    worker.teardown().await;
    let stats = result?;

    info!(files = stats.files, bytes = stats.bytes, pvc = %ctx.settings.pvc, "download finished");
    println!(
        "downloaded {} files ({} bytes) from claim {} to {}",
        stats.files,
        stats.bytes,
        ctx.settings.pvc,
        args.dir.display()
    );
    Ok(())
}
