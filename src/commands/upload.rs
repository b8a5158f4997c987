//! Upload command — copy a local directory into the data volume through
//! the transfer worker.
//!
//! The directory is validated before any cluster interaction; a missing
//! argument or nonexistent directory is a usage error, not a cluster error.

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::{Error, Result};

use super::CommandContext;

/// Upload a local directory into the data volume
#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Local directory whose files are copied into the volume
    pub dir: PathBuf,
}

pub async fn run(args: UploadArgs) -> Result<()> {
    if !args.dir.is_dir() {
        return Err(Error::usage(format!(
            "{} does not exist or is not a directory",
            args.dir.display()
        )));
    }

    let ctx = CommandContext::from_env().await?;
    let worker = ctx.worker();
    worker.ensure_ready().await?;

    let result = worker.upload(&args.dir).await;
    worker.teardown().await;
    let stats = result?;

    info!(files = stats.files, bytes = stats.bytes, pvc = %ctx.settings.pvc, "upload finished");
    println!(
        "uploaded {} files ({} bytes) from {} to claim {}",
        stats.files,
        stats.bytes,
        args.dir.display(),
        ctx.settings.pvc
    );
    Ok(())
}
