//! Runs one upload end to end.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use glacierup_upload::{ArchiveUploader, UploadEvent, UploadOutcome};
use glacierup_vault_client::VaultClient;
use tracing::{info, warn};

use crate::config::Config;

/// Positional arguments: `<vault> <description> <file>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    pub vault: String,
    pub description: String,
    pub file: PathBuf,
}

impl Args {
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<Self> {
        let mut args = args.into_iter();
        let (Some(vault), Some(description), Some(file), None) =
            (args.next(), args.next(), args.next(), args.next())
        else {
            anyhow::bail!("usage: glacierup <vault> <description> <file>");
        };
        Ok(Self {
            vault,
            description,
            file: PathBuf::from(file),
        })
    }
}

pub async fn run(config: Config, args: Args) -> anyhow::Result<UploadOutcome> {
    let client = VaultClient::new(&config.client_config()).context("building vault client")?;
    let mut uploader = ArchiveUploader::new(Arc::new(client), config.upload_options());

    if let Some(mut events) = uploader.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                log_event(&event);
            }
        });
    }

    let cancel = uploader.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling upload");
            cancel.cancel();
        }
    });

    let outcome = uploader
        .upload_file(&args.file, &args.vault, &args.description)
        .await
        .with_context(|| format!("uploading {}", args.file.display()))?;

    if !outcome.checksum_matched {
        warn!(
            archive_id = %outcome.archive_id,
            local = %outcome.local_checksum,
            server = %outcome.server_checksum,
            "archive stored but checksum does not match; do not delete the local copy"
        );
    }
    Ok(outcome)
}

fn log_event(event: &UploadEvent) {
    match event {
        UploadEvent::Initiated {
            session_id,
            total_parts,
        } => info!(session_id = %session_id, total_parts, "session initiated"),
        UploadEvent::PartCompleted { index, .. } if is_part_failure(event) => {
            warn!(part = index, "part failed");
        }
        UploadEvent::Verifying => info!("verifying archive checksum"),
        _ => {}
    }
}

/// A part the service failed, as opposed to one stopped by the abort.
fn is_part_failure(event: &UploadEvent) -> bool {
    matches!(
        event,
        UploadEvent::PartCompleted {
            success: false,
            cancelled: false,
            ..
        }
    )
}
