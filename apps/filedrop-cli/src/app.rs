//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use filedrop_transfer::{ByteSource, FileSource, HashCalculator, PlanConfig, format_size, plan};
use filedrop_uploader::{HttpSession, UploadOutcome, UploadRequest, start_upload};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Command;
use crate::config::Config;
use crate::output;

/// Exit code after an interrupt (128 + SIGINT).
const EXIT_INTERRUPTED: i32 = 130;

/// Runs one subcommand and returns the process exit code.
pub async fn run(command: Command, config: Config) -> anyhow::Result<i32> {
    match command {
        Command::Upload {
            path,
            biz_type,
            biz_id,
            server,
            token,
            concurrency,
            chunk_size,
            json,
        } => {
            let mut upload_config = config.upload_config();
            if let Some(concurrency) = concurrency {
                upload_config.concurrency_limit = concurrency;
            }
            if let Some(chunk_size) = chunk_size {
                upload_config.chunk_size = chunk_size;
            }

            let server = server.unwrap_or_else(|| config.server.clone());
            let token = token.or_else(|| config.token.clone());
            let session = HttpSession::new(server, token.as_deref())?;

            let request = UploadRequest::new(biz_type.unwrap_or_else(|| config.biz_type.clone()))
                .with_biz_id(biz_id);
            upload(&path, session, request, upload_config, json).await
        }
        Command::Hash { path } => hash(&path).await,
        Command::Plan { path, chunk_size } => {
            let config = PlanConfig {
                chunk_threshold: config.chunk_threshold,
                chunk_size: chunk_size.unwrap_or(config.chunk_size),
            };
            show_plan(&path, config).await
        }
    }
}

/// Cancels `cancel` on Ctrl-C.
fn cancel_on_interrupt(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; aborting");
            cancel.cancel();
        }
    })
}

async fn upload(
    path: &Path,
    session: HttpSession,
    request: UploadRequest,
    config: filedrop_uploader::UploadConfig,
    json: bool,
) -> anyhow::Result<i32> {
    let source = FileSource::open(path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;
    info!(
        file = %source.name(),
        size = %format_size(source.size()),
        server = %session.base_url(),
        "uploading"
    );

    let mut handle = start_upload(Arc::new(source), Arc::new(session), request, config)?;
    let interrupt = cancel_on_interrupt(handle.cancel_token());

    let printer = handle.progress().map(|mut events| {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if json {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!(error = %e, "cannot encode progress event"),
                    }
                } else {
                    eprintln!("{}", output::format_progress(&event));
                }
            }
        })
    });

    let outcome = handle.result().await;
    interrupt.abort();
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    match outcome? {
        UploadOutcome::Completed(file) => {
            println!("{}", file.access_url);
            Ok(0)
        }
        UploadOutcome::Cancelled => {
            eprintln!("upload cancelled");
            Ok(EXIT_INTERRUPTED)
        }
    }
}

async fn hash(path: &Path) -> anyhow::Result<i32> {
    let source = FileSource::open(path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;

    let cancel = CancellationToken::new();
    let interrupt = cancel_on_interrupt(cancel.clone());
    let result = HashCalculator::default()
        .compute(&source, &cancel, |_, _| {})
        .await;
    interrupt.abort();

    match result {
        Ok(digest) => {
            println!("{digest}  {}", source.name());
            Ok(0)
        }
        Err(filedrop_transfer::TransferError::Cancelled) => Ok(EXIT_INTERRUPTED),
        Err(e) => Err(e.into()),
    }
}

async fn show_plan(path: &Path, config: PlanConfig) -> anyhow::Result<i32> {
    anyhow::ensure!(config.chunk_size > 0, "chunk size must be non-zero");
    let source = FileSource::open(path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;

    let plan = plan(source.size(), &config);
    for line in output::describe_plan(source.name(), &plan) {
        println!("{line}");
    }
    Ok(0)
}
