//! bucketferry command-line runner.
//!
//! Usage: `bucketferry <payload.json|->`. Reads a batch payload, transfers
//! every listed URL into the filesystem store, and prints the JSON response.

mod config;

use std::io::Read;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use bucketferry_fs_store::FsObjectStore;
use bucketferry_http_source::HttpSource;
use bucketferry_protocol::{BatchResponse, TransferBatchRequest};
use bucketferry_transfer::{TransferBatchCoordinator, TransferEvent, TransferRequest};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr; stdout carries the response.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Some(input) = std::env::args().nth(1) else {
        eprintln!("usage: bucketferry <payload.json|->");
        return Ok(ExitCode::from(2));
    };

    let config = config::Config::load()?;
    tracing::info!(store_root = %config.store_root, "configuration loaded");

    let payload = read_payload(&input)?;
    let batch = TransferBatchRequest::from_slice(&payload).context("invalid batch payload")?;

    let rt = tokio::runtime::Runtime::new()?;
    let response = rt.block_on(run(config, batch))?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn read_payload(input: &str) -> anyhow::Result<Vec<u8>> {
    if input == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read(input).with_context(|| format!("failed to read {input}"))
    }
}

async fn run(config: config::Config, batch: TransferBatchRequest) -> anyhow::Result<BatchResponse> {
    let source = HttpSource::new(&config.http())?;
    let store = FsObjectStore::open(&config.store_root)
        .await
        .with_context(|| format!("failed to open store at {}", config.store_root))?;

    let mut coordinator =
        TransferBatchCoordinator::new(Arc::new(source), Arc::new(store), config.transfer);

    if let Some(mut events) = coordinator.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                log_event(&event);
            }
        });
    }

    let cancel = coordinator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling batch");
            cancel.cancel();
        }
    });

    let requests: Vec<TransferRequest> = batch.urls.into_iter().map(Into::into).collect();
    let report = coordinator.run(requests).await;
    Ok(report.result.into())
}

fn log_event(event: &TransferEvent) {
    match event {
        TransferEvent::PartUploaded { .. } => {
            if let Some(progress) = event.progress() {
                tracing::debug!(
                    destination = %event.destination(),
                    percent = progress * 100.0,
                    "progress"
                );
            }
        }
        TransferEvent::Started { .. }
        | TransferEvent::Completed { .. }
        | TransferEvent::Failed { .. } => {}
    }
}
