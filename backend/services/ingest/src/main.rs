mod batch;
mod connector;
mod record;
mod source;
mod sync;
#[cfg(test)]
mod test_support;
mod transfer;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use docsync_common::error::{DocsyncError, DocsyncResult};
use docsync_config::{init_tracing, AppConfig};
use docsync_db::content::pg_repository::PgContentRepository;
use docsync_db::sync::pg_repository::PgWatermarkStore;

use crate::connector::{Connector, SyncReport};
use crate::source::client::{SourceClient, SourceClientConfig};
use crate::source::SourceSession;
use crate::sync::{ContentDocumentLinkStream, ContentVersionStream, SyncOptions, SyncOrchestrator};
use crate::transfer::storage::BlobStorage;
use crate::transfer::AttachmentTransfer;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing("info");

    tracing::info!(service = "docsync-ingest", "starting");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration error (fail-fast)");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(true) => {
            tracing::info!("ingest service finished");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            tracing::error!("ingest service finished with failed streams");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "ingest service aborted");
            ExitCode::FAILURE
        }
    }
}

/// Run both streams once. Returns `false` when any stream aborted.
async fn run(config: AppConfig) -> DocsyncResult<bool> {
    let pool =
        docsync_db::create_pool(&config.database_url, Duration::from_secs(config.db_timeout_secs))
            .await?;

    let session = SourceSession {
        instance_url: config.source.instance_url.clone(),
        access_token: config.source.access_token.clone(),
    };
    let client = SourceClient::new(session.clone(), SourceClientConfig::from_settings(&config.source))
        .map_err(|e| DocsyncError::Internal(format!("failed to create source client: {e}")))?;
    let client = Arc::new(client);
    let options = SyncOptions::from_config(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("shutdown requested, finishing current batches");
            let _ = shutdown_tx.send(true);
        }
    });

    let links = SyncOrchestrator::new(
        client.clone(),
        PgContentRepository::new(pool.clone()),
        PgWatermarkStore::new(pool.clone()),
        ContentDocumentLinkStream,
        options.clone(),
    )
    .with_shutdown(shutdown_rx.clone());

    let versions = match &config.storage {
        Some(settings) => {
            let transfer_timeout = Duration::from_secs(config.transfer_timeout_secs);
            let storage = BlobStorage::from_settings(settings, config.upload_chunk_bytes)?
                .with_request_timeout(transfer_timeout);
            tracing::info!(container = storage.container(), "attachment storage configured");
            let transfer = AttachmentTransfer::new(session, storage, transfer_timeout);
            Some(
                SyncOrchestrator::new(
                    client.clone(),
                    PgContentRepository::new(pool.clone()),
                    PgWatermarkStore::new(pool.clone()),
                    ContentVersionStream,
                    options,
                )
                .with_transfer(Arc::new(transfer))
                .with_shutdown(shutdown_rx),
            )
        }
        None => {
            tracing::warn!("no attachment storage configured, skipping ContentVersionSync");
            None
        }
    };

    let version_run = async {
        match &versions {
            Some(orchestrator) => Some((orchestrator.stream_name(), orchestrator.sync().await)),
            None => None,
        }
    };
    let (link_result, version_result) = tokio::join!(links.sync(), version_run);

    let mut all_ok = log_result(links.stream_name(), link_result);
    if let Some((stream, result)) = version_result {
        all_ok &= log_result(stream, result);
    }

    pool.close().await;
    Ok(all_ok)
}

fn log_result(stream: &str, result: DocsyncResult<SyncReport>) -> bool {
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(stream, error = %e, fatal = e.is_fatal(), "sync run aborted, no result");
            return false;
        }
    };

    for warning in &report.warnings {
        tracing::warn!(stream, warning = %warning, "configuration warning");
    }
    for processed in report.records.iter().filter(|r| !r.sink_status.is_success()) {
        tracing::debug!(
            stream,
            record_id = processed.record.id().unwrap_or_default(),
            status = %processed.sink_status,
            transfer_error = processed.transfer_error.as_deref(),
            processing_error = processed.processing_error.as_deref(),
            "record not synced"
        );
    }

    let counters = &report.counters;
    tracing::info!(
        stream = %report.stream,
        run_id = %report.run_id,
        resumed_from = %report.resumed_from,
        records_seen = counters.records_seen,
        transfers_succeeded = counters.transfers_succeeded,
        rows_upserted = counters.rows_upserted,
        batches_failed = counters.batches_failed,
        batches_skipped = counters.batches_skipped,
        stale_watermarks = counters.stale_watermarks,
        cancelled = report.cancelled,
        "sync completed"
    );
    true
}
