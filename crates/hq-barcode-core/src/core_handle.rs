//! Process lifecycle: `init(config) -> CoreHandle`, `shutdown(handle)`.
//!
//! `CoreHandle` is the single top-level struct that owns every long-lived
//! collaborator (source DB pool, tracking store, retrieval orchestrator,
//! scheduler, telemetry) and is torn down explicitly in `shutdown` rather
//! than relying on `Drop` order.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::asyncdb::AsyncDbWrapper;
use crate::config::{Config, RuntimeSettings};
use crate::error::Result;
use crate::filemanager::FileManager;
use crate::render::PdfRenderer;
use crate::retrieval::{RetrievalOrchestrator, SoapClient, WebScrapeClient};
use crate::scheduler::Scheduler;
use crate::sourcedb::{PooledSourceDb, SharedSourceDb};
use crate::telemetry::Telemetry;
use crate::tracking::TrackingStore;

/// Every long-lived resource the core owns for one process lifetime.
///
/// Holding this struct is the only way to reach the retrieval pipeline;
/// there is no module-level singleton.
pub struct CoreHandle {
    pub config: Config,
    pub settings: Arc<RuntimeSettings>,
    pub source_db: SharedSourceDb,
    pub tracking: Arc<TrackingStore>,
    pub orchestrator: Arc<RetrievalOrchestrator>,
    pub files: FileManager,
    pub async_db: AsyncDbWrapper,
    pub telemetry: Arc<Telemetry>,
    pub scheduler: Arc<Scheduler>,
    tracking_db_path: PathBuf,
}

/// Builds every collaborator from `config` and wires them into one handle.
///
/// `source_db_path` and `tracking_db_path` are accepted separately from
/// `config` because the source database location is an operational detail
/// (connection string/DSN) the typed `Config` in §6.5 does not model.
pub fn init(config: Config, source_db_path: &str, tracking_db_path: impl Into<PathBuf>) -> Result<CoreHandle> {
    let tracking_db_path = tracking_db_path.into();
    info!(output_directory = %config.app.output_directory.display(), "initializing core");

    let settings = Arc::new(RuntimeSettings::new(&config));

    let source_db: SharedSourceDb = Arc::new(PooledSourceDb::open(
        source_db_path,
        config.source_db.timeout_seconds,
    )?);

    let tracking = Arc::new(TrackingStore::open(&tracking_db_path)?);

    let soap = SoapClient::new(
        &config.service.api_url,
        config.service.api_timeout_s,
        config.service.session_reuse,
    )?;
    let web = WebScrapeClient::new(config.service.web_timeout_s)?;
    let renderer = PdfRenderer::new();

    let orchestrator = Arc::new(RetrievalOrchestrator::new(
        Box::new(soap),
        Box::new(web),
        Box::new(renderer),
        config.service.retrieval_method,
        config.service.primary_web_url.clone(),
        config.service.backup_web_url.clone(),
        config.service.max_retries,
        config.service.retry_delay_s as f64,
    ));

    let files = FileManager::new(config.app.output_directory.clone());
    let telemetry = Arc::new(Telemetry::new());
    let async_db = AsyncDbWrapper::default();

    let scheduler = Arc::new(Scheduler::new(
        source_db.clone(),
        tracking.clone(),
        orchestrator.clone(),
        FileManager::new(config.app.output_directory.clone()),
        telemetry.clone(),
        settings.clone(),
        &config.app,
        config.service.pdf_naming_format,
        config.service.max_retries,
        config.service.retry_delay_s as f64,
    ));

    Ok(CoreHandle {
        config,
        settings,
        source_db,
        tracking,
        orchestrator,
        files,
        async_db,
        telemetry,
        scheduler,
        tracking_db_path,
    })
}

/// Tears down every background resource: stops the scheduler's
/// polling worker with a bounded wait, drains the async DB wrapper's
/// in-flight work, closes the source DB connector's thread-local
/// connection for the calling thread, and persists telemetry best-effort.
/// No background threads remain once this returns.
///
/// HTTP sessions (`reqwest::Client`) and browser sessions (launched and
/// closed per retrieval attempt in `retrieval::browser`) hold no handle
/// here to close explicitly — they are reference-counted or already
/// scoped to a single call, so dropping `handle` releases them.
pub async fn shutdown(handle: CoreHandle) {
    info!("shutting down core");
    handle.scheduler.stop().await;
    handle.source_db.close_current_thread();
    handle.async_db.clone().shutdown().await;

    let telemetry_path = handle.tracking_db_path.with_file_name("telemetry.json");
    crate::scheduler::persist_telemetry_best_effort(&handle.telemetry, &telemetry_path).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, OperationMode, PdfNamingFormat, RetrievalMethod, ServiceConfig, SourceDbConfig};
    use tempfile::tempdir;

    fn sample_config(dir: &std::path::Path) -> Config {
        Config {
            source_db: SourceDbConfig {
                server: "x".into(),
                database: "x".into(),
                user: "x".into(),
                password: "x".into(),
                timeout_seconds: 5,
            },
            service: ServiceConfig {
                api_url: "http://example.invalid/QRCode.asmx".into(),
                primary_web_url: "https://portal.example.invalid/Default.aspx".into(),
                backup_web_url: None,
                api_timeout_s: 5,
                web_timeout_s: 5,
                max_retries: 1,
                retry_delay_s: 1,
                session_reuse: true,
                retrieval_method: RetrievalMethod::Auto,
                pdf_naming_format: PdfNamingFormat::TaxCode,
            },
            app: AppConfig {
                output_directory: dir.join("out"),
                polling_interval_s: 5,
                operation_mode: OperationMode::Manual,
                max_batch_size: None,
            },
        }
    }

    #[tokio::test]
    async fn init_then_shutdown_leaves_no_running_scheduler() {
        let dir = tempdir().unwrap();
        let source_db_path = dir.path().join("source.db");
        rusqlite::Connection::open(&source_db_path)
            .unwrap()
            .execute_batch(
                "CREATE TABLE declarations (
                    declaration_number TEXT, tax_code TEXT, declaration_date TEXT,
                    customs_office_code TEXT, transport_method TEXT, channel TEXT,
                    status TEXT, goods_description TEXT
                 );
                 CREATE TABLE companies (tax_code TEXT, company_name TEXT);",
            )
            .unwrap();

        let handle = init(
            sample_config(dir.path()),
            source_db_path.to_str().unwrap(),
            dir.path().join("tracking.db"),
        )
        .unwrap();

        assert!(!handle.scheduler.is_running());
        shutdown(handle).await;
    }
}
