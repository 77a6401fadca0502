//! Scheduler: dual-mode (automatic polling / manual trigger) runner of the
//! end-to-end retrieval workflow.
//!
//! The polling worker runs as a `tokio::spawn`ed task and shuts down via a
//! `Notify`-signalled, bounded-wait join rather than an abort, so an
//! in-flight cycle gets a chance to finish cleanly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{AppConfig, OperationMode, PdfNamingFormat, RuntimeSettings};
use crate::error::{Error, ErrorKind};
use crate::error_handling::{attempt, classify, retry};
use crate::filemanager::FileManager;
use crate::model::{Declaration, Summary};
use crate::processor;
use crate::retrieval::{RetrievalOrchestrator, RetrievalRequest};
use crate::sourcedb::SharedSourceDb;
use crate::telemetry::Telemetry;
use crate::tracking::TrackingStore;

const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

struct SchedulerInner {
    source_db: SharedSourceDb,
    tracking: Arc<TrackingStore>,
    orchestrator: Arc<RetrievalOrchestrator>,
    files: FileManager,
    telemetry: Arc<Telemetry>,
    settings: Arc<RuntimeSettings>,
    pdf_naming_format: PdfNamingFormat,
    max_retries: u32,
    retry_delay_s: f64,
    max_batch_size: Option<usize>,
    polling_interval_s: u64,
    last_cycle: Mutex<NaiveDateTime>,
}

/// The §4.K coordinator. `start`/`stop` manage a background polling task;
/// `run_once` can always be invoked directly for a manual trigger.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    running: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_db: SharedSourceDb,
        tracking: Arc<TrackingStore>,
        orchestrator: Arc<RetrievalOrchestrator>,
        files: FileManager,
        telemetry: Arc<Telemetry>,
        settings: Arc<RuntimeSettings>,
        app_config: &AppConfig,
        pdf_naming_format: PdfNamingFormat,
        max_retries: u32,
        retry_delay_s: f64,
    ) -> Self {
        let inner = SchedulerInner {
            source_db,
            tracking,
            orchestrator,
            files,
            telemetry,
            settings,
            pdf_naming_format,
            max_retries,
            retry_delay_s,
            max_batch_size: app_config.max_batch_size,
            polling_interval_s: app_config.polling_interval_s,
            last_cycle: Mutex::new(Utc::now().naive_utc() - chrono::Duration::days(1)),
        };
        Self {
            inner: Arc::new(inner),
            running: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn get_operation_mode(&self) -> OperationMode {
        self.inner.settings.operation_mode()
    }

    pub fn set_operation_mode(&self, mode: OperationMode) {
        self.inner.settings.set_operation_mode(mode);
    }

    /// Starts the automatic polling worker if `operation_mode() ==
    /// Automatic`. Idempotent: calling `start()` while already running is a
    /// no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.inner.settings.operation_mode() != OperationMode::Automatic {
            info!("scheduler start() called in manual mode; no worker spawned");
            self.running.store(false, Ordering::SeqCst);
            return;
        }

        let inner = self.inner.clone();
        let running = self.running.clone();
        let stop_notify = self.stop_notify.clone();

        let handle = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                if let Err(err) = run_once_inner(&inner).await {
                    error!(error = %err, "run_once failed; scheduler loop continues");
                }
                let interval = Duration::from_secs(inner.polling_interval_s);
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop_notify.notified() => break,
                }
            }
        });
        *self.worker.lock().expect("lock poisoned") = Some(handle);
    }

    /// Signals the worker and joins it with a bounded wait (§4.K
    /// "`stop()` signals the worker and joins (bounded wait)"). Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.stop_notify.notify_waiters();
        let handle = self.worker.lock().expect("lock poisoned").take();
        if let Some(handle) = handle {
            if tokio::time::timeout(STOP_JOIN_TIMEOUT, handle).await.is_err() {
                warn!("scheduler worker did not stop within the bounded wait");
            }
        }
    }

    /// Executes one workflow iteration.
    pub async fn run_once(&self) -> Summary {
        match run_once_inner(&self.inner).await {
            Ok(summary) => summary,
            Err(err) => {
                error!(error = %err, "run_once failed before producing a summary");
                Summary::default()
            }
        }
    }

    /// Forces retrieval with `overwrite=true` for the given declarations and
    /// updates processed timestamps.
    pub async fn redownload(&self, declarations: &[Declaration]) -> Summary {
        let mut summary = Summary {
            total_fetched: declarations.len(),
            total_eligible: declarations.len(),
            ..Default::default()
        };
        self.inner.orchestrator.reset_batch();

        for declaration in declarations {
            match process_one(&self.inner, declaration, true).await {
                Ok(true) => {
                    summary.success_count += 1;
                    let _ = self.inner.tracking.update_processed_timestamp(declaration);
                }
                Ok(false) => summary.error_count += 1,
                Err(err) => {
                    warn!(error = %err, declaration = %declaration.id(), "redownload failed");
                    summary.error_count += 1;
                }
            }
        }
        summary
    }
}

async fn run_once_inner(inner: &Arc<SchedulerInner>) -> Result<Summary, Error> {
    let timer = inner.telemetry.timer("run_once");

    let already_processed = inner.tracking.get_all_processed()?;

    let now = Utc::now().naive_utc();
    let from = *inner.last_cycle.lock().expect("lock poisoned");
    let candidates = inner.source_db.get_declarations(from.date(), now.date(), None).await?;

    let eligible = processor::filter(&candidates, &already_processed);
    let eligible = processor::limit_batch(eligible, inner.max_batch_size);

    inner.orchestrator.reset_batch();

    let mut summary = Summary {
        total_fetched: candidates.len(),
        total_eligible: eligible.len(),
        success_count: 0,
        error_count: 0,
    };

    for declaration in &eligible {
        match process_one(inner, declaration, false).await {
            Ok(true) => summary.success_count += 1,
            Ok(false) => summary.error_count += 1,
            Err(err) => {
                warn!(error = %err, declaration = %declaration.id(), "declaration processing failed");
                summary.error_count += 1;
            }
        }
    }

    *inner.last_cycle.lock().expect("lock poisoned") = now;
    inner.telemetry.counter("declarations.fetched", summary.total_fetched as i64);
    inner.telemetry.counter("declarations.eligible", summary.total_eligible as i64);
    timer.finish();
    Ok(summary)
}

/// Processes one declaration end to end,
/// returning `Ok(true)` on a recorded success and `Ok(false)` on a recorded,
/// non-fatal failure (already written to the tracking store as an
/// `error_history` row).
async fn process_one(inner: &Arc<SchedulerInner>, declaration: &Declaration, overwrite: bool) -> Result<bool, Error> {
    let recoverable = std::collections::HashSet::from([ErrorKind::Network]);
    let req = RetrievalRequest {
        tax_code: &declaration.tax_code,
        declaration_number: &declaration.declaration_number,
        customs_office_code: &declaration.customs_office_code,
        registration_date: declaration.declaration_date,
    };

    let orchestrator = inner.orchestrator.clone();
    let outcome = retry(
        || orchestrator.retrieve(&req),
        &recoverable,
        inner.max_retries,
        inner.retry_delay_s,
    )
    .await;

    let (pdf, record) = match outcome {
        Ok(Some(outcome)) => (outcome.pdf, outcome.record),
        Ok(None) => {
            inner.tracking.record_error(
                &declaration.declaration_number,
                ErrorKind::Unknown,
                "no retrieval method produced a result",
                None,
            )?;
            return Ok(false);
        }
        Err(err) => {
            let kind = classify(&err);
            inner.tracking.record_error(&declaration.declaration_number, kind, &err.to_string(), None)?;
            return Ok(false);
        }
    };

    // Web-scraped results carry no structured record; fall back to a stub
    // built from the declaration so naming formats that don't need it
    // (tax_code, bill_of_lading) are unaffected.
    let record = record.unwrap_or_else(|| crate::model::DeclarationRecord {
        tax_code: declaration.tax_code.clone(),
        declaration_number: declaration.declaration_number.clone(),
        ..Default::default()
    });

    let saved = inner.files.save(declaration, &record, inner.pdf_naming_format, &pdf, overwrite)?;

    match saved {
        Some(path) => {
            inner.tracking.add_processed(declaration, &path.to_string_lossy())?;
            Ok(true)
        }
        None => {
            inner.tracking.record_error(
                &declaration.declaration_number,
                ErrorKind::FileSystem,
                "target file already exists and overwrite was not requested",
                None,
            )?;
            Ok(false)
        }
    }
}

/// Persists telemetry to `path` without ever failing the caller.
pub async fn persist_telemetry_best_effort(telemetry: &Telemetry, path: &std::path::Path) {
    attempt(
        || async { telemetry.persist(path) },
        (),
        "telemetry_persist",
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalMethod;
    use crate::model::DeclarationRecord;
    use crate::render::Renderer;
    use crate::retrieval::soap::SoapTransport;
    use crate::retrieval::web::WebTransport;
    use crate::sourcedb::SourceDbConnector;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    struct EmptySoap;
    #[async_trait]
    impl SoapTransport for EmptySoap {
        async fn query(
            &self,
            _tax_code: &str,
            _declaration_number: &str,
            _customs_office_code: &str,
            _registration_date: NaiveDate,
        ) -> Result<Option<DeclarationRecord>, Error> {
            Ok(None)
        }
    }

    struct FakeSoapWithRecord;
    #[async_trait]
    impl SoapTransport for FakeSoapWithRecord {
        async fn query(
            &self,
            tax_code: &str,
            declaration_number: &str,
            _customs_office_code: &str,
            _registration_date: NaiveDate,
        ) -> Result<Option<DeclarationRecord>, Error> {
            Ok(Some(DeclarationRecord {
                tax_code: tax_code.to_string(),
                declaration_number: declaration_number.to_string(),
                so_dinh_danh: "INV-999".into(),
                ..Default::default()
            }))
        }
    }

    struct FakeWeb;
    #[async_trait]
    impl WebTransport for FakeWeb {
        async fn retrieve(
            &self,
            _url: &str,
            _tax_code: &str,
            _declaration_number: &str,
            _declaration_date: &str,
            _customs_office_code: &str,
        ) -> Result<Vec<u8>, Error> {
            Ok(b"%PDF-1.4 fake".to_vec())
        }
    }

    struct FakeRenderer;
    impl Renderer for FakeRenderer {
        fn render(&self, _record: &DeclarationRecord) -> Result<Option<Vec<u8>>, Error> {
            Ok(Some(b"%PDF-1.4 rendered".to_vec()))
        }
    }

    struct FakeSourceDb {
        declarations: Vec<Declaration>,
    }

    #[async_trait]
    impl SourceDbConnector for FakeSourceDb {
        async fn get_declarations(
            &self,
            _from_date: NaiveDate,
            _to_date: NaiveDate,
            _tax_codes: Option<&[String]>,
        ) -> Result<Vec<Declaration>, Error> {
            Ok(self.declarations.clone())
        }
        async fn get_company_name(&self, _tax_code: &str) -> Result<Option<String>, Error> {
            Ok(None)
        }
        async fn get_clearance_status(&self, _declaration_number: &str, _tax_code: &str) -> Result<Option<String>, Error> {
            Ok(None)
        }
        async fn test(&self) -> Result<bool, Error> {
            Ok(true)
        }
        fn close_current_thread(&self) {}
    }

    fn sample_declaration() -> Declaration {
        Declaration {
            declaration_number: "107785877140".into(),
            tax_code: "2300944637".into(),
            declaration_date: NaiveDate::from_ymd_opt(2025, 12, 10).unwrap(),
            customs_office_code: "18A3".into(),
            transport_method: "1".into(),
            channel: "Xanh".into(),
            status: "T".into(),
            goods_description: None,
        }
    }

    fn make_scheduler(dir: &std::path::Path) -> Scheduler {
        let tracking = Arc::new(TrackingStore::open(dir.join("tracking.db")).unwrap());
        let source_db: SharedSourceDb = Arc::new(FakeSourceDb {
            declarations: vec![sample_declaration()],
        });
        let orchestrator = Arc::new(RetrievalOrchestrator::new(
            Box::new(EmptySoap),
            Box::new(FakeWeb),
            Box::new(FakeRenderer),
            RetrievalMethod::Auto,
            "https://portal.example/Default.aspx".into(),
            None,
            1,
            0.001,
        ));
        let files = FileManager::new(dir.join("out"));
        let telemetry = Arc::new(Telemetry::new());
        let app_config = AppConfig {
            output_directory: dir.join("out"),
            polling_interval_s: 1,
            operation_mode: OperationMode::Manual,
            max_batch_size: None,
        };
        let settings = Arc::new(RuntimeSettings::new(&crate::config::Config {
            source_db: crate::config::SourceDbConfig {
                server: "x".into(),
                database: "x".into(),
                user: "x".into(),
                password: "x".into(),
                timeout_seconds: 30,
            },
            service: crate::config::ServiceConfig {
                api_url: "http://example/QRCode.asmx".into(),
                primary_web_url: "https://portal.example/Default.aspx".into(),
                backup_web_url: None,
                api_timeout_s: 10,
                web_timeout_s: 15,
                max_retries: 1,
                retry_delay_s: 5,
                session_reuse: true,
                retrieval_method: RetrievalMethod::Auto,
                pdf_naming_format: PdfNamingFormat::TaxCode,
            },
            app: app_config.clone(),
        }));
        Scheduler::new(
            source_db,
            tracking,
            orchestrator,
            files,
            telemetry,
            settings,
            &app_config,
            PdfNamingFormat::TaxCode,
            1,
            0.001,
        )
    }

    #[tokio::test]
    async fn run_once_processes_eligible_declaration_and_writes_pdf() {
        let dir = tempdir().unwrap();
        let scheduler = make_scheduler(dir.path());
        let summary = scheduler.run_once().await;
        assert_eq!(summary.total_fetched, 1);
        assert_eq!(summary.total_eligible, 1);
        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.error_count, 0);
        assert!(dir.path().join("out").join("MV_2300944637_107785877140.pdf").exists());
    }

    #[tokio::test]
    async fn run_once_does_not_reprocess_already_processed_declaration() {
        let dir = tempdir().unwrap();
        let scheduler = make_scheduler(dir.path());
        let first = scheduler.run_once().await;
        assert_eq!(first.success_count, 1);
        let second = scheduler.run_once().await;
        assert_eq!(second.total_eligible, 0);
        assert_eq!(second.success_count, 0);
    }

    #[tokio::test]
    async fn manual_mode_start_does_not_spawn_worker() {
        let dir = tempdir().unwrap();
        let scheduler = make_scheduler(dir.path());
        scheduler.start();
        assert!(!scheduler.is_running());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn set_operation_mode_switches_between_automatic_and_manual() {
        let dir = tempdir().unwrap();
        let scheduler = make_scheduler(dir.path());
        assert_eq!(scheduler.get_operation_mode(), OperationMode::Manual);
        scheduler.set_operation_mode(OperationMode::Automatic);
        assert_eq!(scheduler.get_operation_mode(), OperationMode::Automatic);
    }

    #[tokio::test]
    async fn redownload_forces_overwrite_and_updates_timestamp() {
        let dir = tempdir().unwrap();
        let scheduler = make_scheduler(dir.path());
        let _ = scheduler.run_once().await;
        let summary = scheduler.redownload(&[sample_declaration()]).await;
        assert_eq!(summary.success_count, 1);
    }

    #[tokio::test]
    async fn invoice_naming_uses_the_fetched_record_not_a_stub() {
        let dir = tempdir().unwrap();
        let tracking = Arc::new(TrackingStore::open(dir.join("tracking.db")).unwrap());
        let source_db: SharedSourceDb = Arc::new(FakeSourceDb {
            declarations: vec![sample_declaration()],
        });
        let orchestrator = Arc::new(RetrievalOrchestrator::new(
            Box::new(FakeSoapWithRecord),
            Box::new(FakeWeb),
            Box::new(FakeRenderer),
            RetrievalMethod::Api,
            "https://portal.example/Default.aspx".into(),
            None,
            1,
            0.001,
        ));
        let files = FileManager::new(dir.join("out"));
        let telemetry = Arc::new(Telemetry::new());
        let app_config = AppConfig {
            output_directory: dir.join("out"),
            polling_interval_s: 1,
            operation_mode: OperationMode::Manual,
            max_batch_size: None,
        };
        let settings = Arc::new(RuntimeSettings::new(&crate::config::Config {
            source_db: crate::config::SourceDbConfig {
                server: "x".into(),
                database: "x".into(),
                user: "x".into(),
                password: "x".into(),
                timeout_seconds: 30,
            },
            service: crate::config::ServiceConfig {
                api_url: "http://example/QRCode.asmx".into(),
                primary_web_url: "https://portal.example/Default.aspx".into(),
                backup_web_url: None,
                api_timeout_s: 10,
                web_timeout_s: 15,
                max_retries: 1,
                retry_delay_s: 5,
                session_reuse: true,
                retrieval_method: RetrievalMethod::Api,
                pdf_naming_format: PdfNamingFormat::Invoice,
            },
            app: app_config.clone(),
        }));
        let scheduler = Scheduler::new(
            source_db,
            tracking,
            orchestrator,
            files,
            telemetry,
            settings,
            &app_config,
            PdfNamingFormat::Invoice,
            1,
            0.001,
        );

        let summary = scheduler.run_once().await;
        assert_eq!(summary.success_count, 1);
        assert!(dir.path().join("out").join("MV_2300944637_INV-999.pdf").exists());
    }
}
