//! Retrieval Orchestrator: chooses method order per the configured
//! strategy, consults the circuit breaker before each attempt, retries
//! recoverable failures, and records per-method success/failure.
//!
//! A thin coordinator holding trait-object collaborators (`SoapTransport`,
//! `WebTransport`, `Renderer`) and delegating the actual work to them,
//! trying each candidate method in order and skipping any whose breaker is
//! open.

use std::collections::HashSet;
use std::sync::RwLock;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::config::RetrievalMethod;
use crate::error::{Error, ErrorKind, Result};
use crate::error_handling::retry;
use crate::model::DeclarationRecord;
use crate::render::Renderer;
use crate::retrieval::soap::SoapTransport;
use crate::retrieval::web::WebTransport;

/// A successful retrieval: the rendered/scraped PDF bytes, plus the queried
/// `DeclarationRecord` when the method that produced them parsed one (the
/// API path always does; web scraping never does, since it has no
/// structured response to offer).
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub pdf: Vec<u8>,
    pub record: Option<DeclarationRecord>,
}

/// Which method actually produced (or attempted) a result; also the
/// circuit-breaker registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodLabel {
    Api,
    PrimaryWeb,
    BackupWeb,
}

impl MethodLabel {
    pub fn registry_key(self) -> &'static str {
        match self {
            MethodLabel::Api => "api",
            MethodLabel::PrimaryWeb => "primary_web",
            MethodLabel::BackupWeb => "backup_web",
        }
    }
}

/// The identifiers needed to attempt retrieval by any method.
pub struct RetrievalRequest<'a> {
    pub tax_code: &'a str,
    pub declaration_number: &'a str,
    pub customs_office_code: &'a str,
    pub registration_date: NaiveDate,
}

/// Holds one instance each of the SOAP transport, web transport, and PDF
/// renderer as trait objects so tests can substitute fakes for all three.
pub struct RetrievalOrchestrator {
    soap: Box<dyn SoapTransport>,
    web: Box<dyn WebTransport>,
    renderer: Box<dyn Renderer>,
    circuit_breakers: CircuitBreakerRegistry,
    method: RwLock<RetrievalMethod>,
    primary_web_url: String,
    backup_web_url: Option<String>,
    max_retries: u32,
    retry_delay_s: f64,
}

impl RetrievalOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        soap: Box<dyn SoapTransport>,
        web: Box<dyn WebTransport>,
        renderer: Box<dyn Renderer>,
        method: RetrievalMethod,
        primary_web_url: String,
        backup_web_url: Option<String>,
        max_retries: u32,
        retry_delay_s: f64,
    ) -> Self {
        Self {
            soap,
            web,
            renderer,
            circuit_breakers: CircuitBreakerRegistry::new(),
            method: RwLock::new(method),
            primary_web_url,
            backup_web_url,
            max_retries,
            retry_delay_s,
        }
    }

    /// §4.F "Runtime mode change": swaps the strategy and resets all method
    /// counters.
    pub fn set_method(&self, method: RetrievalMethod) {
        *self.method.write().expect("lock poisoned") = method;
        self.circuit_breakers.reset_all();
    }

    pub fn method(&self) -> RetrievalMethod {
        *self.method.read().expect("lock poisoned")
    }

    /// Called by the Scheduler at the start of each batch.
    pub fn reset_batch(&self) {
        self.circuit_breakers.reset_all();
    }

    fn candidate_methods(&self) -> Vec<MethodLabel> {
        match *self.method.read().expect("lock poisoned") {
            RetrievalMethod::Api => vec![MethodLabel::Api],
            RetrievalMethod::Web => vec![MethodLabel::PrimaryWeb],
            RetrievalMethod::Auto => {
                let mut methods = vec![MethodLabel::Api, MethodLabel::PrimaryWeb];
                if self.backup_web_url.is_some() {
                    methods.push(MethodLabel::BackupWeb);
                }
                methods
            }
        }
    }

    /// `retrieve(declaration) → pdf_bytes | nil`. Tries each
    /// candidate method in strategy order, skipping any whose circuit is
    /// open, retrying recoverable failures per method via 4.A, and returning
    /// the first success. `Ok(None)` means every candidate method was tried
    /// (or skipped) without producing bytes and without a hard error; a hard
    /// error is only returned once no candidate remains.
    pub async fn retrieve(&self, req: &RetrievalRequest<'_>) -> Result<Option<RetrievalOutcome>> {
        let recoverable: HashSet<ErrorKind> = HashSet::from([ErrorKind::Network]);
        let mut last_err: Option<Error> = None;
        let mut any_attempted = false;

        for method in self.candidate_methods() {
            let breaker = self.circuit_breakers.get(method.registry_key());
            if breaker.is_open() {
                info!(?method, "circuit open, skipping retrieval method");
                continue;
            }
            any_attempted = true;

            let outcome = retry(
                || self.call_method(method, req),
                &recoverable,
                self.max_retries,
                self.retry_delay_s,
            )
            .await;

            match outcome {
                Ok(Some(outcome)) => {
                    breaker.record_success();
                    return Ok(Some(outcome));
                }
                Ok(None) => {
                    breaker.record_failure();
                }
                Err(err) => {
                    warn!(?method, error = %err, "retrieval method failed");
                    breaker.record_failure();
                    last_err = Some(err);
                }
            }
        }

        if !any_attempted {
            warn!("all retrieval methods skipped: every circuit breaker is open");
        }

        match last_err {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    async fn call_method(&self, method: MethodLabel, req: &RetrievalRequest<'_>) -> Result<Option<RetrievalOutcome>> {
        match method {
            MethodLabel::Api => self.call_api(req).await,
            MethodLabel::PrimaryWeb => self.call_web(&self.primary_web_url, req).await,
            MethodLabel::BackupWeb => {
                let url = self
                    .backup_web_url
                    .as_deref()
                    .ok_or_else(|| Error::config("backup_web_url is not configured"))?;
                self.call_web(url, req).await
            }
        }
    }

    /// Method A: query 4.C, and if a valid, error-free record comes
    /// back, render it via 4.E. The queried record travels with the
    /// rendered bytes so callers can use its fields (e.g. `so_dinh_danh`)
    /// for anything beyond the barcode payload, such as file naming.
    async fn call_api(&self, req: &RetrievalRequest<'_>) -> Result<Option<RetrievalOutcome>> {
        let record = self
            .soap
            .query(
                req.tax_code,
                req.declaration_number,
                req.customs_office_code,
                req.registration_date,
            )
            .await?;

        match record {
            Some(record) if record.is_valid() && !record.has_error() => {
                match self.renderer.render(&record)? {
                    Some(pdf) => Ok(Some(RetrievalOutcome { pdf, record: Some(record) })),
                    None => Ok(None),
                }
            }
            Some(record) if record.has_error() => Err(Error::classified(
                ErrorKind::Data,
                record.error_message.unwrap_or_default(),
            )),
            _ => Ok(None),
        }
    }

    /// Method W: call 4.D against `url` and return its bytes. Web scraping
    /// has no structured response to offer, so the outcome carries no
    /// record.
    async fn call_web(&self, url: &str, req: &RetrievalRequest<'_>) -> Result<Option<RetrievalOutcome>> {
        let date_str = req.registration_date.format("%d/%m/%Y").to_string();
        let pdf = self
            .web
            .retrieve(
                url,
                req.tax_code,
                req.declaration_number,
                &date_str,
                req.customs_office_code,
            )
            .await?;
        Ok(Some(RetrievalOutcome { pdf, record: None }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeclarationRecord;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FakeSoap {
        calls: Arc<AtomicU32>,
        result: fn() -> Result<Option<DeclarationRecord>>,
    }

    #[async_trait]
    impl SoapTransport for FakeSoap {
        async fn query(
            &self,
            _tax_code: &str,
            _declaration_number: &str,
            _customs_office_code: &str,
            _registration_date: NaiveDate,
        ) -> Result<Option<DeclarationRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    struct FakeWeb {
        calls: Arc<AtomicU32>,
        succeed: bool,
    }

    #[async_trait]
    impl WebTransport for FakeWeb {
        async fn retrieve(
            &self,
            _url: &str,
            _tax_code: &str,
            _declaration_number: &str,
            _declaration_date: &str,
            _customs_office_code: &str,
        ) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok(b"%PDF-1.4 fake".to_vec())
            } else {
                Err(Error::classified(ErrorKind::Network, "connection refused"))
            }
        }
    }

    struct FakeRenderer;
    impl Renderer for FakeRenderer {
        fn render(&self, _record: &DeclarationRecord) -> Result<Option<Vec<u8>>> {
            Ok(Some(b"%PDF-1.4 rendered".to_vec()))
        }
    }

    fn valid_record() -> DeclarationRecord {
        DeclarationRecord {
            tax_code: "123".into(),
            declaration_number: "456".into(),
            ..Default::default()
        }
    }

    fn sample_req() -> RetrievalRequest<'static> {
        RetrievalRequest {
            tax_code: "123",
            declaration_number: "456",
            customs_office_code: "18A3",
            registration_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        }
    }

    fn make_orchestrator(
        soap_calls: Arc<AtomicU32>,
        web_calls: Arc<AtomicU32>,
        soap_result: fn() -> Result<Option<DeclarationRecord>>,
        web_succeeds: bool,
        method: RetrievalMethod,
    ) -> RetrievalOrchestrator {
        RetrievalOrchestrator::new(
            Box::new(FakeSoap { calls: soap_calls, result: soap_result }),
            Box::new(FakeWeb { calls: web_calls, succeed: web_succeeds }),
            Box::new(FakeRenderer),
            method,
            "https://portal.example/Default.aspx".into(),
            None,
            1,
            0.001,
        )
    }

    #[tokio::test]
    async fn api_method_succeeds_and_renders() {
        let soap_calls = Arc::new(AtomicU32::new(0));
        let web_calls = Arc::new(AtomicU32::new(0));
        let orch = make_orchestrator(
            soap_calls.clone(),
            web_calls.clone(),
            || Ok(Some(valid_record())),
            false,
            RetrievalMethod::Api,
        );
        let result = orch.retrieve(&sample_req()).await.unwrap();
        let outcome = result.expect("api method should have produced an outcome");
        assert!(outcome.record.is_some());
        assert_eq!(soap_calls.load(Ordering::SeqCst), 1);
        assert_eq!(web_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn auto_strategy_falls_through_to_web_when_api_empty() {
        let soap_calls = Arc::new(AtomicU32::new(0));
        let web_calls = Arc::new(AtomicU32::new(0));
        let orch = make_orchestrator(
            soap_calls.clone(),
            web_calls.clone(),
            || Ok(None),
            true,
            RetrievalMethod::Auto,
        );
        let result = orch.retrieve(&sample_req()).await.unwrap();
        let outcome = result.expect("web fallback should have produced an outcome");
        assert!(outcome.record.is_none());
        assert_eq!(web_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn circuit_breaker_skips_method_after_threshold_failures() {
        let soap_calls = Arc::new(AtomicU32::new(0));
        let web_calls = Arc::new(AtomicU32::new(0));
        let orch = make_orchestrator(
            soap_calls.clone(),
            web_calls.clone(),
            || Err(Error::classified(ErrorKind::Data, "malformed response")),
            false,
            RetrievalMethod::Api,
        );
        for _ in 0..3 {
            let _ = orch.retrieve(&sample_req()).await;
        }
        assert!(!orch.circuit_breakers.should_try(MethodLabel::Api.registry_key()));
        let calls_before = soap_calls.load(Ordering::SeqCst);
        let _ = orch.retrieve(&sample_req()).await;
        assert_eq!(soap_calls.load(Ordering::SeqCst), calls_before, "open circuit must skip the call");
    }

    #[tokio::test]
    async fn reset_batch_reopens_all_circuits() {
        let soap_calls = Arc::new(AtomicU32::new(0));
        let web_calls = Arc::new(AtomicU32::new(0));
        let orch = make_orchestrator(
            soap_calls.clone(),
            web_calls.clone(),
            || Err(Error::classified(ErrorKind::Data, "malformed response")),
            false,
            RetrievalMethod::Api,
        );
        for _ in 0..3 {
            let _ = orch.retrieve(&sample_req()).await;
        }
        assert!(!orch.circuit_breakers.should_try(MethodLabel::Api.registry_key()));
        orch.reset_batch();
        assert!(orch.circuit_breakers.should_try(MethodLabel::Api.registry_key()));
    }

    #[tokio::test]
    async fn set_method_switches_strategy_and_resets_counters() {
        let soap_calls = Arc::new(AtomicU32::new(0));
        let web_calls = Arc::new(AtomicU32::new(0));
        let orch = make_orchestrator(
            soap_calls.clone(),
            web_calls.clone(),
            || Ok(Some(valid_record())),
            true,
            RetrievalMethod::Api,
        );
        orch.set_method(RetrievalMethod::Web);
        assert_eq!(orch.method(), RetrievalMethod::Web);
        let result = orch.retrieve(&sample_req()).await.unwrap();
        assert!(result.is_some());
        assert_eq!(soap_calls.load(Ordering::SeqCst), 0);
        assert_eq!(web_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn api_outcome_carries_the_queried_record_for_naming() {
        let soap_calls = Arc::new(AtomicU32::new(0));
        let web_calls = Arc::new(AtomicU32::new(0));
        let orch = make_orchestrator(
            soap_calls.clone(),
            web_calls.clone(),
            || {
                Ok(Some(DeclarationRecord {
                    tax_code: "123".into(),
                    declaration_number: "456".into(),
                    so_dinh_danh: "INV-789".into(),
                    ..Default::default()
                }))
            },
            false,
            RetrievalMethod::Api,
        );
        let outcome = orch.retrieve(&sample_req()).await.unwrap().unwrap();
        assert_eq!(outcome.record.unwrap().so_dinh_danh, "INV-789");
    }
}
