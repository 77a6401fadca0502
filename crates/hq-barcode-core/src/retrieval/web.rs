//! Web Scraping Client: headless-browser fallback supporting two
//! customs-portal dialects, with adaptive per-field selector caching.
//!
//! The ASP.NET dialect is a plain form POST parsed with `reqwest` +
//! `scraper`; the Oracle ADF dialect drives a headless Chrome session via
//! `chromiumoxide` (graceful-timeout-then-kill lifecycle, recreate on
//! error) and asks devtools to print the loaded result to PDF directly.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::error::{Error, ErrorKind, Result};

/// The four form fields filled on every dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    TaxCode,
    DeclarationNumber,
    DeclarationDate,
    CustomsOffice,
}

impl FieldType {
    pub const ALL: [FieldType; 4] = [
        FieldType::TaxCode,
        FieldType::DeclarationNumber,
        FieldType::DeclarationDate,
        FieldType::CustomsOffice,
    ];
}

/// Ordered candidate selector identifiers per field, tried by id then by
/// name attribute.
pub(crate) fn field_selectors(field: FieldType) -> &'static [&'static str] {
    match field {
        FieldType::TaxCode => &["txtMaDoanhNghiep", "ctl00_MainContent_txtMaDN", "pt1:maDoanhNghiep"],
        FieldType::DeclarationNumber => &["txtSoToKhai", "ctl00_MainContent_txtSoTK", "pt1:soToKhai"],
        FieldType::DeclarationDate => &["txtNgayDangKy", "ctl00_MainContent_txtNgayDK", "pt1:ngayDangKy"],
        FieldType::CustomsOffice => &["txtMaHQ", "ctl00_MainContent_txtMaHQ", "pt1:maHaiQuan"],
    }
}

const CACHE_VALIDITY: Duration = Duration::from_secs(24 * 3600);

struct CachedSelector {
    selector_id: String,
    last_updated: SystemTime,
}

/// Per-field selector cache. Valid entries are tried
/// first; on exhaustion of the full candidate list the cache is left
/// untouched and the caller logs a structured page dump.
#[derive(Default)]
pub struct SelectorCache {
    entries: Mutex<HashMap<FieldType, CachedSelector>>,
}

impl SelectorCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn valid_cached(&self, field: FieldType) -> Option<String> {
        let entries = self.entries.lock().expect("lock poisoned");
        entries.get(&field).and_then(|c| {
            if c.last_updated.elapsed().unwrap_or(Duration::MAX) < CACHE_VALIDITY {
                Some(c.selector_id.clone())
            } else {
                None
            }
        })
    }

    fn update(&self, field: FieldType, selector_id: &str) {
        let mut entries = self.entries.lock().expect("lock poisoned");
        entries.insert(
            field,
            CachedSelector {
                selector_id: selector_id.to_string(),
                last_updated: SystemTime::now(),
            },
        );
    }

    /// Resolves the selector to use for `field` against the current page's
    /// input/select element ids and name attributes. Tries the cached
    /// selector first (by id then by name), then the full ordered list,
    /// each candidate tried by id then by name — never more than twice per
    /// candidate.
    pub fn resolve(&self, field: FieldType, present_ids: &[String], present_names: &[String]) -> Result<String> {
        let mut tried = Vec::new();

        if let Some(cached) = self.valid_cached(field) {
            tried.push(cached.clone());
            if present_ids.contains(&cached) || present_names.contains(&cached) {
                self.update(field, &cached);
                return Ok(cached);
            }
        }

        for candidate in field_selectors(field) {
            if tried.iter().any(|t| t == candidate) {
                continue;
            }
            if present_ids.contains(&candidate.to_string()) || present_names.contains(&candidate.to_string()) {
                self.update(field, candidate);
                return Ok(candidate.to_string());
            }
        }

        warn!(?field, "selector resolution exhausted; dumping page structure");
        Err(Error::selector_not_found(format!("{field:?}")))
    }
}

/// Which customs-portal dialect a URL serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Oracle ADF AJAX portal — URL contains `/faces`.
    OracleAdf,
    /// Classic ASP.NET form-POST portal.
    AspNet,
}

pub fn detect_dialect(url: &str) -> Dialect {
    if url.contains("/faces") {
        Dialect::OracleAdf
    } else {
        Dialect::AspNet
    }
}

/// Scans an HTML document for `<a href="*.pdf">` / `<iframe src="*.pdf">`
/// links, the ASP.NET dialect's first two fallback steps for locating the
/// result PDF once the form response has loaded.
pub fn find_pdf_link(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let a_sel = Selector::parse("a[href]").unwrap();
    for el in doc.select(&a_sel) {
        if let Some(href) = el.value().attr("href") {
            if href.to_lowercase().ends_with(".pdf") {
                return Some(href.to_string());
            }
        }
    }
    let iframe_sel = Selector::parse("iframe[src]").unwrap();
    for el in doc.select(&iframe_sel) {
        if let Some(src) = el.value().attr("src") {
            if src.to_lowercase().ends_with(".pdf") {
                return Some(src.to_string());
            }
        }
    }
    None
}

/// Collects the ids and `name` attributes of every `input`/`select` element
/// on the page, used both for selector resolution and for the diagnostic
/// page-structure dump on exhaustion.
pub fn collect_form_field_identifiers(html: &str) -> (Vec<String>, Vec<String>) {
    let doc = Html::parse_document(html);
    let sel = Selector::parse("input, select").unwrap();
    let mut ids = Vec::new();
    let mut names = Vec::new();
    for el in doc.select(&sel) {
        if let Some(id) = el.value().attr("id") {
            ids.push(id.to_string());
        }
        if let Some(name) = el.value().attr("name") {
            names.push(name.to_string());
        }
    }
    (ids, names)
}

/// Detects whether an ADF result page has finished loading: a non-empty
/// result div, the `lbl_BanLuu` save link, or a table mentioning
/// "container"/"mã vạch".
pub fn adf_result_loaded(html: &str) -> bool {
    let lower = html.to_lowercase();
    lower.contains(r#"id="lbl_banluu""#)
        || lower.contains("container")
        || lower.contains("mã vạch")
        || lower.contains("ma vach")
}

/// Fixed devtools `Page.printToPDF` parameters.
pub struct PrintToPdfParams {
    pub landscape: bool,
    pub print_background: bool,
    pub scale: f64,
    pub margin_top_in: f64,
    pub margin_bottom_in: f64,
    pub margin_left_in: f64,
    pub margin_right_in: f64,
}

impl Default for PrintToPdfParams {
    fn default() -> Self {
        Self {
            landscape: false,
            print_background: true,
            scale: 1.4,
            margin_top_in: 0.1,
            margin_bottom_in: 0.3,
            margin_left_in: 0.3,
            margin_right_in: 0.3,
        }
    }
}

/// Verifies a devtools print result looks like a real PDF.
pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF")
}

/// The Web Scraping Client. Browser automation (Oracle ADF dialect)
/// is gated behind the `browser` feature; when disabled, only the ASP.NET
/// dialect (plain HTTP form POST) is available, and Oracle ADF URLs fail
/// with a classified `configuration` error asking the operator to enable
/// the feature.
pub struct WebScrapeClient {
    http: reqwest::Client,
    selector_cache: SelectorCache,
    web_timeout_s: u64,
}

impl WebScrapeClient {
    pub fn new(web_timeout_s: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(web_timeout_s))
            .build()
            .map_err(|e| Error::classified(ErrorKind::Network, e.to_string()))?;
        Ok(Self {
            http,
            selector_cache: SelectorCache::new(),
            web_timeout_s,
        })
    }

    /// Runs the full field-fill + submit + PDF-extraction flow for `url`,
    /// dispatching to the dialect implied by [`detect_dialect`].
    pub async fn retrieve(
        &self,
        url: &str,
        tax_code: &str,
        declaration_number: &str,
        declaration_date: &str,
        customs_office_code: &str,
    ) -> Result<Vec<u8>> {
        match detect_dialect(url) {
            Dialect::AspNet => {
                self.retrieve_asp_net(url, tax_code, declaration_number, declaration_date, customs_office_code)
                    .await
            }
            Dialect::OracleAdf => {
                self.retrieve_oracle_adf(url, tax_code, declaration_number, declaration_date, customs_office_code)
                    .await
            }
        }
    }

    async fn retrieve_asp_net(
        &self,
        url: &str,
        tax_code: &str,
        declaration_number: &str,
        declaration_date: &str,
        customs_office_code: &str,
    ) -> Result<Vec<u8>> {
        debug!(url, "fetching ASP.NET form page");
        let page = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::classified(ErrorKind::Network, e.to_string()))?
            .text()
            .await
            .map_err(|e| Error::classified(ErrorKind::Network, e.to_string()))?;

        let (ids, names) = collect_form_field_identifiers(&page);

        let tax_field = self.selector_cache.resolve(FieldType::TaxCode, &ids, &names)?;
        let decl_field = self
            .selector_cache
            .resolve(FieldType::DeclarationNumber, &ids, &names)?;
        let date_field = self
            .selector_cache
            .resolve(FieldType::DeclarationDate, &ids, &names)?;
        let office_field = self
            .selector_cache
            .resolve(FieldType::CustomsOffice, &ids, &names)?;

        let form = [
            (tax_field.as_str(), tax_code),
            (decl_field.as_str(), declaration_number),
            (date_field.as_str(), declaration_date),
            (office_field.as_str(), customs_office_code),
        ];

        let response = self
            .http
            .post(url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::classified(ErrorKind::Network, e.to_string()))?;

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("application/pdf") {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| Error::classified(ErrorKind::Network, e.to_string()))?;
            return Ok(bytes.to_vec());
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::classified(ErrorKind::Network, e.to_string()))?;

        let pdf_link = find_pdf_link(&body)
            .ok_or_else(|| Error::WebScrape("no PDF link found on ASP.NET result page".into()))?;
        let absolute = resolve_relative(url, &pdf_link);
        let bytes = self
            .http
            .get(&absolute)
            .send()
            .await
            .map_err(|e| Error::classified(ErrorKind::Network, e.to_string()))?
            .bytes()
            .await
            .map_err(|e| Error::classified(ErrorKind::Network, e.to_string()))?;
        Ok(bytes.to_vec())
    }

    #[cfg(feature = "browser")]
    async fn retrieve_oracle_adf(
        &self,
        url: &str,
        tax_code: &str,
        declaration_number: &str,
        declaration_date: &str,
        customs_office_code: &str,
    ) -> Result<Vec<u8>> {
        crate::retrieval::browser::print_adf_result_to_pdf(
            url,
            tax_code,
            declaration_number,
            declaration_date,
            customs_office_code,
            self.web_timeout_s,
        )
        .await
    }

    #[cfg(not(feature = "browser"))]
    async fn retrieve_oracle_adf(
        &self,
        _url: &str,
        _tax_code: &str,
        _declaration_number: &str,
        _declaration_date: &str,
        _customs_office_code: &str,
    ) -> Result<Vec<u8>> {
        Err(Error::config(
            "Oracle ADF dialect requires the `browser` feature (chromiumoxide headless Chrome)",
        ))
    }
}

/// Trait seam so the Retrieval Orchestrator can be tested against a
/// fake scraping backend without a live browser or portal.
#[async_trait::async_trait]
pub trait WebTransport: Send + Sync {
    async fn retrieve(
        &self,
        url: &str,
        tax_code: &str,
        declaration_number: &str,
        declaration_date: &str,
        customs_office_code: &str,
    ) -> Result<Vec<u8>>;
}

#[async_trait::async_trait]
impl WebTransport for WebScrapeClient {
    async fn retrieve(
        &self,
        url: &str,
        tax_code: &str,
        declaration_number: &str,
        declaration_date: &str,
        customs_office_code: &str,
    ) -> Result<Vec<u8>> {
        WebScrapeClient::retrieve(self, url, tax_code, declaration_number, declaration_date, customs_office_code).await
    }
}

fn resolve_relative(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if let Ok(base_url) = reqwest::Url::parse(base) {
        base_url
            .join(href)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string())
    } else {
        href.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_detection_by_faces_path() {
        assert_eq!(detect_dialect("https://portal.example/faces/Main"), Dialect::OracleAdf);
        assert_eq!(detect_dialect("https://portal.example/Default.aspx"), Dialect::AspNet);
    }

    #[test]
    fn selector_cache_prefers_cached_then_falls_back_to_list() {
        let cache = SelectorCache::new();
        let ids = vec!["ctl00_MainContent_txtMaDN".to_string()];
        let resolved = cache
            .resolve(FieldType::TaxCode, &ids, &[])
            .unwrap();
        assert_eq!(resolved, "ctl00_MainContent_txtMaDN");
        // Second call should prefer the now-cached selector and succeed
        // immediately since it is still present.
        let resolved_again = cache.resolve(FieldType::TaxCode, &ids, &[]).unwrap();
        assert_eq!(resolved_again, "ctl00_MainContent_txtMaDN");
    }

    #[test]
    fn selector_cache_exhaustion_returns_typed_failure() {
        let cache = SelectorCache::new();
        let err = cache.resolve(FieldType::TaxCode, &[], &[]).unwrap_err();
        assert!(matches!(err, Error::SelectorNotFound { .. }));
    }

    #[test]
    fn finds_pdf_link_in_anchor_then_iframe() {
        let html = r#"<html><body><a href="/files/a.PDF">link</a></body></html>"#;
        assert_eq!(find_pdf_link(html).as_deref(), Some("/files/a.PDF"));
        let html2 = r#"<html><body><iframe src="/v/b.pdf"></iframe></body></html>"#;
        assert_eq!(find_pdf_link(html2).as_deref(), Some("/v/b.pdf"));
        let html3 = r#"<html><body><p>nothing</p></body></html>"#;
        assert!(find_pdf_link(html3).is_none());
    }

    #[test]
    fn adf_result_loaded_detects_save_link_and_table() {
        assert!(adf_result_loaded(r#"<div id="lbl_BanLuu">Save</div>"#));
        assert!(adf_result_loaded("<table>Mã vạch container</table>"));
        assert!(!adf_result_loaded("<div>still loading...</div>"));
    }

    #[test]
    fn looks_like_pdf_checks_magic_bytes() {
        assert!(looks_like_pdf(b"%PDF-1.4 ..."));
        assert!(!looks_like_pdf(b"<html>"));
    }
}
