//! Oracle-ADF dialect driver and devtools print-to-PDF fallback.
//!
//! Follows the standard `chromiumoxide::Browser::launch` pattern: a
//! background task drains the event stream while the caller drives `Page`
//! operations, which is the only way the library's CDP transport makes
//! progress.

use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams as CdpPrintParams;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tracing::{debug, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::retrieval::web::{adf_result_loaded, field_selectors, looks_like_pdf, FieldType, PrintToPdfParams};

/// Warm-up backoff while ADF's client-side JS finishes initializing.
const WARMUP_DELAYS: [Duration; 3] = [Duration::from_secs(3), Duration::from_secs(5), Duration::from_secs(10)];

/// ADF submit-button candidates tried in order.
const SUBMIT_CANDIDATES: &[&str] = &[
    "a[class*='af_commandButton']",
    "[role='button']",
    "a.xfn",
];

/// Drives the full Oracle-ADF flow for `url` and returns rendered PDF bytes
/// via the devtools `Page.printToPDF` protocol command.
#[allow(clippy::too_many_arguments)]
pub async fn print_adf_result_to_pdf(
    url: &str,
    tax_code: &str,
    declaration_number: &str,
    declaration_date: &str,
    customs_office_code: &str,
    web_timeout_s: u64,
) -> Result<Vec<u8>> {
    let (browser, mut handler) = Browser::launch(
        BrowserConfig::builder()
            .build()
            .map_err(|e| Error::classified(ErrorKind::Network, e))?,
    )
    .await
    .map_err(|e| Error::WebScrape(format!("failed to launch headless browser: {e}")))?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                break;
            }
        }
    });

    let result = drive_adf_flow(
        &browser,
        url,
        tax_code,
        declaration_number,
        declaration_date,
        customs_office_code,
        web_timeout_s,
    )
    .await;

    let _ = browser.close().await;
    handler_task.abort();

    result
}

#[allow(clippy::too_many_arguments)]
async fn drive_adf_flow(
    browser: &Browser,
    url: &str,
    tax_code: &str,
    declaration_number: &str,
    declaration_date: &str,
    customs_office_code: &str,
    web_timeout_s: u64,
) -> Result<Vec<u8>> {
    let page = browser
        .new_page(url)
        .await
        .map_err(|e| Error::WebScrape(format!("navigation failed: {e}")))?;

    // Warm-up: ADF's client-side JavaScript needs a moment after first
    // paint before the form fields accept scripted input.
    for delay in WARMUP_DELAYS {
        tokio::time::sleep(delay).await;
        if page.content().await.map(|c| !c.is_empty()).unwrap_or(false) {
            break;
        }
    }

    fill_field_by_script(&page, FieldType::TaxCode, tax_code).await?;
    fill_field_by_script(&page, FieldType::DeclarationNumber, declaration_number).await?;
    fill_field_by_script(&page, FieldType::DeclarationDate, declaration_date).await?;
    fill_field_by_script(&page, FieldType::CustomsOffice, customs_office_code).await?;

    click_adf_submit(&page).await?;

    tokio::time::sleep(Duration::from_secs(10)).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(web_timeout_s);
    loop {
        let html = page
            .content()
            .await
            .map_err(|e| Error::WebScrape(format!("failed reading page content: {e}")))?;
        if adf_result_loaded(&html) {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::WebScrape("ADF result never finished loading".into()));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    hide_chrome(&page).await?;

    let params = PrintToPdfParams::default();
    let pdf_data = page
        .pdf(
            CdpPrintParams::builder()
                .landscape(params.landscape)
                .print_background(params.print_background)
                .scale(params.scale)
                .margin_top(params.margin_top_in)
                .margin_bottom(params.margin_bottom_in)
                .margin_left(params.margin_left_in)
                .margin_right(params.margin_right_in)
                .build(),
        )
        .await
        .map_err(|e| Error::WebScrape(format!("devtools print-to-pdf failed: {e}")))?;

    if !looks_like_pdf(&pdf_data) {
        return Err(Error::WebScrape("devtools print-to-pdf did not return a PDF".into()));
    }
    Ok(pdf_data)
}

/// Fills one ADF field by script injection (`element.value = ...` then
/// dispatching `change`/`blur`), trying each candidate selector in order.
async fn fill_field_by_script(page: &chromiumoxide::Page, field: FieldType, value: &str) -> Result<()> {
    let value_json = serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string());
    for selector in field_selectors(field) {
        let script = format!(
            "(function() {{
                var el = document.getElementById('{selector}') || document.querySelector('[name=\"{selector}\"]');
                if (!el) return false;
                el.value = {value_json};
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                el.dispatchEvent(new Event('blur', {{ bubbles: true }}));
                return true;
            }})()"
        );
        match page.evaluate(script).await {
            Ok(result) if result.value().and_then(|v| v.as_bool()).unwrap_or(false) => {
                debug!(?field, selector, "filled ADF field by script injection");
                return Ok(());
            }
            _ => continue,
        }
    }
    warn!(?field, "exhausted all selectors for ADF field; page structure follows");
    if let Ok(html) = page.content().await {
        debug!(page_structure = %truncate(&html, 500), "ADF field resolution failure dump");
    }
    Err(Error::selector_not_found(format!("{field:?}")))
}

async fn click_adf_submit(page: &chromiumoxide::Page) -> Result<()> {
    for selector in SUBMIT_CANDIDATES {
        if let Ok(element) = page.find_element(*selector).await {
            if element.click().await.is_ok() {
                return Ok(());
            }
        }
    }
    // Last resort: scan every `a[role=button]` via JS and click the first
    // one whose visible text matches a Vietnamese "submit/retrieve" variant.
    let clicked = page
        .evaluate(
            "(function() {
                var links = document.querySelectorAll('a[role=\"button\"]');
                for (var i = 0; i < links.length; i++) {
                    var t = (links[i].innerText || '').toLowerCase();
                    if (t.indexOf('tra cứu') >= 0 || t.indexOf('truy xuat') >= 0 || t.indexOf('tìm kiếm') >= 0) {
                        links[i].click();
                        return true;
                    }
                }
                return false;
            })()",
        )
        .await
        .ok()
        .and_then(|r| r.value().and_then(|v| v.as_bool()))
        .unwrap_or(false);
    if clicked {
        Ok(())
    } else {
        Err(Error::WebScrape("could not locate ADF submit control".into()))
    }
}

/// Hides header/menu/footer chrome and form input panels, neutralizing top
/// spacing, before the devtools print capture.
async fn hide_chrome(page: &chromiumoxide::Page) -> Result<()> {
    let script = "(function() {
        var sel = 'header, nav, footer, .af_panelHeader, .af_panelGroupLayout, form';
        document.querySelectorAll(sel).forEach(function(el) { el.style.display = 'none'; });
        document.body.style.marginTop = '0';
        document.body.style.paddingTop = '0';
    })()";
    page.evaluate(script)
        .await
        .map_err(|e| Error::WebScrape(format!("failed to hide chrome before print: {e}")))?;
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let cut = s.char_indices().nth(max).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..cut])
    }
}
