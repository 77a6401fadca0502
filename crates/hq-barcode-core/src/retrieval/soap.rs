//! SOAP API Client: `QueryBangKeDanhSachContainer` over SOAP 1.1.
//!
//! Follows the usual async-trait-client-plus-shared-`reqwest::Client`
//! shape, with the request/response bodies built by hand with `quick-xml`
//! instead of `serde_json`, since the wire format here is a fixed SOAP
//! envelope rather than a JSON API.

use async_trait::async_trait;
use chrono::NaiveDate;
use quick_xml::events::{BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use std::io::Cursor;
use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};
use crate::model::{Container, DeclarationRecord};

const SOAP_NAMESPACE: &str = "http://tempuri.org/";
const SOAP_ACTION: &str = "http://tempuri.org/QueryBangKeDanhSachContainer";

/// Strips the internal `:8086` port from the configured endpoint.
pub fn normalize_endpoint(url: &str) -> String {
    url.replace(":8086", "")
}

fn build_http_client(timeout_s: u64, session_reuse: bool) -> Result<reqwest::Client> {
    let builder = reqwest::Client::builder().timeout(Duration::from_secs(timeout_s));
    let builder = if session_reuse {
        builder.pool_max_idle_per_host(4)
    } else {
        builder.pool_max_idle_per_host(0)
    };
    // Some sandboxed environments panic when reqwest probes the system
    // proxy configuration; fall back to an explicit no-proxy client rather
    // than propagating the panic.
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| builder.clone().build())) {
        Ok(Ok(client)) => Ok(client),
        _ => builder
            .no_proxy()
            .build()
            .map_err(|e| Error::classified(ErrorKind::Network, e.to_string())),
    }
}

fn soap_envelope(
    tax_code: &str,
    declaration_number: &str,
    customs_office_code: &str,
    registration_date: NaiveDate,
) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let date_str = format!("{}T00:00:00", registration_date.format("%Y-%m-%d"));

    writer
        .write_event(Event::Start(
            quick_xml::events::BytesStart::new("soap:Envelope")
                .with_attributes(vec![
                    ("xmlns:soap", "http://schemas.xmlsoap.org/soap/envelope/"),
                    ("xmlns:tem", SOAP_NAMESPACE),
                ]),
        ))
        .map_err(xml_write_err)?;
    writer
        .write_event(Event::Start(quick_xml::events::BytesStart::new("soap:Body")))
        .map_err(xml_write_err)?;
    writer
        .write_event(Event::Start(quick_xml::events::BytesStart::new(
            "tem:QueryBangKeDanhSachContainer",
        )))
        .map_err(xml_write_err)?;

    write_child(&mut writer, "tem:Ma_Doanh_Nghiep", tax_code)?;
    write_child(&mut writer, "tem:TK_ID", declaration_number)?;
    write_child(&mut writer, "tem:Ma_HQ", customs_office_code)?;
    write_child(&mut writer, "tem:Ngay_DK", &date_str)?;

    writer
        .write_event(Event::End(quick_xml::events::BytesEnd::new(
            "tem:QueryBangKeDanhSachContainer",
        )))
        .map_err(xml_write_err)?;
    writer
        .write_event(Event::End(quick_xml::events::BytesEnd::new("soap:Body")))
        .map_err(xml_write_err)?;
    writer
        .write_event(Event::End(quick_xml::events::BytesEnd::new("soap:Envelope")))
        .map_err(xml_write_err)?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| Error::SoapParse(e.to_string()))
}

fn write_child(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str, text: &str) -> Result<()> {
    writer
        .write_event(Event::Start(quick_xml::events::BytesStart::new(tag)))
        .map_err(xml_write_err)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_write_err)?;
    writer
        .write_event(Event::End(quick_xml::events::BytesEnd::new(tag)))
        .map_err(xml_write_err)?;
    Ok(())
}

fn xml_write_err(e: quick_xml::Error) -> Error {
    Error::SoapParse(e.to_string())
}

/// Parses the `QueryBangKeDanhSachContainerResult` payload into a
/// `DeclarationRecord`, per the service's field mapping. Returns `Ok(None)`
/// when no result element is present (modeled as a distinguished
/// `NotFound`-style `None`, not an error).
pub fn parse_response(body: &str) -> Result<Option<DeclarationRecord>> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut fields: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    let mut containers = Vec::new();
    let mut found_result = false;
    let mut current_tag = String::new();
    let mut in_bangke = false;
    let mut container_fields: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    let mut container_seq = 0u32;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let name = local_name(&e.name().as_ref().to_vec());
                if name == "QueryBangKeDanhSachContainerResult" {
                    found_result = true;
                }
                if name == "BangKe" {
                    in_bangke = true;
                }
                if in_bangke && (name.contains("Table_BangKe") || name == "Table") {
                    container_seq += 1;
                    container_fields.clear();
                }
                current_tag = name;
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default().trim().to_string();
                if !text.is_empty() {
                    if in_bangke && !current_tag.is_empty() {
                        container_fields.insert(current_tag.clone(), text.clone());
                    }
                    fields.insert(current_tag.clone(), text);
                }
            }
            Ok(Event::End(e)) => {
                let name = local_name(&e.name().as_ref().to_vec());
                if in_bangke && (name.contains("Table_BangKe") || name == "Table") {
                    containers.push(Container::normalize(
                        container_seq,
                        container_fields.get("SoContainer").map(|s| s.as_str()).unwrap_or(""),
                        container_fields.get("SoSealContainer").map(|s| s.as_str()).unwrap_or(""),
                        container_fields.get("SoSealHQ").map(|s| s.as_str()).unwrap_or(""),
                        container_fields.get("BarcodeImage").cloned(),
                        container_fields.get("GhiChu").cloned(),
                    ));
                }
                if name == "BangKe" {
                    in_bangke = false;
                }
            }
            Err(e) => return Err(Error::SoapParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !found_result {
        return Ok(None);
    }

    let get = |k: &str| fields.get(k).cloned().unwrap_or_default();
    let get_opt = |k: &str| fields.get(k).cloned();

    Ok(Some(DeclarationRecord {
        tax_code: get("Ma_Doanh_Nghiep"),
        declaration_number: get("TK_ID"),
        registration_date: get_opt("Ngay_DK").and_then(|s| {
            NaiveDate::parse_from_str(s.split('T').next().unwrap_or(&s), "%Y-%m-%d").ok()
        }),
        company_name: get("TenDoanhNghiep"),
        supervising_office_code: get("MaChiCucHQ"),
        supervising_sub_office_name: get("TenChiCucHaiQuanGS"),
        declaration_type_code: get("MaLoaiHinh"),
        declaration_type_name: get("TenLoaiHinh"),
        status_code: get("TrangThaiToKhai"),
        status_name: get("TenTrangThaiToKhai"),
        channel_name: get("LuongToKhai"),
        cargo_count: get_opt("SoLuongHang"),
        cargo_count_unit: get_opt("DVTSoLuongHang"),
        cargo_weight: get_opt("TongTrongLuongHang"),
        cargo_weight_unit: get_opt("DVTTongTrongLuongHang"),
        ma_ptvc: get("Ma_PTVC"),
        so_dinh_danh: get("SoDinhDanh"),
        notes: get_opt("GhiChu"),
        server_timestamp: None,
        error_message: get_opt("ThongBaoLoi"),
        containers,
    }))
}

fn local_name(qualified: &[u8]) -> String {
    let s = String::from_utf8_lossy(qualified);
    s.rsplit(':').next().unwrap_or(&s).to_string()
}

/// SOAP client owning one reused HTTP session.
pub struct SoapClient {
    http: reqwest::Client,
    endpoint: String,
}

impl SoapClient {
    pub fn new(api_url: &str, api_timeout_s: u64, session_reuse: bool) -> Result<Self> {
        Ok(Self {
            http: build_http_client(api_timeout_s, session_reuse)?,
            endpoint: normalize_endpoint(api_url),
        })
    }

    pub async fn query(
        &self,
        tax_code: &str,
        declaration_number: &str,
        customs_office_code: &str,
        registration_date: NaiveDate,
    ) -> Result<Option<DeclarationRecord>> {
        let body = soap_envelope(tax_code, declaration_number, customs_office_code, registration_date)?;

        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", format!("\"{SOAP_ACTION}\""))
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::classified(ErrorKind::Network, format!("SOAP request timed out: {e}"))
                } else {
                    Error::classified(ErrorKind::Network, format!("SOAP transport error: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(Error::classified(
                ErrorKind::Network,
                format!("SOAP endpoint returned status {}", response.status()),
            ));
        }

        let text = response
            .text()
            .await
            .map_err(|e| Error::classified(ErrorKind::Network, e.to_string()))?;

        parse_response(&text)
    }

    /// Disposes the underlying HTTP session. `reqwest::Client`
    /// is reference-counted internally, so this simply drops our handle.
    pub fn close(self) {
        drop(self);
    }
}

/// Trait seam so the retrieval orchestrator can be tested against a
/// fake transport without a live SOAP endpoint.
#[async_trait]
pub trait SoapTransport: Send + Sync {
    async fn query(
        &self,
        tax_code: &str,
        declaration_number: &str,
        customs_office_code: &str,
        registration_date: NaiveDate,
    ) -> Result<Option<DeclarationRecord>>;
}

#[async_trait]
impl SoapTransport for SoapClient {
    async fn query(
        &self,
        tax_code: &str,
        declaration_number: &str,
        customs_office_code: &str,
        registration_date: NaiveDate,
    ) -> Result<Option<DeclarationRecord>> {
        SoapClient::query(self, tax_code, declaration_number, customs_office_code, registration_date).await
    }
}
