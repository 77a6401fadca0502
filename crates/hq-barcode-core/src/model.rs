//! Core data model: `Declaration`, `DeclarationRecord`, `Container`, and
//! the in-memory bookkeeping types shared across components.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Internal goods-description markers that exclude a declaration from
/// retrieval regardless of channel/status.
pub const MARKER_NKTC: &str = "#&NKTC";
pub const MARKER_XKTC: &str = "#&XKTC";

/// Transport-method code that excludes a declaration.
pub const TRANSPORT_METHOD_EXCLUDED: &str = "9999";

/// Risk channel assigned by customs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    /// Xanh — green, auto-cleared.
    Green,
    /// Vang — yellow, document check.
    Yellow,
    /// Do — red, physical inspection.
    Red,
}

impl Channel {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "Xanh" => Some(Channel::Green),
            "Vang" => Some(Channel::Yellow),
            "Do" => Some(Channel::Red),
            _ => None,
        }
    }
}

/// An immutable customs declaration as produced by the Source DB Connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub declaration_number: String,
    pub tax_code: String,
    pub declaration_date: NaiveDate,
    pub customs_office_code: String,
    pub transport_method: String,
    pub channel: String,
    pub status: String,
    pub goods_description: Option<String>,
}

impl Declaration {
    /// Identity is `(tax_code, declaration_number)`.
    pub fn id(&self) -> String {
        format!("{}:{}", self.tax_code, self.declaration_number)
    }

    pub fn channel(&self) -> Option<Channel> {
        Channel::from_code(&self.channel)
    }

    pub fn is_cleared(&self) -> bool {
        self.status == "T"
    }

    pub fn is_transport_excluded(&self) -> bool {
        self.transport_method == TRANSPORT_METHOD_EXCLUDED
    }

    pub fn has_exclusion_marker(&self) -> bool {
        match &self.goods_description {
            Some(desc) => desc.contains(MARKER_NKTC) || desc.contains(MARKER_XKTC),
            None => false,
        }
    }
}

/// One container row nested under a `DeclarationRecord`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub sequence_number: u32,
    pub container_number: String,
    pub container_seal: String,
    pub customs_seal: String,
    /// Base64-encoded PNG of the per-container QR code, if present.
    pub qr_image_base64: Option<String>,
    pub notes: Option<String>,
}

impl Container {
    /// Normalizes raw fields: trims container number/seals and maps
    /// the sentinel `"#####"` customs seal to empty.
    pub fn normalize(
        sequence_number: u32,
        container_number: &str,
        container_seal: &str,
        customs_seal: &str,
        qr_image_base64: Option<String>,
        notes: Option<String>,
    ) -> Self {
        let customs_seal = customs_seal.trim();
        Container {
            sequence_number,
            container_number: container_number.trim().to_string(),
            container_seal: container_seal.trim().to_string(),
            customs_seal: if customs_seal == "#####" {
                String::new()
            } else {
                customs_seal.to_string()
            },
            qr_image_base64,
            notes,
        }
    }
}

/// The declaration record returned by the SOAP API client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeclarationRecord {
    pub tax_code: String,
    pub declaration_number: String,
    pub registration_date: Option<NaiveDate>,
    pub company_name: String,
    pub supervising_office_code: String,
    pub supervising_sub_office_name: String,
    pub declaration_type_code: String,
    pub declaration_type_name: String,
    pub status_code: String,
    pub status_name: String,
    pub channel_name: String,
    pub cargo_count: Option<String>,
    pub cargo_count_unit: Option<String>,
    pub cargo_weight: Option<String>,
    pub cargo_weight_unit: Option<String>,
    /// `ma_ptvc` — transport type; "2" selects the container document.
    pub ma_ptvc: String,
    /// `so_dinh_danh` — external identifier, used as the barcode value.
    pub so_dinh_danh: String,
    pub notes: Option<String>,
    pub server_timestamp: Option<NaiveDateTime>,
    pub error_message: Option<String>,
    pub containers: Vec<Container>,
}

impl DeclarationRecord {
    /// §3 invariant: valid iff declaration number and tax code are non-empty
    /// and there is no error message.
    pub fn is_valid(&self) -> bool {
        !self.declaration_number.is_empty()
            && !self.tax_code.is_empty()
            && self.error_message.as_deref().unwrap_or("").is_empty()
    }

    /// §3 invariant / testable property #10.
    pub fn is_container_document(&self) -> bool {
        self.ma_ptvc == "2"
    }

    pub fn has_error(&self) -> bool {
        !self.error_message.as_deref().unwrap_or("").is_empty()
    }

    /// Value used as the Code39 barcode payload: `so_dinh_danh`, falling back
    /// to the declaration number when absent.
    pub fn barcode_value(&self) -> &str {
        if !self.so_dinh_danh.is_empty() {
            &self.so_dinh_danh
        } else {
            &self.declaration_number
        }
    }
}

/// A row in the tracking store's `processed` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEntry {
    pub declaration_id: String,
    pub tax_code: String,
    pub declaration_number: String,
    pub file_path: String,
    pub processed_at: NaiveDateTime,
}

/// A row in the tracking store's `error_history` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub id: i64,
    pub timestamp: NaiveDateTime,
    pub declaration_number: String,
    pub error_type: crate::error::ErrorKind,
    pub message: String,
    pub resolved: bool,
}

/// Outcome of one `run_once` scheduler iteration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub total_fetched: usize,
    pub total_eligible: usize,
    pub success_count: usize,
    pub error_count: usize,
}
