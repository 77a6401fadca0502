//! Typed configuration consumed by the core.
//!
//! The on-disk file format is out of scope; this module only defines
//! the record the core deserializes into and the defaults §3/§6.5 specify.
//! Unknown keys are rejected rather than silently ignored (§9 design note).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::RwLock;

use crate::error::{Error, Result};

fn default_api_timeout_s() -> u64 {
    10
}
fn default_web_timeout_s() -> u64 {
    15
}
fn default_max_retries() -> u32 {
    1
}
fn default_retry_delay_s() -> u64 {
    5
}
fn default_session_reuse() -> bool {
    true
}
fn default_polling_interval_s() -> u64 {
    300
}
fn default_connect_timeout_s() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    Api,
    Web,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PdfNamingFormat {
    TaxCode,
    Invoice,
    BillOfLading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    Automatic,
    Manual,
}

/// Source-of-truth database connection options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceDbConfig {
    pub server: String,
    pub database: String,
    pub user: String,
    pub password: String,
    #[serde(default = "default_connect_timeout_s")]
    pub timeout_seconds: u64,
}

/// Retrieval service options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    pub api_url: String,
    pub primary_web_url: String,
    #[serde(default)]
    pub backup_web_url: Option<String>,
    #[serde(default = "default_api_timeout_s")]
    pub api_timeout_s: u64,
    #[serde(default = "default_web_timeout_s")]
    pub web_timeout_s: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_s")]
    pub retry_delay_s: u64,
    #[serde(default = "default_session_reuse")]
    pub session_reuse: bool,
    pub retrieval_method: RetrievalMethod,
    pub pdf_naming_format: PdfNamingFormat,
}

/// Application-level options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub output_directory: PathBuf,
    #[serde(default = "default_polling_interval_s")]
    pub polling_interval_s: u64,
    pub operation_mode: OperationMode,
    /// Supplemental feature recovered from `processors/batch_limiter.py`
    /// (SPEC_FULL §B): caps how many declarations one `run_once` processes.
    /// `None` is unbounded, matching the original's opt-in default.
    #[serde(default)]
    pub max_batch_size: Option<usize>,
}

/// The full, read-only-after-load configuration record the core consumes.
///
/// UI/logging configuration is out of scope and is not modeled here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub source_db: SourceDbConfig,
    pub service: ServiceConfig,
    pub app: AppConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::config(e.to_string()))
    }
}

/// The orchestrator-facing runtime settings that may change via explicit
/// setters during the process lifetime.
///
/// Persisting the new value to the on-disk config is the caller's
/// responsibility; this struct only holds the in-memory, currently
/// effective value, with serialized writes guarded by a lock.
#[derive(Debug)]
pub struct RuntimeSettings {
    retrieval_method: RwLock<RetrievalMethod>,
    operation_mode: RwLock<OperationMode>,
    output_directory: RwLock<PathBuf>,
}

impl RuntimeSettings {
    pub fn new(config: &Config) -> Self {
        Self {
            retrieval_method: RwLock::new(config.service.retrieval_method),
            operation_mode: RwLock::new(config.app.operation_mode),
            output_directory: RwLock::new(config.app.output_directory.clone()),
        }
    }

    pub fn retrieval_method(&self) -> RetrievalMethod {
        *self.retrieval_method.read().expect("lock poisoned")
    }

    pub fn set_retrieval_method(&self, method: RetrievalMethod) {
        *self.retrieval_method.write().expect("lock poisoned") = method;
    }

    pub fn operation_mode(&self) -> OperationMode {
        *self.operation_mode.read().expect("lock poisoned")
    }

    pub fn set_operation_mode(&self, mode: OperationMode) {
        *self.operation_mode.write().expect("lock poisoned") = mode;
    }

    pub fn output_directory(&self) -> PathBuf {
        self.output_directory.read().expect("lock poisoned").clone()
    }

    pub fn set_output_path(&self, path: PathBuf) {
        *self.output_directory.write().expect("lock poisoned") = path;
    }
}
