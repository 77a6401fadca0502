//! # hq-barcode-core
//!
//! Retrieval, rendering, and tracking core for automating the retrieval of
//! customs "barcode" PDFs (container manifest confirmations) for cleared
//! declarations, fetched by SOAP API with a web-scraping fallback.
//!
//! ## Core components
//!
//! - **Source DB Connector** (`sourcedb`): read-only access to the external
//!   declarations database.
//! - **Processor** (`processor`): business-rule filtering and batch limiting.
//! - **Retrieval Orchestrator** (`retrieval::orchestrator`): chooses between
//!   the SOAP API and web scraping per declaration, with circuit breaking
//!   and retry.
//! - **PDF Renderer** (`render`): lays out the cargo/container document.
//! - **Tracking Store** (`tracking`): processed declarations and error
//!   history.
//! - **Scheduler** (`scheduler`): automatic polling or manual-trigger
//!   end-to-end runs.
//!
//! ## Example
//!
//! ```rust,ignore
//! use hq_barcode_core::{config::Config, core_handle};
//!
//! # async fn run() -> hq_barcode_core::error::Result<()> {
//! let config = Config::from_toml_str(include_str!("../config.toml"))?;
//! let handle = core_handle::init(config, "ecus5.db", "tracking.db")?;
//! let summary = handle.scheduler.run_once().await;
//! core_handle::shutdown(handle).await;
//! # Ok(())
//! # }
//! ```

pub mod asyncdb;
pub mod circuit_breaker;
pub mod config;
pub mod core_handle;
pub mod error;
pub mod error_handling;
pub mod filemanager;
pub mod model;
pub mod processor;
pub mod render;
pub mod retrieval;
pub mod scheduler;
pub mod sourcedb;
pub mod telemetry;
pub mod tracking;

pub use asyncdb::AsyncDbWrapper;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use config::{AppConfig, Config, OperationMode, PdfNamingFormat, RetrievalMethod, RuntimeSettings, ServiceConfig, SourceDbConfig};
pub use core_handle::CoreHandle;
pub use error::{Error, ErrorKind, Result};
pub use error_handling::{attempt, classify, classify_message, retry};
pub use filemanager::{naming, ConflictPolicy, FileManager};
pub use model::{Channel, Container, Declaration, DeclarationRecord, ErrorEntry, ProcessedEntry, Summary};
pub use processor::{filter, limit_batch};
pub use render::{PdfRenderer, Renderer};
pub use retrieval::{MethodLabel, RetrievalOrchestrator, RetrievalOutcome, RetrievalRequest, SoapClient, SoapTransport, WebScrapeClient, WebTransport};
pub use scheduler::Scheduler;
pub use sourcedb::{PooledSourceDb, SharedSourceDb, SourceDbConnector};
pub use telemetry::{MetricSummary, OperationTimer, Telemetry};
pub use tracking::TrackingStore;
