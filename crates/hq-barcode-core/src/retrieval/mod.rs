//! Retrieval pipeline: SOAP API client, web scraping
//! fallback, and the orchestrator that picks between them

pub mod soap;
pub mod web;

#[cfg(feature = "browser")]
pub mod browser;

pub mod orchestrator;

pub use orchestrator::{MethodLabel, RetrievalOrchestrator, RetrievalOutcome, RetrievalRequest};
pub use soap::{SoapClient, SoapTransport};
pub use web::{WebScrapeClient, WebTransport};
