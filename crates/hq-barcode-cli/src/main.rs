//! Command-line entry point: manual trigger, automatic-mode daemon, and
//! forced redownload, wired onto `hq_barcode_core::core_handle`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hq_barcode_core::config::{Config, OperationMode, RetrievalMethod};
use hq_barcode_core::error::Result;
use hq_barcode_core::model::Declaration;
use hq_barcode_core::{core_handle, Error};

#[derive(Parser)]
#[command(name = "hq-barcode")]
#[command(about = "Retrieves and saves customs barcode PDFs for cleared declarations")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Path to the source declarations database.
    #[arg(long, global = true, default_value = "ecus5.db")]
    source_db: String,

    /// Path to the tracking store database.
    #[arg(long, global = true, default_value = "tracking.db")]
    tracking_db: PathBuf,

    /// Enable debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Writes a sample configuration file and exits.
    Init {
        /// Output path for the generated config.
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },

    /// Runs one retrieval cycle (manual trigger) and prints the summary.
    Run,

    /// Runs continuously in automatic mode until interrupted (Ctrl-C).
    Daemon,

    /// Forces re-retrieval for specific declarations, bypassing the
    /// already-processed check and overwriting any existing PDF.
    Redownload {
        /// One or more `tax_code:declaration_number:customs_office_code:YYYY-MM-DD` entries.
        #[arg(required = true)]
        declarations: Vec<String>,
    },

    /// Switches the runtime retrieval strategy (api, web, auto) without
    /// restarting the process. Does not persist to the config file.
    SetMethod {
        #[arg(value_enum)]
        method: CliRetrievalMethod,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliRetrievalMethod {
    Api,
    Web,
    Auto,
}

impl From<CliRetrievalMethod> for RetrievalMethod {
    fn from(m: CliRetrievalMethod) -> Self {
        match m {
            CliRetrievalMethod::Api => RetrievalMethod::Api,
            CliRetrievalMethod::Web => RetrievalMethod::Web,
            CliRetrievalMethod::Auto => RetrievalMethod::Auto,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    if let Commands::Init { output } = &cli.command {
        write_sample_config(output)?;
        println!("sample configuration written to {}", output.display());
        return Ok(());
    }

    let config_text = std::fs::read_to_string(&cli.config)?;
    let config = Config::from_toml_str(&config_text)?;
    let handle = core_handle::init(config, &cli.source_db, cli.tracking_db.clone())?;

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),

        Commands::Run => {
            let summary = handle.scheduler.run_once().await;
            print_summary(&summary);
        }

        Commands::Daemon => {
            handle.scheduler.set_operation_mode(OperationMode::Automatic);
            handle.scheduler.start();
            tracing::info!("daemon running; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.map_err(|e| Error::internal(e.to_string()))?;
            tracing::info!("shutdown signal received");
        }

        Commands::Redownload { declarations } => {
            let parsed = declarations
                .iter()
                .map(|s| parse_redownload_entry(s))
                .collect::<Result<Vec<_>>>()?;
            let summary = handle.scheduler.redownload(&parsed).await;
            print_summary(&summary);
        }

        Commands::SetMethod { method } => {
            handle.settings.set_retrieval_method(method.into());
            println!("retrieval method set to {:?} for this run", handle.settings.retrieval_method());
        }
    }

    core_handle::shutdown(handle).await;
    Ok(())
}

fn print_summary(summary: &hq_barcode_core::model::Summary) {
    println!(
        "fetched={} eligible={} success={} errors={}",
        summary.total_fetched, summary.total_eligible, summary.success_count, summary.error_count
    );
}

/// Parses one `tax_code:declaration_number:customs_office_code:YYYY-MM-DD`
/// redownload argument.
fn parse_redownload_entry(s: &str) -> Result<Declaration> {
    let parts: Vec<&str> = s.split(':').collect();
    let [tax_code, declaration_number, customs_office_code, date] = parts.as_slice() else {
        return Err(Error::config(format!(
            "invalid redownload entry '{s}', expected tax_code:declaration_number:customs_office_code:YYYY-MM-DD"
        )));
    };
    let declaration_date = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| Error::config(format!("invalid date in redownload entry '{s}': {e}")))?;
    Ok(Declaration {
        declaration_number: (*declaration_number).to_string(),
        tax_code: (*tax_code).to_string(),
        declaration_date,
        customs_office_code: (*customs_office_code).to_string(),
        transport_method: String::new(),
        channel: String::new(),
        status: String::new(),
        goods_description: None,
    })
}

fn write_sample_config(path: &PathBuf) -> Result<()> {
    let sample = r#"[source_db]
server = "ecus5.local"
database = "ECUS5VNACCS"
user = "reader"
password = "change-me"
timeout_seconds = 30

[service]
api_url = "http://103.248.160.25:8086/WS_Container/QRCode.asmx"
primary_web_url = "https://example.customs.gov.vn/form"
api_timeout_s = 10
web_timeout_s = 15
max_retries = 1
retry_delay_s = 5
session_reuse = true
retrieval_method = "auto"
pdf_naming_format = "tax_code"

[app]
output_directory = "./output"
polling_interval_s = 300
operation_mode = "manual"
"#;
    std::fs::write(path, sample)?;
    Ok(())
}
