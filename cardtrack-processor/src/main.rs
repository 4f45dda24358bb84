use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use cardtrack_core::storage::{CustomerStore, JsonFileCustomerStore};
use cardtrack_processor::notify::LogNotificationSink;
use cardtrack_processor::observability::logging::init_logging;
use cardtrack_processor::pipeline::service::IngestionService;
use cardtrack_processor::templates::{ProviderType, TemplateRegistry};

#[derive(Parser)]
#[command(name = "cardtrack")]
#[command(about = "Card tracking reconciliation engine")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a batch of raw provider records
    Process {
        /// JSON file containing an array of raw records
        #[arg(long)]
        input: PathBuf,
        /// Provider type the batch came from
        #[arg(long, value_enum)]
        provider: ProviderType,
        /// Master config with the provider templates
        #[arg(long, default_value = "config/master_config.json")]
        config: PathBuf,
        /// Customer state file
        #[arg(long, default_value = "data/customers.json")]
        state: PathBuf,
    },
    /// Delete the customer state file
    Reset {
        #[arg(long, default_value = "data/customers.json")]
        state: PathBuf,
    },
    /// Print one customer document as JSON
    Show {
        /// Customer id (real or placeholder)
        customer: String,
        #[arg(long, default_value = "data/customers.json")]
        state: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            input,
            provider,
            config,
            state,
        } => {
            let metrics_handle = PrometheusBuilder::new().install_recorder()?;

            let registry = TemplateRegistry::load_from_file(&config)?;
            let template = registry.get(provider)?;

            let raw = std::fs::read_to_string(&input)?;
            let records: Vec<Value> = serde_json::from_str(&raw)?;
            info!(
                provider = %provider.as_str(),
                records = records.len(),
                input = %input.display(),
                "Starting batch"
            );
            println!(
                "🔄 Processing {} {} records from {}...",
                records.len(),
                provider.as_str(),
                input.display()
            );

            let store = Arc::new(JsonFileCustomerStore::open(&state)?);
            let service = IngestionService::new(store.clone(), Arc::new(LogNotificationSink));
            let outcome = service.ingest(&records, template).await?;
            store.flush()?;

            println!("\n📊 Batch results for {}:", template.provider_name);
            println!("   Processed: {}", outcome.processed);
            println!("   Skipped: {}", outcome.skipped);
            println!("   Errors: {}", outcome.errors);
            println!("   State file: {}", state.display());
            if outcome.errors > 0 {
                warn!(errors = outcome.errors, "Batch finished with errors");
            }
            tracing::debug!(metrics = %metrics_handle.render(), "Run counters");
        }
        Commands::Reset { state } => {
            if JsonFileCustomerStore::reset(&state)? {
                println!("🗑️  Removed state file {}", state.display());
            } else {
                println!("No state file at {}", state.display());
            }
        }
        Commands::Show { customer, state } => {
            let store = JsonFileCustomerStore::open(&state)?;
            match store.get_customer(&customer).await? {
                Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
                None => println!("⚠️  No customer with id: {customer}"),
            }
        }
    }

    Ok(())
}
