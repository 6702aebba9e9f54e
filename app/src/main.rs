mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::{AppConfig, ProviderKind};
use stamping::{
    facturama::{FacturamaClient, FacturamaSettings},
    mock::MockClient,
    StampingClient,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use store::workflow::WorkflowSettings;
use store::{Store, Workflow};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Payment complements (CFDI 4.0, Pagos 2.0) for uploaded invoices
#[derive(Parser)]
#[command(name = "cfdi-pagos")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register invoices from a CFDI file or every .xml under a directory
    Upload(commands::UploadArgs),

    /// List invoices with their payment complement
    List,

    /// Stamp the payment complement for an invoice
    Pay(commands::PayArgs),

    /// Write the PDF or XML of a payment complement
    Download(commands::DownloadArgs),

    /// Show a payment complement summary
    Show(commands::ShowArgs),

    /// Print SAT catalog codes
    Catalog(commands::CatalogArgs),

    /// Manage the provider password in the OS keychain
    Credentials(commands::CredentialsArgs),
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(env_filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn create_stamping_client(cfg: &AppConfig) -> anyhow::Result<Arc<dyn StampingClient>> {
    match cfg.provider.kind {
        ProviderKind::Facturama => {
            let username = cfg
                .provider
                .username
                .clone()
                .ok_or_else(|| anyhow::anyhow!("Facturama username not configured"))?;
            let password = config::provider_password()?;

            let mut settings = FacturamaSettings::new(cfg.provider.base_url.clone(), username, password);
            settings.connect_timeout = Duration::from_secs(cfg.provider.connect_timeout_secs);
            settings.read_timeout = Duration::from_secs(cfg.provider.read_timeout_secs);

            tracing::info!(base_url = %cfg.provider.base_url, "Using Facturama stamping provider");
            Ok(FacturamaClient::new(settings)?)
        }
        ProviderKind::Mock => {
            tracing::info!("Using mock stamping provider");
            Ok(MockClient::new())
        }
    }
}

fn create_workflow(cfg: &AppConfig) -> anyhow::Result<Workflow> {
    std::fs::create_dir_all(&cfg.storage.data_dir)
        .with_context(|| format!("Failed to create {}", cfg.storage.data_dir.display()))?;
    let store = Store::open(cfg.storage.db_path()).context("Failed to open invoice store")?;
    let client = create_stamping_client(cfg)?;
    let settings = WorkflowSettings {
        defaults: cfg.fiscal.defaults(),
        policy: cfg.extraction.policy(),
        audit_log: cfg.storage.audit_log_path(),
    };
    Ok(Workflow::new(store, client, settings))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => config::load_path(path)?,
        None => config::load().unwrap_or_default(),
    };

    match cli.command {
        Commands::Catalog(args) => commands::catalog(args),
        Commands::Credentials(args) => commands::credentials(args),
        Commands::Upload(args) => commands::upload(&create_workflow(&cfg)?, args),
        Commands::List => commands::list(&create_workflow(&cfg)?),
        Commands::Pay(args) => commands::pay(&create_workflow(&cfg)?, args).await,
        Commands::Download(args) => commands::download(&create_workflow(&cfg)?, args),
        Commands::Show(args) => commands::show(&create_workflow(&cfg)?, args),
    }
}
