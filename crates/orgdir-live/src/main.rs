//! CLI entry point: run one operation document against the directory.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use orgdir_core::DirectoryConfig;
use orgdir_live::{DirectoryService, Request};
use orgdir_store::seed_directory;

#[derive(Parser)]
#[command(name = "orgdir")]
#[command(about = "Query and mutate the organizational directory")]
struct Cli {
    /// Operation document (JSON) to execute.
    #[arg(short, long)]
    document: PathBuf,

    /// Variables as a JSON object.
    #[arg(long)]
    variables: Option<String>,

    /// Operation to run when the document names several.
    #[arg(short, long)]
    operation: Option<String>,

    /// Config file prefix (default: orgdir).
    #[arg(short, long, default_value = "orgdir")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let config = DirectoryConfig::load(&cli.config)?;

    let service = DirectoryService::in_memory(&config)?;
    if config.seed {
        seed_directory(service.store().as_ref()).await?;
    }

    let query = std::fs::read_to_string(&cli.document)?;
    let mut request = Request::new(query);
    if let Some(raw) = cli.variables.as_deref() {
        request = request.with_variables(serde_json::from_str(raw)?);
    }
    if let Some(name) = cli.operation {
        request = request.with_operation(name);
    }

    let response = service.handle(&request).await;
    if response.is_aborted() {
        tracing::warn!(errors = response.errors.len(), "Request aborted");
    }
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}
