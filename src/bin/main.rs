/// Signoff CLI
///
/// Administrative commands for the approval workflow engine: migrations,
/// definition management, instance inspection, and the completion worker.
use tracing_subscriber::EnvFilter;

use signoff_core::cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
