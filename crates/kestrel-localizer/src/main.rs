//! Kestrel file localizer binary.

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kestrel_launcher::LocationFactory;
use kestrel_localizer::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("kestrel_localizer=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let factory = LocationFactory::from_env();

    match cli.run(&factory).await {
        Ok(summary) => {
            info!(
                copied = summary.copied.len(),
                expanded = summary.expanded.len(),
                "localization complete"
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
