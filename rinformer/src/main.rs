use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgEnum, Parser, Subcommand};
use resources::config::AppConfig;
use tracing_subscriber::EnvFilter;

mod informer;
mod snapshot;
mod utils;
mod watch;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// Path to a YAML config file.
    /// Defaults to /etc/rinformer/config.yaml if present.
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an informer and log every change of a resource.
    Informer(informer::Arg),
    /// Run shared informers for namespaces and pods.
    SharedInformer(informer::SharedArg),
    /// Print pod events matching a selector for a bounded time.
    Watch(watch::Arg),
    /// List a resource once and print the cached objects.
    Snapshot(snapshot::Arg),
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ArgEnum)]
pub enum ResourceKind {
    Namespaces,
    Pods,
}

impl ResourceKind {
    pub fn path(&self) -> &'static str {
        match self {
            ResourceKind::Namespaces => "namespaces",
            ResourceKind::Pods => "pods",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).with_context(|| "Failed to load config")?;

    match &cli.command {
        Commands::Informer(arg) => arg.handle(&config).await?,
        Commands::SharedInformer(arg) => arg.handle(&config).await?,
        Commands::Watch(arg) => arg.handle(&config).await?,
        Commands::Snapshot(arg) => arg.handle(&config).await?,
    }

    Ok(())
}
