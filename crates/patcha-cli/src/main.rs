//! patcha — patch-deployment coverage for a compute fleet.
//!
//! ```text
//! patcha sync --bootstrap          # first build of the cache
//! patcha sync                      # refresh if the TTL has passed
//! patcha unmanaged                 # instances no deployment covers
//! patcha instances-for prod weekly-linux
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{Context, Format};

#[derive(Parser)]
#[command(
    name = "patcha",
    about = "Patcha — find compute instances no patch deployment covers",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file; defaults apply when it does not exist.
    #[arg(short, long, global = true, default_value = "patcha.toml")]
    config: PathBuf,

    /// Override [store].path.
    #[arg(long, global = true)]
    store_path: Option<PathBuf>,

    /// Override [source].inventory.
    #[arg(long, global = true)]
    inventory: Option<PathBuf>,

    /// Output format: text or json.
    #[arg(short, long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh the cache when it has expired, or serve it as is.
    Sync {
        /// Build an empty cache.
        #[arg(long)]
        bootstrap: bool,
        /// Refresh even if the cache has not expired.
        #[arg(long)]
        force: bool,
    },
    /// List instances no deployment covers.
    Unmanaged,
    /// List deployments whose filters select no instance.
    Matchless,
    /// List the instances a deployment selects.
    InstancesFor { project: String, deployment: String },
    /// List the deployments covering an instance.
    DeploymentsFor { project: String, instance: String },
    /// Show cache state and what the next sync would do.
    Status,
    /// Drop the cached snapshot.
    Clear,
    /// Write a patcha.toml scaffold with the effective settings.
    Init {
        /// Projects to reconcile.
        #[arg(short, long = "project")]
        projects: Vec<String>,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let ctx = Context::load(&cli.config, cli.store_path, cli.inventory, cli.format)?;

    match cli.command {
        Commands::Sync { bootstrap, force } => commands::sync::sync(&ctx, bootstrap, force).await,
        Commands::Unmanaged => commands::query::unmanaged(&ctx).await,
        Commands::Matchless => commands::query::matchless(&ctx).await,
        Commands::InstancesFor {
            project,
            deployment,
        } => commands::query::instances_for(&ctx, &project, &deployment).await,
        Commands::DeploymentsFor { project, instance } => {
            commands::query::deployments_for(&ctx, &project, &instance).await
        }
        Commands::Status => commands::store::status(&ctx),
        Commands::Clear => commands::store::clear(&ctx),
        Commands::Init { projects, force } => {
            commands::store::init(&ctx, &cli.config, projects, force)
        }
    }
}

/// Logs go to stderr so stdout carries only query results.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("patcha=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
