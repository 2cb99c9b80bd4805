use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vigil_cluster::{Cluster, ClusterConfig};

/// Exit status asking the supervisor to start us again (EX_TEMPFAIL).
const EXIT_RESTART: u8 = 75;

#[derive(Parser)]
#[command(name = "vigild", about = "Vigil cluster node", version)]
struct Cli {
    /// Node configuration (TOML).
    #[arg(short, long)]
    config: PathBuf,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClusterConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let tls = config.load_tls().context("loading TLS material")?;
    let directory = Arc::new(config.build_directory());

    let cluster = Cluster::start(config, directory, Some(tls))
        .await
        .context("starting cluster")?;

    eprintln!("vigild v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("Identity: {}", cluster.identity());
    if let Some(addr) = cluster.local_addr() {
        eprintln!("Listening on {addr}");
    }

    let code = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for Ctrl-C")?;
            eprintln!("\nCtrl+C received, shutting down...");
            ExitCode::SUCCESS
        }
        _ = cluster.restart_requested() => {
            tracing::info!("Restarting after configuration change.");
            ExitCode::from(EXIT_RESTART)
        }
    };

    cluster.shutdown().await.context("shutting down cluster")?;
    Ok(code)
}
