//! twincam-node: entry point.
//!
//! ```text
//! twincam-node                         Run with twincam-node.toml (or defaults)
//! twincam-node --config <path>         Load a custom config TOML
//! twincam-node --gen-config            Write default config to stdout
//! twincam-node --init                  Write default config to the --config path
//! twincam-node --role primary --address 192.168.1.20:7440 --capture-after 5
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use twincam_core::PairRole;
use twincam_node::config::NodeConfig;
use twincam_node::service::PairNode;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "twincam-node", about = "Run one side of a twincam pair session over TCP")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "twincam-node.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to the `--config` path and exit.
    #[arg(long)]
    init: bool,

    /// Override the configured role ("primary" or "secondary").
    #[arg(long)]
    role: Option<PairRole>,

    /// Override the peer address (Primary dials it, Secondary listens).
    #[arg(short, long)]
    address: Option<String>,

    /// Primary only: request one synced capture this many seconds after
    /// the clocks are synchronized.
    #[arg(long)]
    capture_after: Option<u64>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&NodeConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // --init: bootstrap a config file.
    if cli.init {
        NodeConfig::write_default(&cli.config)?;
        println!("Wrote {}", cli.config.display());
        return Ok(());
    }

    // Load config, then apply CLI overrides.
    let mut config = NodeConfig::load(&cli.config);
    if let Some(role) = cli.role {
        config.network.role = role;
    }
    if let Some(address) = cli.address {
        config.network.address = address;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("twincam-node v{}", env!("CARGO_PKG_VERSION"));
    info!("role: {}", config.network.role);
    info!("address: {}", config.network.address);
    info!(
        "sync samples: {}, preview interval: {:?}, countdown: {:?}",
        config.pair.sync_sample_count,
        config.pair.preview_interval(),
        config.pair.countdown()
    );

    let node = PairNode::new(config);
    let stop = node.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, Ordering::SeqCst);
    });

    node.run(cli.capture_after.map(Duration::from_secs)).await?;

    Ok(())
}
