use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{error, info};

use transfer_monitor::adapter::cursor::{CursorStore, FsCursorStore, InMemoryCursorStore};
use transfer_monitor::adapter::rpc::JsonRpcSource;
use transfer_monitor::price::source::StaticPriceSource;
use transfer_monitor::telemetry::{LogFormat, init_logging};
use transfer_monitor::{Monitor, MonitorConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Reports large ERC-20 transfers across EVM chains")]
struct Args {
    /// JSON monitor config.
    #[arg(short, long)]
    config: PathBuf,

    /// Directory for per-chain cursors. Without it, every run starts fresh.
    #[arg(long)]
    cursor_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 300)]
    window_secs: u64,

    /// Number of windows to run; 0 runs until interrupted.
    #[arg(long, default_value_t = 0)]
    windows: u64,

    #[arg(long, default_value_t = 30)]
    rpc_timeout_secs: u64,

    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let format = if args.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_logging(&args.log_level, format);

    let config = MonitorConfig::from_json_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let cursors: Arc<dyn CursorStore> = match &args.cursor_dir {
        Some(dir) => Arc::new(FsCursorStore::new(dir)?),
        None => Arc::new(InMemoryCursorStore::new()),
    };
    let prices = Arc::new(StaticPriceSource::from_config(&config));
    if prices.is_empty() {
        bail!("no token in the config carries a price_usd");
    }

    let mut monitor = Monitor::new(config.clone(), prices, cursors)?;
    for chain in &config.chains {
        let Some(url) = &chain.rpc_url else {
            bail!("chain {} ({}) has no rpc_url", chain.chain_id, chain.name);
        };
        let source = JsonRpcSource::new(
            chain.chain_id,
            url.clone(),
            Duration::from_secs(args.rpc_timeout_secs),
        )?;
        monitor = monitor.with_chain_source(chain.chain_id, Arc::new(source));
    }

    let mut completed = 0u64;
    loop {
        let window = tokio::time::sleep(Duration::from_secs(args.window_secs));
        let snapshot = match monitor.run_window(window).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "window failed; operator acknowledgement required");
                return Err(e.into());
            }
        };
        info!(
            window = snapshot.window_id,
            admitted = snapshot.admitted.count,
            volume = %snapshot.admitted.volume,
            complete = snapshot.is_complete(),
            "window snapshot"
        );
        println!("{}", serde_json::to_string(&snapshot)?);

        completed += 1;
        if args.windows != 0 && completed >= args.windows {
            return Ok(());
        }
    }
}
