//! KPK overlay - Main entry point
//!
//! Watches one page: samples its visible text while the page is allowed,
//! reports analysis results through the log and takes panel commands on
//! stdin.

use clap::Parser;
use kpk_overlay::panel::{self, PanelCommand};
use kpk_overlay::{
    AllowlistStore, AnalysisClient, AudioPlayer, CommandPlayer, Config, ContentSampler,
    FileKeyValueStore, HtmlPage, KeyValueBridge, LogRenderer, NullPlayer, PageContext,
    PollConfig, PollController,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "kpk-overlay", version, about = "Allowlist-gated page assistant")]
struct Args {
    /// Page to watch
    url: String,

    /// Config file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Analysis service root URL
    #[arg(long)]
    backend_url: Option<String>,

    /// Poll interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Debounce delay after activity in milliseconds
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Local allowlist storage file
    #[arg(long)]
    storage: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging before anything else can warn; the filter is
    // swapped for the configured level once the config is read
    let (filter, filter_handle) = reload::Layer::new(tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    ));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load_from_path(path.clone()),
        None => Config::load(),
    };
    config.apply_env();
    if let Some(url) = args.backend_url {
        config.backend.base_url = url;
    }
    if let Some(ms) = args.interval_ms {
        config.timing.poll_interval_ms = ms;
    }
    if let Some(ms) = args.debounce_ms {
        config.timing.debounce_ms = ms;
    }
    if let Some(path) = args.storage {
        config.allowlist.storage_path = Some(path);
    }

    let directive = config.log_directive(std::env::var("RUST_LOG").ok());
    if let Err(e) = filter_handle.reload(tracing_subscriber::EnvFilter::new(&directive)) {
        warn!("Failed to apply log level '{}': {}", directive, e);
    }

    if !config.general.enabled {
        info!("Assistant is disabled in configuration, exiting");
        return Ok(());
    }

    let page = PageContext::from_url(&args.url)
        .ok_or_else(|| format!("Not a page URL: {}", args.url))?;
    info!("Watching {} ({})", page.host, page.url);

    let storage_path = config
        .allowlist
        .storage_path
        .clone()
        .unwrap_or_else(FileKeyValueStore::default_path);
    let mut store = AllowlistStore::new(Arc::new(FileKeyValueStore::new(storage_path)))
        .with_initial_sites(config.allowlist.initial_sites.clone());
    if let Some(bridge_path) = &config.allowlist.bridge_path {
        info!("Using host allowlist at {:?}", bridge_path);
        let bridge_store = Arc::new(FileKeyValueStore::new(bridge_path.clone()));
        store = store.with_bridge(Arc::new(KeyValueBridge::new(bridge_store)));
    }

    let client = AnalysisClient::new(&config.backend)?;
    match client.health().await {
        Ok(()) => info!("Analysis service reachable at {}", client.base_url()),
        Err(e) => warn!("Analysis service not reachable yet: {}", e),
    }

    let source = HtmlPage::new(page.url.clone(), config.backend.timeout())?;
    let sampler = ContentSampler::new(Arc::new(source), config.sampling.max_sample_chars);

    let player: Arc<dyn AudioPlayer> = if config.playback.player_command.is_empty() {
        Arc::new(NullPlayer)
    } else {
        Arc::new(CommandPlayer::new(
            config.playback.player_command.clone(),
            config.playback.player_args.clone(),
        ))
    };

    let controller = PollController::new(
        page,
        PollConfig::from(&config),
        store,
        sampler,
        Arc::new(client),
    )
    .with_renderer(Arc::new(LogRenderer))
    .with_player(player);

    let handle = controller.handle();
    let mut controller_task = tokio::spawn(controller.run());

    println!("Type `help` for commands, Ctrl+C to stop");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        break;
                    }
                };

                let command = match PanelCommand::parse(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        println!("{}", e);
                        continue;
                    }
                };
                let quit = command == PanelCommand::Quit;

                match panel::execute(&handle, command).await {
                    Ok(output) if !output.is_empty() => println!("{}", output),
                    Ok(_) => {}
                    Err(e) => {
                        error!("{}", e);
                        break;
                    }
                }
                if quit {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
            _ = &mut controller_task => {
                warn!("Controller exited");
                return Ok(());
            }
        }
    }

    // Already stopped if `quit` was handled
    handle.shutdown().await.ok();
    controller_task.await?;

    Ok(())
}
