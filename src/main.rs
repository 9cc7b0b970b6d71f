use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use claude_usage_badge::{
    models::*,
    services::{
        api_client::ApiClient,
        badge::BadgeProjector,
        key_order::{KeyOrderResolver, Placement},
        load,
        poll_orchestrator::PollOrchestrator,
        sinks::{ConsoleBadge, ConsoleNotifier},
        state_store::FileStateStore,
        USAGE_DATA_KEY,
    },
    ui::StatusView,
};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "claude-usage-badge")]
#[command(about = "Keeps a badge of your Claude plan usage and alerts at 50/75/90%")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Poll interval in minutes (overrides the config file)
    #[arg(short, long)]
    interval: Option<u64>,

    /// Directory holding config, state and badge files
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Verbose output (debug log written to debug.log)
    #[arg(short, long)]
    verbose: bool,

    /// Show version and build information
    #[arg(long)]
    about: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll now and then on every interval, until Ctrl-C
    Monitor,
    /// Run a single poll and exit
    Poll,
    /// Show the stored usage cards
    Status,
    /// Change which bucket drives the badge and alerts
    Reorder {
        #[command(subcommand)]
        action: ReorderAction,
    },
    /// Configure the monitor
    Config {
        /// Set poll interval in minutes
        #[arg(long)]
        interval: Option<u64>,
        /// Set usage API base URL
        #[arg(long)]
        base_url: Option<String>,
        /// Set request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Set cookie file (JSON export or Cookie header line)
        #[arg(long)]
        cookie_file: Option<PathBuf>,
        /// Set organization id, overriding the lastActiveOrg cookie
        #[arg(long)]
        org_id: Option<String>,
    },
}

#[derive(Subcommand)]
enum ReorderAction {
    /// Save a full order, first key becomes primary
    Set {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Move one card next to another in the current order
    Move {
        key: String,
        target: String,
        /// Place after the target instead of before it
        #[arg(long)]
        below: bool,
    },
    /// Forget the saved order
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.about {
        show_about();
        return Ok(());
    }

    if cli.verbose {
        use std::fs::OpenOptions;
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open("debug.log")?;

        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Debug)
            .target(env_logger::Target::Pipe(Box::new(log_file)))
            .init();
    } else {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    let data_dir = cli.data_dir.clone().unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("claude-usage-badge")
    });
    std::fs::create_dir_all(&data_dir)?;

    let mut config = load_or_create_config(&data_dir)?;
    if let Some(minutes) = cli.interval {
        config.poll_interval_minutes = minutes;
    }

    let store = Arc::new(FileStateStore::open(data_dir.join("state.json"))?);

    match cli.command {
        Some(Commands::Monitor) | None => {
            let orchestrator = build_orchestrator(&config, &store, &data_dir)?;
            let changes = store.subscribe();
            let _watcher = match store.watch() {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    log::warn!("Card order changes from other processes will not be picked up: {}", e);
                    None
                }
            };
            let period = Duration::from_secs(config.poll_interval_minutes.max(1) * 60);
            orchestrator.run(period, changes).await?;
        }
        Some(Commands::Poll) => {
            let orchestrator = build_orchestrator(&config, &store, &data_dir)?;
            orchestrator.poll().await;
            show_status(&store).await?;
        }
        Some(Commands::Status) => {
            show_status(&store).await?;
        }
        Some(Commands::Reorder { action }) => {
            reorder(&store, action).await?;
            let orchestrator = build_orchestrator(&config, &store, &data_dir)?;
            orchestrator.reproject_badge().await?;
        }
        Some(Commands::Config {
            interval,
            base_url,
            timeout,
            cookie_file,
            org_id,
        }) => {
            configure_monitor(&data_dir, interval, base_url, timeout, cookie_file, org_id)?;
        }
    }

    Ok(())
}

fn build_orchestrator(
    config: &UserConfig,
    store: &Arc<FileStateStore>,
    data_dir: &Path,
) -> Result<PollOrchestrator> {
    let client = ApiClient::from_config(config)?;
    debug!("API client: {}", client.get_config_info());

    Ok(PollOrchestrator::new(
        Arc::new(client),
        store.clone(),
        Arc::new(ConsoleNotifier),
        Arc::new(ConsoleBadge::new(Some(data_dir.join("badge.json")))),
        BadgeProjector::new(config.badge_palette.clone()),
    ))
}

async fn show_status(store: &FileStateStore) -> Result<()> {
    let state: Option<PersistedState> = load(store, USAGE_DATA_KEY).await?;
    let preference = KeyOrderResolver::load(store).await?;

    println!(
        "{}",
        StatusView::new(state.as_ref(), preference.as_ref()).render(Utc::now())
    );
    if let Some(state) = &state {
        debug!(
            "Last updated {}",
            humantime::format_rfc3339(std::time::SystemTime::from(state.last_updated))
        );
    }
    Ok(())
}

async fn reorder(store: &FileStateStore, action: ReorderAction) -> Result<()> {
    match action {
        ReorderAction::Set { keys } => {
            let keys = keys
                .iter()
                .map(|k| k.parse::<MetricKey>())
                .collect::<Result<Vec<_>>>()?;
            KeyOrderResolver::save(store, &KeyOrder::from(keys)).await?;
            println!("✅ Saved card order");
        }
        ReorderAction::Move { key, target, below } => {
            let key: MetricKey = key.parse()?;
            let target: MetricKey = target.parse()?;

            let state: Option<PersistedState> = load(store, USAGE_DATA_KEY).await?;
            let snapshot = state
                .and_then(|s| s.snapshot)
                .ok_or_else(|| anyhow!("No usage data yet; run a poll before moving cards"))?;
            let preference = KeyOrderResolver::load(store).await?;
            let current = KeyOrderResolver::resolve_snapshot(&snapshot, preference.as_ref());

            let placement = if below { Placement::Below } else { Placement::Above };
            match KeyOrderResolver::move_key(&current, key, target, placement) {
                Some(order) => {
                    KeyOrderResolver::save(store, &KeyOrder::from(order)).await?;
                    println!("✅ Moved {} {} {}", key, if below { "below" } else { "above" }, target);
                }
                None => println!("Nothing to move: {key} and {target} must be different cards with data"),
            }
        }
        ReorderAction::Reset => {
            KeyOrderResolver::clear(store).await?;
            println!("✅ Card order reset to default");
        }
    }
    Ok(())
}

fn configure_monitor(
    data_dir: &Path,
    interval: Option<u64>,
    base_url: Option<String>,
    timeout: Option<u64>,
    cookie_file: Option<PathBuf>,
    org_id: Option<String>,
) -> Result<()> {
    let config_path = data_dir.join("config.json");
    let mut config = load_or_create_config(data_dir)?;

    if let Some(minutes) = interval {
        if minutes == 0 {
            println!("❌ Poll interval must be at least 1 minute");
        } else {
            config.poll_interval_minutes = minutes;
            println!("✅ Set poll interval to: {minutes} minutes");
        }
    }

    if let Some(url) = base_url {
        println!("✅ Set API base URL to: {url}");
        config.api_base_url = url;
    }

    if let Some(seconds) = timeout {
        config.request_timeout_seconds = seconds;
        println!("✅ Set request timeout to: {seconds} seconds");
    }

    if let Some(path) = cookie_file {
        println!("✅ Set cookie file to: {}", path.display());
        config.cookie_file = Some(path);
    }

    if let Some(id) = org_id {
        if id.is_empty() {
            config.organization_id = None;
            println!("✅ Cleared organization override");
        } else {
            println!("✅ Set organization id to: {id}");
            config.organization_id = Some(id);
        }
    }

    let content = serde_json::to_string_pretty(&config)?;
    std::fs::write(&config_path, content)?;
    Ok(())
}

fn load_or_create_config(data_dir: &Path) -> Result<UserConfig> {
    let config_path = data_dir.join("config.json");

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        let config = UserConfig::default();
        let content = serde_json::to_string_pretty(&config)?;
        std::fs::write(&config_path, content)?;
        Ok(config)
    }
}

fn show_about() {
    use colored::Colorize;

    println!("{}", "📱 Claude Usage Badge".bright_cyan().bold());
    println!();
    println!("{}", "📋 Version Information:".bright_yellow().bold());
    println!("  Version: {}", env!("CARGO_PKG_VERSION").bright_green());
    println!("  Built: {}", env!("USAGE_BADGE_BUILD_TIME"));
    println!("  Commit: {}", env!("USAGE_BADGE_GIT_HASH"));
    println!();

    println!("{}", "👨‍💻 Author:".bright_yellow().bold());
    println!("  Chris Phillips, Email: {}", "chris@adiuco.com".bright_blue());
    println!();

    println!("{}", "💡 Usage:".bright_green().bold());
    println!("  claude-usage-badge config --cookie-file ~/claude-cookies.json");
    println!("  claude-usage-badge monitor");
    println!("  claude-usage-badge reorder move seven_day_opus five_hour");
}
