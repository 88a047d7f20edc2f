//! autocache CLI - run the caching gateway or inspect its cost model

use anyhow::{Context, Result};
use autocache::{
    build_estimator, AnalyticsRecorder, AppState, CachePlanner, Config, PricingTable, ProxyClient,
    Strategy, TokenizerMode,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "autocache")]
#[command(about = "Caching gateway for the Anthropic Messages API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to a config file (default: ~/.config/autocache/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway (the default when no subcommand is given)
    Serve {
        /// Listen host
        #[arg(long)]
        host: Option<String>,

        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Planning strategy (conservative, moderate, aggressive)
        #[arg(short, long)]
        strategy: Option<Strategy>,

        /// Token estimator backend (exact, heuristic, hybrid)
        #[arg(long)]
        tokenizer: Option<TokenizerMode>,
    },

    /// List supported models and their prices
    Models,

    /// Count tokens in a file with the configured estimator
    Estimate {
        /// Input file
        file: PathBuf,

        /// Estimator backend
        #[arg(long, default_value = "hybrid")]
        tokenizer: TokenizerMode,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path.clone())?,
        None => Config::load()?,
    };

    match cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
        strategy: None,
        tokenizer: None,
    }) {
        Commands::Serve {
            host,
            port,
            strategy,
            tokenizer,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(strategy) = strategy {
                config.cache.strategy = strategy;
            }
            if let Some(mode) = tokenizer {
                config.tokenizer.mode = mode;
            }
            config.validate()?;
            init_logging(&config);
            serve(config).await
        }
        Commands::Models => {
            print_models();
            Ok(())
        }
        Commands::Estimate { file, tokenizer } => estimate(&file, tokenizer),
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.clone()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if config.log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(config: Config) -> Result<()> {
    let estimator = build_estimator(config.tokenizer.mode)
        .context("failed to build the token estimator")?;
    let pricing = Arc::new(PricingTable::new());
    let planner = CachePlanner::new(estimator, pricing, config.cache.strategy)
        .with_limits(config.cache.max_breakpoints, config.cache.token_multiplier);
    let analytics = AnalyticsRecorder::new(config.analytics.history_size, config.cache.strategy);
    let client = ProxyClient::new(config.upstream.base_url.clone());

    if !config.is_api_key_configured() {
        info!("No fallback API key configured; clients must supply their own credentials");
    }

    let address = config.server_address();
    let state = AppState {
        planner: Arc::new(planner),
        client: Arc::new(client),
        analytics,
        config: Arc::new(config),
    };

    let app = autocache::router(state);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;

    info!(address = %address, "autocache gateway listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn print_models() {
    let table = PricingTable::new();
    println!(
        "{:<30} {:>8} {:>8} {:>10} {:>10} {:>8}",
        "Model", "Input", "Output", "Write 5m", "Write 1h", "Read"
    );
    println!("{}", "-".repeat(80));
    for model in table.supported_models() {
        let (pricing, _) = table.lookup(model);
        println!(
            "{:<30} {:>8.2} {:>8.2} {:>10.2} {:>10.2} {:>8.3}",
            pricing.model,
            pricing.input,
            pricing.output,
            pricing.cache_write_5m,
            pricing.cache_write_1h,
            pricing.cache_read
        );
    }
    println!("\nPrices in USD per 1M tokens.");
}

fn estimate(file: &PathBuf, mode: TokenizerMode) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let estimator = build_estimator(mode).context("failed to build the token estimator")?;
    let tokens = estimator.count_tokens(&text);

    println!("File: {}", file.display());
    println!("Backend: {}", mode.as_str());
    println!("Characters: {}", text.chars().count());
    println!(
        "Estimated tokens: {} ({})",
        tokens,
        autocache::pricing::format_tokens(tokens)
    );
    println!(
        "Cacheable on sonnet/opus (>=1024): {}",
        if tokens >= 1024 { "yes" } else { "no" }
    );
    println!(
        "Cacheable on haiku (>=2048): {}",
        if tokens >= 2048 { "yes" } else { "no" }
    );
    Ok(())
}
