//! genrelay CLI — run the generation relay or send a one-off prompt.
//!
//! Run `genrelay config init` to write a starter config, then `genrelay serve`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::*;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use genrelay_core::config::GenRelayConfig;
use genrelay_core::progress::{InMemoryProgressStore, ProgressStore};
use genrelay_core::provider::{ProviderConfig, ProviderKind};
use genrelay_hub::api::{ApiState, code_prompt};
use genrelay_hub::learning::LearningCoach;
use genrelay_hub::metrics::new_metrics;
use genrelay_hub::middleware::RateLimiter;
use genrelay_hub::providers::{build_chains, build_dispatcher};
use genrelay_hub::storage::SqliteProgressStore;

// ─── CLI Definition ────────────────────────────────────────

/// genrelay — forward prompts through an ordered chain of AI providers
#[derive(Parser)]
#[command(name = "genrelay", version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to the user config dir)
    #[arg(short, long, global = true, env = "GENRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Write logs to a daily rolling file in this directory instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 🌐 Start the REST API server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// ❓ Send a single prompt through the fallback chain
    Ask {
        /// The prompt to send
        prompt: String,

        /// Per-provider timeout in seconds (overrides config)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Ask for code only, without explanations
        #[arg(long)]
        code: bool,
    },

    /// 🔗 Show the configured fallback chain
    Providers,

    /// ⚙️  Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ─── Main ──────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref())?;

    let config_path = cli.config.unwrap_or_else(GenRelayConfig::default_path);

    match cli.command {
        Commands::Serve { host, port } => {
            let config = GenRelayConfig::load(&config_path)?;
            run_serve(config, host, port).await?;
        }
        Commands::Ask {
            prompt,
            timeout,
            code,
        } => {
            let mut config = GenRelayConfig::load(&config_path)?;
            if let Some(secs) = timeout {
                config.dispatch.attempt_timeout_secs = secs.max(1);
            }
            let prompt = if code { code_prompt(&prompt) } else { prompt };
            run_ask(&config, &prompt).await?;
        }
        Commands::Providers => {
            let config = GenRelayConfig::load(&config_path)?;
            show_providers(&config);
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = GenRelayConfig::load(&config_path)?;
                println!("{}", toml_preview(&config)?);
            }
            ConfigAction::Path => println!("{}", config_path.display()),
            ConfigAction::Init { force } => init_config(&config_path, force)?,
        },
    }

    Ok(())
}

fn init_tracing(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,genrelay_core=debug,genrelay_hub=debug"));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "genrelay.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("{}", format!("  ⚡ genrelay v{}", version).cyan().bold());
    println!("{}", "  ordered fallback over AI providers".dimmed());
    println!();
}

// ─── Serve (REST API) ──────────────────────────────────────

async fn run_serve(
    config: GenRelayConfig,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    let chains = build_chains(&config)?;
    if chains.text.is_empty() {
        println!(
            "  {} no providers configured; every generate request will fail",
            "Warning:".yellow().bold()
        );
    }

    let store: Arc<dyn ProgressStore> = match &config.learning.db_path {
        Some(path) => Arc::new(SqliteProgressStore::open(path)?),
        None => Arc::new(InMemoryProgressStore::new()),
    };

    print_banner();
    println!("  {} {}", "Mode:".dimmed(), "🌐 REST API Server".green().bold());
    println!(
        "  {} {}",
        "Chain:".dimmed(),
        chains.text.provider_names().join(" → ").cyan()
    );
    for (label, chain) in [("Image:", &chains.image), ("Vision:", &chains.vision)] {
        if !chain.is_empty() {
            println!("  {} {}", label.dimmed(), chain.provider_names().join(" → ").cyan());
        }
    }
    println!(
        "  {} {}",
        "Endpoint:".dimmed(),
        format!("http://{}:{}", host, port).green().bold()
    );
    println!();
    println!("  {}", "Example:".bold());
    println!(
        "    {}",
        format!(
            "curl -X POST http://{}:{}/v1/generate -H 'Content-Type: application/json' -d '{{\"prompt\": \"hello\"}}'",
            host, port
        )
        .dimmed()
    );
    println!();

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
                shutdown.cancel();
            }
        });
    }

    let state = ApiState {
        chains,
        coach: LearningCoach::new(store),
        metrics: new_metrics(),
        request_timeout: config.server.request_timeout(),
        rate_limiter: RateLimiter::per_minute(config.server.rate_limit_per_minute),
        shutdown,
    };

    genrelay_hub::api::start_server(state, &host, port).await
}

// ─── Ask ───────────────────────────────────────────────────

async fn run_ask(config: &GenRelayConfig, prompt: &str) -> anyhow::Result<()> {
    let dispatcher = build_dispatcher(config)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let start = std::time::Instant::now();
    let generation = dispatcher.dispatch_with_cancel(prompt, &cancel).await?;

    println!("{}", generation.text);
    eprintln!(
        "{}",
        format!(
            "— {} (attempt {}, {:.1}s)",
            generation.provider,
            generation.attempts,
            start.elapsed().as_secs_f64()
        )
        .dimmed()
    );
    Ok(())
}

// ─── Providers / Config ────────────────────────────────────

fn show_providers(config: &GenRelayConfig) {
    print_banner();
    if config.providers.is_empty() {
        println!("  {}", "No providers configured. Run `genrelay config init`.".yellow());
        return;
    }

    println!(
        "  {} {}s per attempt",
        "Timeout:".dimmed(),
        config.dispatch.attempt_timeout_secs
    );
    print_chain(&config.providers);

    for (label, chain) in [
        ("Image chain:", &config.image_providers),
        ("Vision chain:", &config.vision_providers),
    ] {
        if !chain.is_empty() {
            println!();
            println!("  {}", label.bold());
            print_chain(chain);
        }
    }
}

fn print_chain(providers: &[ProviderConfig]) {
    for (i, p) in providers.iter().enumerate() {
        let key = match (p.kind, p.resolved_api_key()) {
            (ProviderKind::Ollama, _) => "no key needed".dimmed(),
            (_, Some(_)) => "key ✓".green(),
            (_, None) => "key missing".red(),
        };
        println!(
            "  {}. {} {} {}",
            i + 1,
            p.display_name().cyan().bold(),
            p.api_base().dimmed(),
            key
        );
    }
}

fn toml_preview(config: &GenRelayConfig) -> anyhow::Result<String> {
    let mut redacted = config.clone();
    for p in redacted
        .providers
        .iter_mut()
        .chain(redacted.image_providers.iter_mut())
        .chain(redacted.vision_providers.iter_mut())
    {
        if p.api_key.is_some() {
            p.api_key = Some("********".to_string());
        }
    }
    Ok(toml::to_string_pretty(&redacted)?)
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    let mut config = GenRelayConfig::default();
    config.providers = vec![
        ProviderConfig::new(ProviderKind::Groq, "llama-3.3-70b-versatile"),
        ProviderConfig::new(ProviderKind::Gemini, "gemini-2.0-flash"),
        ProviderConfig::new(ProviderKind::OpenRouter, "deepseek/deepseek-chat"),
    ];
    config.save(path)?;

    println!("  {} {}", "✓ Wrote".green(), path.display());
    println!(
        "  {}",
        "Set GROQ_API_KEY, GEMINI_API_KEY and OPENROUTER_API_KEY, or put api_key in the file.".dimmed()
    );
    Ok(())
}
