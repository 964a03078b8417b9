//! Thinkswitch daemon - routes virtual Qwen3.5 model names to one backend

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use thinkswitch::config::Config;
use thinkswitch::error::Result;
use thinkswitch::proxy::ProxyServer;
use thinkswitch::registry::ModelRegistry;

/// Thinkswitch - one backend model, four virtual personalities
#[derive(Parser)]
#[command(name = "thinkswitch")]
#[command(about = "A proxy that maps virtual model names to sampling profiles and thinking mode")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true, env = "THINKSWITCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log verbosity; RUST_LOG takes precedence when set
    #[arg(
        long,
        global = true,
        value_enum,
        default_value = "info",
        env = "THINKSWITCH_LOG_LEVEL"
    )]
    pub log_level: LogLevel,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the proxy server (default command)
    #[command(name = "serve")]
    Serve,
    /// Validate the configuration and print the virtual models
    #[command(name = "check-config")]
    CheckConfig,
}

/// Values that take precedence over the config file
#[derive(Args, Debug, Default)]
pub struct Overrides {
    /// Address to listen on, e.g. 0.0.0.0:9000
    #[arg(long, env = "THINKSWITCH_LISTEN")]
    pub listen: Option<String>,

    /// Backend base URL, e.g. http://127.0.0.1:8000
    #[arg(long, env = "THINKSWITCH_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Seconds allowed for establishing a backend connection
    #[arg(long, value_name = "SECS", env = "THINKSWITCH_CONNECT_TIMEOUT_SECS")]
    pub connect_timeout_secs: Option<u64>,

    /// Model name the backend serves
    #[arg(long, env = "THINKSWITCH_SERVED_MODEL")]
    pub served_model: Option<String>,

    /// Virtual name for thinking mode, general tasks
    #[arg(long, env = "THINKSWITCH_THINKING_GENERAL")]
    pub thinking_general: Option<String>,

    /// Virtual name for thinking mode, coding tasks
    #[arg(long, env = "THINKSWITCH_THINKING_CODING")]
    pub thinking_coding: Option<String>,

    /// Virtual name for instant mode, general tasks
    #[arg(long, env = "THINKSWITCH_INSTRUCT_GENERAL")]
    pub instruct_general: Option<String>,

    /// Virtual name for instant mode, reasoning tasks
    #[arg(long, env = "THINKSWITCH_INSTRUCT_REASONING")]
    pub instruct_reasoning: Option<String>,

    /// Overwrite client sampling values instead of only filling gaps
    #[arg(long, value_name = "BOOL", env = "THINKSWITCH_ENFORCE_SAMPLING_PARAMS")]
    pub enforce_sampling_params: Option<bool>,

    /// Move reasoning text into an empty content field for instant models
    #[arg(long, value_name = "BOOL", env = "THINKSWITCH_FIX_MISPLACED_CONTENT")]
    pub fix_misplaced_content: Option<bool>,

    /// Bytes of an incomplete SSE event held before flushing it raw
    #[arg(long, value_name = "BYTES", env = "THINKSWITCH_STREAM_WATERMARK_BYTES")]
    pub stream_watermark_bytes: Option<usize>,

    /// Seconds in-flight requests get to finish on shutdown
    #[arg(long, value_name = "SECS", env = "THINKSWITCH_SHUTDOWN_GRACE_SECS")]
    pub shutdown_grace_secs: Option<u64>,
}

impl Overrides {
    fn apply(&self, config: &mut Config) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        set(&mut config.proxy.listen_addr, &self.listen);
        set(&mut config.proxy.backend_url, &self.backend_url);
        set(&mut config.proxy.connect_timeout_secs, &self.connect_timeout_secs);
        set(&mut config.proxy.shutdown_grace_secs, &self.shutdown_grace_secs);
        set(&mut config.models.served_model, &self.served_model);
        set(&mut config.models.thinking_general, &self.thinking_general);
        set(&mut config.models.thinking_coding, &self.thinking_coding);
        set(&mut config.models.instruct_general, &self.instruct_general);
        set(&mut config.models.instruct_reasoning, &self.instruct_reasoning);
        set(&mut config.sampling.enforce, &self.enforce_sampling_params);
        set(
            &mut config.rectifier.fix_misplaced_content,
            &self.fix_misplaced_content,
        );
        set(
            &mut config.rectifier.stream_watermark_bytes,
            &self.stream_watermark_bytes,
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Debug plus full request bodies
    Complete,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn directives(self) -> &'static str {
        match self {
            LogLevel::Complete => "info,thinkswitch=trace,tower_http=debug",
            LogLevel::Debug => "info,thinkswitch=debug,tower_http=debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let mut config = Config::load(cli.config.as_deref())?;
    cli.overrides.apply(&mut config);
    config.validate()?;
    tracing::debug!("Config loaded: {:?}", config);

    let registry = ModelRegistry::from_config(&config.models)?;

    match cli.command {
        None | Some(Command::Serve) => serve(config, registry).await,
        Some(Command::CheckConfig) => {
            check_config(&config, &registry);
            Ok(())
        }
    }
}

fn init_logging(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directives()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(config: Config, registry: ModelRegistry) -> Result<()> {
    tracing::info!("Starting thinkswitch");

    let proxy = ProxyServer::new(config, Arc::new(registry));
    proxy.serve().await?;

    tracing::info!("Thinkswitch stopped");
    Ok(())
}

fn check_config(config: &Config, registry: &ModelRegistry) {
    println!("Configuration OK");
    println!("  listen:        {}", config.proxy.listen_addr);
    println!("  backend:       {}", config.proxy.backend_url);
    println!("  served model:  {}", registry.served_model());
    println!("  enforce:       {}", config.sampling.enforce);
    println!();
    for model in registry.models() {
        let p = &model.profile;
        println!(
            "  {:<20} {:<18} thinking={:<5} temperature={} top_p={} top_k={} min_p={} presence_penalty={} repetition_penalty={}",
            model.name,
            model.kind.as_str(),
            model.thinking,
            p.temperature,
            p.top_p,
            p.top_k,
            p.min_p,
            p.presence_penalty,
            p.repetition_penalty,
        );
    }
}
