use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use viva_agent::{Evaluator, ModelSettings, SessionBackends, parse_transcript};
use viva_core::config::{Config, LoggingConfig};
use viva_gateway::GatewayState;
use viva_providers::{Credentials, FailoverProvider};

#[derive(Parser)]
#[command(
    name = "viva",
    about = "Automated spoken screening interviews over a telephony media stream",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the media-stream gateway
    Serve {
        /// Port to listen on (default: 8765)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Evaluate a stored interview transcript
    Evaluate {
        /// Transcript file with "Interviewer:" / "Candidate:" lines
        #[arg(long)]
        transcript: PathBuf,

        /// File containing the job description
        #[arg(long)]
        job: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Check the configuration for problems
    Validate,
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose {
            "debug".to_string()
        } else {
            logging.level.clone().unwrap_or_else(|| "info".to_string())
        };
        let mut directives = vec![level];
        directives.extend(logging.filters.iter().cloned());
        EnvFilter::new(directives.join(","))
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (logging.format.as_str(), logging.output.as_str()) {
        ("json", "stdout") => builder.json().with_writer(std::io::stdout).init(),
        ("json", _) => builder.json().with_writer(std::io::stderr).init(),
        (_, "stdout") => builder.with_writer(std::io::stdout).init(),
        _ => builder.with_writer(std::io::stderr).init(),
    }
}

/// Print validation findings; returns false if any are errors.
fn report_validation(config: &Config) -> bool {
    let (warnings, errors) = config.validate();
    for warning in &warnings {
        eprintln!("warning: {warning}");
    }
    for error in &errors {
        eprintln!("error: {error}");
    }
    errors.is_empty()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    init_logging(&config.logging.clone().unwrap_or_default(), cli.verbose);

    match cli.command {
        Commands::Serve { port, bind } => {
            if !report_validation(&config) {
                anyhow::bail!("Refusing to start with an invalid configuration");
            }
            let port = port.unwrap_or_else(|| config.gateway_port());
            let bind = bind.unwrap_or_else(|| config.bind_addr());

            let backends = SessionBackends::from_config(&config)?;
            #[allow(unused_mut)]
            let mut state = GatewayState::new(Arc::new(config), backends);
            #[cfg(feature = "metrics")]
            {
                state.prometheus = Some(viva_gateway::metrics::install_prometheus_recorder()?);
            }

            tracing::info!("Starting Viva gateway on {bind}:{port}");
            viva_gateway::start_gateway(Arc::new(state), &bind, port).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Validate => {
                println!("Config: {}", config_path.display());
                if !report_validation(&config) {
                    anyhow::bail!("Configuration has errors");
                }
                println!("Configuration OK");
            }
        },
        Commands::Evaluate { transcript, job } => {
            let text = std::fs::read_to_string(&transcript)
                .with_context(|| format!("Failed to read {}", transcript.display()))?;
            let job_description = match job {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => config.session().default_job_description,
            };

            let history = parse_transcript(&text);
            tracing::info!(turns = history.len(), "Evaluating stored transcript");

            let provider = Arc::new(FailoverProvider::from_config(&config)?);
            let evaluator = Evaluator::new(
                provider,
                Credentials::None,
                ModelSettings::evaluation_from_config(&config),
            );
            let result = evaluator.evaluate(&job_description, &history).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
