use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use sandbox_core::{load_config, SandboxConfig, SandboxHostFactory};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "sandbox-host", author, version = "0.1.0", about = "Runs untrusted work in disposable containers")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, default_value = "sandbox.yaml", help = "Path to the YAML configuration file")]
    config: PathBuf,

    #[clap(long, short, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pull every configured image
    Pull,
    /// Run one invocation and print the result as JSON
    Run {
        #[clap(long, help = "Id of the container configuration to run")]
        image: String,

        #[clap(long, help = "File whose contents are passed to the container as its request")]
        request_file: Option<PathBuf>,

        #[clap(long = "env", value_parser = parse_env_var, help = "Extra environment variable, NAME=VALUE (repeatable)")]
        env: Vec<(String, String)>,
    },
    /// Load and validate the configuration
    Validate,
}

fn parse_env_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{}'", raw)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries the JSON result, so logs go to stderr
    env_logger::Builder::new()
        .filter_level(cli.log_level.parse().unwrap_or(LevelFilter::Info))
        .target(env_logger::Target::Stderr)
        .init();

    log::info!("Loading configuration from file: {}", cli.config.display());
    let config = load_config(&cli.config)
        .await
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    match cli.command {
        Commands::Validate => validate(&config),
        Commands::Pull => pull(config).await,
        Commands::Run {
            image,
            request_file,
            env,
        } => run(config, &image, request_file, env.into_iter().collect()).await,
    }
}

fn validate(config: &SandboxConfig) -> Result<()> {
    println!("Configuration is valid. Containers:");
    for container in &config.containers {
        println!("  {} -> {}", container.id, container.image_name);
    }
    Ok(())
}

async fn pull(config: SandboxConfig) -> Result<()> {
    let factory = SandboxHostFactory::from_config(config)?;
    factory.warm_up().await?;
    log::info!("Pulled {} image(s)", factory.container_ids().len());
    Ok(())
}

async fn run(
    config: SandboxConfig,
    image: &str,
    request_file: Option<PathBuf>,
    environment: HashMap<String, String>,
) -> Result<()> {
    let request = match request_file {
        Some(path) => Some(
            tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read request file {}", path.display()))?,
        ),
        None => None,
    };

    let factory = SandboxHostFactory::from_config(config)?;
    let host = factory.create_host(image)?;
    let result = host.run_once(request.as_deref(), &environment).await?;

    if !result.completed {
        log::warn!("Container for {} did not complete within its lifetime", image);
    }
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
