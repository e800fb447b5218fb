use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pghealth::config::{Config, LoggingConfig};
use pghealth::connection::{url, Host};
use pghealth::PgHealth;

#[derive(Parser)]
#[command(name = "pghealth")]
#[command(about = "Structural and performance health checks for PostgreSQL clusters")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "pghealth team")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured diagnostics against the cluster
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/pghealth.toml")]
        config: PathBuf,
    },
    /// Show or reset the statistics counters used by usage-based rules
    Stats {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/pghealth.toml")]
        config: PathBuf,
        /// Reset statistics on every host instead of showing the last reset
        #[arg(long)]
        reset: bool,
    },
    /// Show the hosts parsed from a connection string
    Hosts {
        /// Multi-host connection string
        #[arg(short, long)]
        url: String,
    },
    /// Generate an example configuration file
    Config {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => run_checks(config).await?,
        Commands::Stats { config, reset } => manage_statistics(config, reset).await?,
        Commands::Hosts { url } => show_hosts(&url)?,
        Commands::Config { output } => generate_config(output)?,
        Commands::Validate { config } => validate_config(config)?,
        Commands::Version => show_version(),
    }

    Ok(())
}

async fn run_checks(config_path: PathBuf) -> Result<()> {
    let config = Config::load_from_file(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    init_logging(&config.logging)?;
    info!("Starting pghealth v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {:?}", config_path);

    let report = PgHealth::new(config)
        .run()
        .await
        .context("Health check failed")?;
    print!("{}", report);
    info!("Total violations: {}", report.total());

    Ok(())
}

async fn manage_statistics(config_path: PathBuf, reset: bool) -> Result<()> {
    let config = Config::load_from_file(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    init_logging(&config.logging)?;

    let checker = PgHealth::new(config);
    if reset {
        let done = checker
            .reset_statistics()
            .await
            .context("Statistics reset failed")?;
        if !done {
            anyhow::bail!("Statistics were not reset on every host");
        }
        println!("Statistics reset on every host");
    } else {
        match checker
            .last_stats_reset_timestamp()
            .await
            .context("Cannot read last statistics reset")?
        {
            Some(reset) => println!("Last statistics reset on primary: {}", reset.to_rfc3339()),
            None => println!("Statistics have never been reset on primary"),
        }
    }

    Ok(())
}

fn show_hosts(pg_url: &str) -> Result<()> {
    for line in host_lines(pg_url)? {
        println!("{}", line);
    }
    Ok(())
}

/// One line per parsed host followed by the merged primary URL
fn host_lines(pg_url: &str) -> Result<Vec<String>> {
    let per_host = url::extract_url_for_each_host(pg_url)?;
    let mut lines = Vec::with_capacity(per_host.len() + 1);
    for (address, host_url) in &per_host {
        let host = Host::of_url(host_url)?;
        lines.push(format!(
            "{} (may be primary: {}) {}",
            address,
            host.may_be_primary(),
            host.url()
        ));
    }
    lines.push(format!(
        "Primary URL: {}",
        url::build_common_url_to_primary(per_host.iter().map(|(_, host_url)| host_url))?
    ));
    Ok(lines)
}

fn generate_config(output: PathBuf) -> Result<()> {
    println!("Generating configuration file: {:?}", output);

    Config::create_example_config(&output).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  pghealth check --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    let config = Config::load_from_file(&config_path).context("Configuration file is invalid")?;
    println!("✓ Configuration file is valid");
    println!("  Cluster urls: {:?}", config.cluster.urls);
    println!("  Schema: {}", config.checks.schema);
    println!(
        "  Diagnostics: {}",
        config.checks.enabled_diagnostics().len()
    );

    Ok(())
}

fn show_version() {
    println!("pghealth v{}", env!("CARGO_PKG_VERSION"));
    println!("PostgreSQL cluster health checks");
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if logging.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
