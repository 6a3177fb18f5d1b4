use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use wgveil::{config::Config, logging, relay::MaskingMode, relay::UdpRelay};

/// WGVEIL WireGuard obfuscation relay
#[derive(Parser)]
#[command(name = "wgveil")]
#[command(about = "A WireGuard obfuscating UDP relay with STUN traffic masking")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay
    Relay {
        /// Path to the configuration file
        #[arg(long, default_value = "config/wgveil.yml")]
        config: PathBuf,

        /// Loopback port to listen on (overrides config; 0 = ephemeral)
        #[arg(long)]
        listen_port: Option<u16>,

        /// Remote relay endpoint as host:port (overrides config)
        #[arg(long)]
        remote: Option<String>,

        /// Obfuscation key (overrides config; or use WGVEIL_KEY env var)
        #[arg(long)]
        key: Option<String>,

        /// Wrap obfuscated packets in STUN Data Indications
        #[arg(long)]
        stun: bool,
    },
    /// Write a default configuration file
    GenConfig {
        /// Path to write the configuration file to
        #[arg(long, default_value = "config/wgveil.yml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Relay {
            config,
            listen_port,
            remote,
            key,
            stun,
        } => {
            let mut config = Config::load(&config).await?;
            if let Some(port) = listen_port {
                config.listen_port = port;
            }
            if let Some(remote) = remote {
                config.remote = remote;
            }
            if let Some(key) = key.or_else(|| std::env::var("WGVEIL_KEY").ok()) {
                config.key = key;
            }
            if stun {
                config.masking = MaskingMode::Stun;
            }

            logging::init_logging(
                &config.log_level,
                config.log_theme_path.as_deref(),
                config.log_to_file,
                config.log_file_path.as_deref(),
            )
            .await?;

            if config.key.is_empty() {
                anyhow::bail!("No obfuscation key configured (set `key` or pass --key)");
            }
            if config.remote.is_empty() {
                anyhow::bail!("No remote endpoint configured (set `remote` or pass --remote)");
            }

            let mut relay = UdpRelay::new(config.relay_settings())
                .context("Failed to build relay from configuration")?;
            let port = relay.start().await.context("Failed to start relay")?;
            tracing::info!("Point your WireGuard endpoint at 127.0.0.1:{}", port);

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received, stopping relay");
            relay.stop();
        }
        Commands::GenConfig { config } => {
            let defaults = Config::default();
            defaults
                .save(&config)
                .await
                .with_context(|| format!("Failed to write {}", config.display()))?;
            println!("Wrote default configuration to {}", config.display());
        }
    }

    Ok(())
}
