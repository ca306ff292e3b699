use clap::Parser;
use trade_capture::cli::{Cli, Commands};
use trade_capture::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
        eprintln!("Using default configuration");
        Config::default()
    });

    // Initialize telemetry
    let _telemetry = trade_capture::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Capture(args) => {
            tracing::info!("Starting trade capture");
            args.execute(config).await?;
        }
        Commands::Recover(args) => {
            args.execute(&config)?;
        }
        Commands::Status(args) => {
            args.execute(&config)?;
        }
        Commands::Config => {
            println!("Current configuration:");
            println!(
                "  Feed: {} {} ({})",
                config.feed.exchange,
                config.feed.symbol,
                config.feed.source_id()
            );
            println!(
                "  Buffer: {} items / {} bytes, overflow {:?}",
                config.buffer.max_items, config.buffer.max_bytes, config.buffer.overflow_policy
            );
            println!(
                "  Flush: {} records or {}s",
                config.flush.batch_size, config.flush.max_wait_secs
            );
            println!("  Storage: {}", config.storage.root.display());
            if config.upload.enabled() {
                println!(
                    "  Upload: {:?} prefix={} max_in_flight={}",
                    config.upload.backend, config.upload.prefix, config.upload.max_in_flight
                );
            } else {
                println!("  Upload: disabled");
            }
            println!("  Shutdown grace: {}s", config.shutdown.grace_period_secs);
        }
    }

    Ok(())
}
