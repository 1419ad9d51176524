mod activity;
mod buffer;
mod config;
mod discovery;
mod offset;
mod record;
mod shipping;
mod stats;
mod supervisor;
mod tailer;
mod watcher;
mod wire;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use config::Config;
use supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "thinkt-exporter", version, about = "Local trace-export agent for AI coding assistant sessions")]
struct Cli {
    /// Project-local config directory to read `.thinkt/collector.json` from (default: current directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Collector URL override (default: discovered per the resolution cascade)
    #[arg(long, global = true)]
    collector_url: Option<String>,

    /// Spill-buffer directory override (default: ~/.thinkt/export-buffer)
    #[arg(long, global = true)]
    buffer_dir: Option<PathBuf>,

    /// Suppress non-error output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the watch-and-export daemon.
    Run,

    /// Scan configured roots once, ship or buffer, drain once, then exit.
    ExportOnce,

    /// Print resolved configuration without starting the daemon.
    Status,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let project_dir = cli.config.clone().unwrap_or_else(|| PathBuf::from("."));
    let config = Config::load(
        &project_dir,
        cli.collector_url.as_deref(),
        cli.buffer_dir.as_deref(),
        cli.quiet,
    )?;

    let _guard;
    match &cli.command {
        Commands::Run => {
            let log_dir = config.log_dir();
            std::fs::create_dir_all(&log_dir)?;
            let file_appender = tracing_appender::rolling::daily(&log_dir, "thinkt-exporter.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            _guard = Some(guard);

            let default_level = if cli.quiet { "warn" } else { "info" };
            tracing_subscriber::fmt()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_env_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(format!("thinkt_exporter={default_level}").parse()?),
                )
                .init();
        }
        _ => {
            _guard = None;
            let default_level = if cli.quiet { "warn" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(format!("thinkt_exporter={default_level}").parse()?),
                )
                .init();
        }
    }

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Run => rt.block_on(cmd_run(config, cli.quiet)),
        Commands::ExportOnce => rt.block_on(cmd_export_once(config, cli.quiet)),
        Commands::Status => cmd_status(&config),
    }
}

fn print_banner(config: &Config, quiet: bool) {
    if quiet {
        return;
    }
    eprintln!("thinkt-exporter");
    for watch_dir in &config.watch_dirs {
        eprintln!("  watching [{}] {}", watch_dir.producer.as_str(), watch_dir.root.display());
    }
    match &config.collector.url {
        Some(url) => eprintln!("  collector: {} (via {:?})", url, config.collector.origin),
        None => eprintln!("  collector: none configured, running buffer-only"),
    }
    eprintln!("  buffer dir: {}", config.buffer_dir.display());
}

async fn cmd_run(config: Config, quiet: bool) -> anyhow::Result<()> {
    print_banner(&config, quiet);

    let supervisor = Supervisor::new(config)?;
    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_cancel.cancel();
    });

    supervisor.run(cancel).await
}

async fn cmd_export_once(config: Config, quiet: bool) -> anyhow::Result<()> {
    print_banner(&config, quiet);
    let supervisor = Supervisor::new(config)?;
    let cancel = CancellationToken::new();
    supervisor.run_once(cancel).await?;

    let stats = supervisor.stats().snapshot();
    if !quiet {
        eprintln!(
            "shipped={} failed={} malformed_lines={} buffered={}",
            stats.shipped,
            stats.failed,
            stats.malformed_lines,
            supervisor.buffer().count(),
        );
    }
    Ok(())
}

fn cmd_status(config: &Config) -> anyhow::Result<()> {
    println!("watch_dirs:");
    for watch_dir in &config.watch_dirs {
        println!("  [{}] {}", watch_dir.producer.as_str(), watch_dir.root.display());
    }
    match &config.collector.url {
        Some(url) => println!("collector: {} (origin: {:?})", url, config.collector.origin),
        None => println!("collector: none configured"),
    }
    println!("buffer_dir: {}", config.buffer_dir.display());

    let buffer = buffer::DiskSpillBuffer::new(&config.buffer_dir, config.max_buffer_mb * 1024 * 1024)?;
    println!("buffer_count: {}", buffer.count());
    println!("buffer_size_bytes: {}", buffer.size()?);

    Ok(())
}
