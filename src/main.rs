// Allow dead code for functions that are part of the API surface but not
// used in all code paths
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod aggregator;
mod browser;
mod chrome;
mod classifier;
mod cli;
mod config;
mod dedup;
mod events;
mod export;
mod pool;
mod proxy;
mod record;
mod run;
mod session;
mod stealth;
mod task;

use aggregator::SinkConfig;
use chrome::{ChromeEngine, ChromeEngineConfig};
use cli::Cli;
use config::{AppConfig, ConfigError};
use events::Severity;
use proxy::ProxyPool;
use run::{start_run, RunOptions};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    // Handle --init flag first (before any other processing)
    if cli.init {
        match AppConfig::create_default_config() {
            Ok(path) => {
                println!("✅ Created default configuration file at: {}", path.display());
                println!("   Edit this file to customize settings, then run placescout again.");
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("❌ Failed to create configuration file: {}", e);
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = cli.validate() {
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }

    // Load configuration
    let app_config = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(ConfigError::FileNotFound(path)) => {
            // Config not found - prompt to create if interactive
            match AppConfig::prompt_create_config() {
                Ok(Some(created_path)) => {
                    println!(
                        "✅ Created default configuration file at: {}",
                        created_path.display()
                    );
                    println!("   Edit this file to customize settings, then run placescout again.");
                    std::process::exit(0);
                }
                Ok(None) => {
                    eprintln!("❌ Configuration file not found at: {}", path.display());
                    eprintln!("   Run with --init to create a default configuration file.");
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("❌ Failed to create configuration file: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let queries = collect_queries(&cli)?;
    let options = build_options(&cli, &app_config)?;

    let proxies = match &cli.proxy_file {
        Some(path) => ProxyPool::from_file(Path::new(path))?,
        None => ProxyPool::default(),
    };

    let engine = Arc::new(ChromeEngine::new(ChromeEngineConfig {
        headless: if cli.headed { false } else { cli.headless || app_config.scraper.headless },
        viewport: (app_config.browser.viewport_width, app_config.browser.viewport_height),
        nav_timeout: app_config.nav_timeout(),
    }));

    println!(
        "🔍 Starting extraction: {} queries, {} workers",
        queries.len(),
        pool::clamp_workers(options.num_workers)
    );

    let handle = start_run(queries, options, engine, proxies)?;
    let mut events = handle.events();

    // First Ctrl+C drains the backlog and lets in-flight tasks finish;
    // a second one cancels them.
    let interrupts = tokio::spawn({
        let stopper = handle.stopper();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n⚠️  Interrupt received, finishing in-flight tasks (Ctrl+C again to abort)");
                stopper.stop(true).await;
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n⚠️  Aborting in-flight tasks");
                stopper.stop(false).await;
            }
        }
    });

    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let summary = handle.wait().await?;
    interrupts.abort();
    printer.abort();

    println!();
    println!("📊 Run complete:");
    println!("   Succeeded: {}", summary.succeeded);
    println!("   Failed:    {}", summary.failed);
    println!("   Unique records: {}", summary.total_unique_records);
    if let Some(path) = &summary.combined_path {
        println!("   Combined results: {}", path.display());
    }

    if summary.succeeded == 0 && summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("placescout={}", default_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Queries from --query flags plus the optional input file, in that order.
fn collect_queries(cli: &Cli) -> Result<Vec<String>> {
    let mut queries = cli.query.clone();
    if let Some(path) = &cli.input_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read query file: {}", path))?;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            queries.push(line.to_string());
        }
    }
    if queries.is_empty() {
        anyhow::bail!("no queries found (query file empty?)");
    }
    debug!(count = queries.len(), "collected queries");
    Ok(queries)
}

fn build_options(cli: &Cli, config: &AppConfig) -> Result<RunOptions> {
    let format = match &cli.output_format {
        Some(s) => s.parse().map_err(anyhow::Error::msg)?,
        None => config.export_format(),
    };
    let directory = cli
        .output_dir
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&config.output.directory));

    Ok(RunOptions {
        num_workers: cli.workers.unwrap_or(config.scraper.num_workers),
        max_results_per_task: cli.max_results.unwrap_or(config.scraper.max_results_per_task),
        session_timeout: config.session_timeout(),
        session: config.session_config(),
        use_proxy: cli.proxy_file.is_some() || config.scraper.use_proxy,
        sink: SinkConfig { directory, format },
    })
}

fn print_event(event: &events::RunEvent) {
    let icon = match event.severity {
        Severity::Debug => return,
        Severity::Info => "•",
        Severity::Warn => "⚠️ ",
        Severity::Error => "❌",
    };
    match (event.worker_id, event.task_id) {
        (Some(worker), Some(task)) => {
            println!("{} [worker {}] [{}] {}", icon, worker, task, event.message)
        }
        _ => println!("{} {}", icon, event.message),
    }
}
