use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use singbox_subparser::generator::{generate_all, render_fragment};
use singbox_subparser::settings::{load_normalized, save_parser_config};
use singbox_subparser::utils::http::{HttpFetcher, HttpFetcherConfig};
use singbox_subparser::{LogContext, LogLevel, SourceProcessor};

/// Convert proxy subscriptions into sing-box outbounds
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the ParserConfig JSON document
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Fail on schema problems instead of repairing them
    #[arg(long)]
    strict: bool,

    /// Write the outbounds here instead of stdout
    #[arg(short, long, value_name = "OUTPUT_FILE")]
    output: Option<PathBuf>,

    /// Per-subscription fetch timeout in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 15)]
    timeout: u64,

    /// Proxy used to fetch subscriptions, e.g. http://127.0.0.1:8080
    #[arg(long, value_name = "URL")]
    proxy: Option<String>,

    /// Pipeline verbosity (off, error, warn, info, verbose, trace);
    /// defaults to the SINGBOX_DEBUG environment variable
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// Save the normalized ParserConfig back to the config file
    #[arg(long)]
    write_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = args.log_level.unwrap_or_else(LogLevel::from_env);
    env_logger::init_from_env(Env::default().default_filter_or(level.env_filter()));

    let config = load_normalized(&args.config, args.strict)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if args.write_config {
        save_parser_config(&args.config, &config)
            .with_context(|| format!("saving {}", args.config.display()))?;
    }

    let fetcher = HttpFetcher::new(&HttpFetcherConfig {
        timeout: Duration::from_secs(args.timeout),
        proxy: args.proxy.clone(),
        ..Default::default()
    })?;
    let processor = SourceProcessor::new(fetcher, LogContext::new(level, ""));

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, abandoning pending fetches");
            on_ctrl_c.cancel();
        }
    });

    let batch = processor
        .process_batch(config.proxies(), &[], cancel)
        .await;
    for (ordinal, error) in batch.source_errors() {
        warn!("Source {} failed: {}", ordinal, error);
    }

    let nodes = batch.into_nodes();
    let outbounds = generate_all(&nodes, config.outbounds());
    info!(
        "Generated {} outbounds from {} nodes",
        outbounds.len(),
        nodes.len()
    );

    let rendered = outbounds
        .iter()
        .map(render_fragment)
        .collect::<singbox_subparser::Result<Vec<_>>>()?;
    let document = format!("[{}]\n", rendered.join(",\n"));

    match &args.output {
        Some(path) => std::fs::write(path, document)
            .with_context(|| format!("writing {}", path.display()))?,
        None => print!("{}", document),
    }
    Ok(())
}
