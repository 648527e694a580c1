pub mod analyze;
pub mod auth;
pub mod cli;
pub mod error;
pub mod flatten;
pub mod paginate;
pub mod source;
pub mod transport;
pub mod widen;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};

use crate::analyze::SchemaAnalyzer;
use crate::cli::{Cli, Commands};
use crate::source::DataSource;
use crate::transport::HttpTransport;

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("vault_probe", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Analyze(args) => handle_analyze(&args),
        Commands::Check(args) => handle_check(&args),
    }
}

fn handle_analyze(args: &cli::AnalyzeArgs) -> Result<()> {
    let mut source = DataSource::load(&args.source)
        .with_context(|| format!("Loading source descriptor {:?}", args.source))?;
    if args.max_pages.is_some() {
        source.fetch.max_pages = args.max_pages;
    }
    let transport = HttpTransport::new(&source.fetch)?;
    let analysis = SchemaAnalyzer::new(&source, &transport)
        .run()
        .with_context(|| format!("Analyzing source '{}'", source.name))?;
    analysis
        .save(&args.out)
        .with_context(|| format!("Writing analysis to {:?}", args.out))?;
    info!(
        "Inferred {} column(s) for '{}' written to {:?}",
        analysis.columns.len(),
        analysis.source,
        args.out
    );
    Ok(())
}

fn handle_check(args: &cli::CheckArgs) -> Result<()> {
    let source = DataSource::load(&args.source)
        .with_context(|| format!("Loading source descriptor {:?}", args.source))?;
    info!(
        "Source '{}' is valid ({} at {})",
        source.name,
        match source.protocol {
            source::Protocol::Rest(_) => "REST",
            source::Protocol::GraphQl(_) => "GraphQL",
        },
        source.base_url
    );
    Ok(())
}
