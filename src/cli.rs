use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Infer staging schemas from REST and GraphQL sources", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Crawl a data source and infer its column schema into a YAML file
    Analyze(AnalyzeArgs),
    /// Validate a source descriptor without touching the network
    Check(CheckArgs),
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Source descriptor file (.yaml)
    #[arg(short = 's', long = "source")]
    pub source: PathBuf,
    /// Destination file for the inferred schema
    #[arg(short = 'o', long = "out")]
    pub out: PathBuf,
    /// Override the descriptor's page cap
    #[arg(long = "max-pages")]
    pub max_pages: Option<usize>,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Source descriptor file (.yaml)
    #[arg(short = 's', long = "source")]
    pub source: PathBuf,
}
