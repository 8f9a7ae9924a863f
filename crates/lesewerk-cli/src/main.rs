// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Lesewerk — Document extraction from the command line.
//
// Entry point. Initialises logging, loads the engine configuration, runs one
// extraction and prints the outcome.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use lesewerk_core::config::EngineConfig;
use lesewerk_core::error::Result;
use lesewerk_core::human_errors::humanize_error;
use lesewerk_core::types::{ExtractionMode, ExtractionOutcome, RunStatus};
use lesewerk_document::Document;
use lesewerk_engine::{ExtractionOptions, Orchestrator, render};

#[derive(Parser, Debug)]
#[command(name = "lesewerk", author, version, about = "Extract text and tables from PDF documents")]
struct Args {
    /// PDF file to extract
    file: PathBuf,

    /// preview, standard, full or custom
    #[arg(short, long, default_value = "standard")]
    mode: ExtractionMode,

    /// Process at most this many pages
    #[arg(long)]
    max_pages: Option<u32>,

    /// Pages per chunk
    #[arg(long, default_value_t = lesewerk_engine::options::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    #[arg(long)]
    no_ocr: bool,

    #[arg(long)]
    no_tables: bool,

    #[arg(long)]
    no_cache: bool,

    /// Engine configuration (TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = Format::Json)]
    format: Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Markdown,
    Html,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(&args).await {
        Ok(outcome) if outcome.status == RunStatus::Failed => ExitCode::from(2),
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            let human = humanize_error(&err);
            tracing::error!(error = %err, "Extraction failed");
            eprintln!("{}\n{}", human.message, human.suggestion);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> Result<ExtractionOutcome> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    }
    .with_env_overrides()?;

    let document = Document::open(&args.file)?;
    tracing::info!(file = %args.file.display(), pages = document.page_count(), "Document opened");

    let mut options = ExtractionOptions::new(args.mode)
        .with_chunk_size(args.chunk_size)
        .with_ocr(!args.no_ocr)
        .with_tables(!args.no_tables)
        .with_cache(!args.no_cache);
    if let Some(max_pages) = args.max_pages {
        options = options.with_max_pages(max_pages);
    }

    let engine = Orchestrator::new(config)?;
    let outcome = engine.extract(&document, options).await;
    engine.shutdown().await;
    let outcome = outcome?;

    let rendered = match args.format {
        Format::Json => render::to_json(&outcome)?,
        Format::Markdown => render::to_markdown(&outcome),
        Format::Html => render::to_html(&outcome),
    };
    println!("{rendered}");
    Ok(outcome)
}
