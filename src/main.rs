use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use codemend::codec::{self, DecodeMode, FileBlockCodec};
use codemend::config::Config;
use codemend::generation::client::ChatClient;
use codemend::indexer::code_parser::CodeElement;
use codemend::indexer::core::Indexer;
use codemend::indexer::relevance::RelevanceSearch;
use codemend::repair::RepairPipeline;
use codemend::stitch::{StitchEngine, TargetLanguage};
use codemend::workspace;

#[derive(Parser, Debug)]
#[command(
    name = "codemend",
    about = "Apply change requests to a project through a text-generation service",
    version
)]
struct Cli {
    /// Path to the JSON config file
    #[arg(short, long, default_value = codemend::config::DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a project and list its functions, classes and methods
    Index {
        dir: PathBuf,
        /// Print elements as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show elements and files relevant to a query
    Search { dir: PathBuf, query: String },
    /// Print the file-block payload a query would send
    Context { dir: PathBuf, query: String },
    /// Decode a file-block payload
    Decode {
        file: PathBuf,
        /// Require a terminator on every block
        #[arg(long)]
        strict: bool,
        /// Write decoded files under this directory
        #[arg(long)]
        write: Option<PathBuf>,
    },
    /// Stitch two fragment files into one
    Stitch {
        part_a: PathBuf,
        part_b: PathBuf,
        /// Skip Python syntax checking
        #[arg(long)]
        plain: bool,
    },
    /// Apply a change request to a project
    Fix {
        request: String,
        /// Project directory (defaults to `project_dir` from the config)
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Show what would change without writing
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Serialize)]
struct ElementRow<'a> {
    file: &'a str,
    kind: &'a str,
    name: &'a str,
    start_line: usize,
    end_line: usize,
}

impl<'a> From<&'a CodeElement> for ElementRow<'a> {
    fn from(e: &'a CodeElement) -> Self {
        Self {
            file: e.file_path.as_deref().unwrap_or_default(),
            kind: e.kind.as_str(),
            name: &e.qualified_name,
            start_line: e.start_line,
            end_line: e.end_line,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    config.validate().context("invalid configuration")?;

    match cli.command {
        Command::Index { dir, json } => cmd_index(&dir, &config, json),
        Command::Search { dir, query } => cmd_search(&dir, &config, &query),
        Command::Context { dir, query } => cmd_context(&dir, &config, &query),
        Command::Decode {
            file,
            strict,
            write,
        } => cmd_decode(&file, &config, strict, write.as_deref()),
        Command::Stitch {
            part_a,
            part_b,
            plain,
        } => cmd_stitch(&part_a, &part_b, plain),
        Command::Fix {
            request,
            dir,
            dry_run,
        } => {
            let dir = dir.unwrap_or_else(|| PathBuf::from(&config.project_dir));
            cmd_fix(&dir, &config, &request, dry_run)
        }
    }
}

fn cmd_index(dir: &Path, config: &Config, json: bool) -> Result<()> {
    let mut indexer = Indexer::new()?;
    let (index, scan) = indexer.index_directory(dir, config)?;

    if json {
        let rows: Vec<ElementRow> = index.elements().map(ElementRow::from).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for e in index.elements() {
            println!(
                "{}:{}-{}\t{}\t{}",
                e.file_path.as_deref().unwrap_or_default(),
                e.start_line,
                e.end_line,
                e.kind.as_str(),
                e.qualified_name
            );
        }
    }

    for failure in &scan.failures {
        warn!("{failure}");
    }
    info!(
        "{} files indexed, {} skipped, {} failed, {} elements",
        scan.indexed, scan.skipped, scan.failed, scan.elements
    );
    Ok(())
}

fn cmd_search(dir: &Path, config: &Config, query: &str) -> Result<()> {
    let files = workspace::read_project_files(dir, config)?;
    let mut indexer = Indexer::new()?;
    let mut index = codemend::indexer::index::ProjectIndex::new();
    indexer.index_files(&files, &mut index);

    let search = RelevanceSearch::new(config.search.min_query_token_chars);
    let found = search.find(query, &index);
    if found.is_empty() {
        println!("No matching elements.");
    }
    for e in &found {
        println!(
            "{}:{}\t{}",
            e.file_path.as_deref().unwrap_or_default(),
            e.start_line,
            e.qualified_name
        );
    }

    let selection =
        search.select_files(query, &index, &files, &config.files.fallback_extensions);
    let label = if selection.fallback {
        "Fallback files"
    } else {
        "Selected files"
    };
    println!("\n{label}:");
    for path in &selection.paths {
        println!("  {path}");
    }
    Ok(())
}

fn cmd_context(dir: &Path, config: &Config, query: &str) -> Result<()> {
    let files = workspace::read_project_files(dir, config)?;
    let mut indexer = Indexer::new()?;
    let mut index = codemend::indexer::index::ProjectIndex::new();
    indexer.index_files(&files, &mut index);

    let payload = RelevanceSearch::new(config.search.min_query_token_chars).context_payload(
        query,
        &index,
        &files,
        &config.files.fallback_extensions,
        config.search.context_lines,
    );
    print!("{payload}");
    Ok(())
}

fn cmd_decode(file: &Path, config: &Config, strict: bool, write: Option<&Path>) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    let mode = if strict {
        DecodeMode::Strict
    } else {
        DecodeMode::Permissive
    };
    let report = FileBlockCodec::new(mode)
        .with_truncation_marker(&config.protocol.truncation_marker)
        .decode_partial(&text);

    for rejected in &report.rejected {
        warn!("Rejected block: {rejected}");
    }
    for block in report.blocks.values() {
        let mark = if block.truncated { " (truncated)" } else { "" };
        println!("{}\t{} bytes{mark}", block.path, block.content.len());
    }

    if let Some(dir) = write {
        let files: BTreeMap<String, String> = report
            .blocks
            .into_iter()
            .map(|(path, block)| (path, block.content))
            .collect();
        let written = workspace::write_files(dir, &files)?;
        info!("Wrote {} files to {}", written.written.len(), dir.display());
    }

    if strict && !report.rejected.is_empty() {
        bail!("{} block(s) rejected", report.rejected.len());
    }
    Ok(())
}

fn cmd_stitch(part_a: &Path, part_b: &Path, plain: bool) -> Result<()> {
    let a = std::fs::read_to_string(part_a)
        .with_context(|| format!("failed to read {}", part_a.display()))?;
    let b = std::fs::read_to_string(part_b)
        .with_context(|| format!("failed to read {}", part_b.display()))?;

    let language = if plain {
        TargetLanguage::PlainText
    } else {
        TargetLanguage::Python
    };
    let result = StitchEngine::new(language).stitch(&a, &b);

    print!("{}", result.text);
    eprintln!("{}", serde_json::to_string(&result)?);
    Ok(())
}

fn cmd_fix(dir: &Path, config: &Config, request: &str, dry_run: bool) -> Result<()> {
    let client = ChatClient::from_config(&config.generation)?;
    let pipeline = RepairPipeline::new(&client, config);
    let files = workspace::read_project_files(dir, config)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner} {msg} [{elapsed}]")
            .context("invalid spinner template")?,
    );
    spinner.set_message("selecting files");
    spinner.enable_steady_tick(Duration::from_millis(120));

    let report = pipeline.run_with_progress(request, &files, |path| {
        spinner.set_message(format!("generating {path}"));
    })?;
    spinner.finish_and_clear();

    if report.plan.selection.paths.is_empty() {
        bail!("no files to change in {}", dir.display());
    }
    for repair in report.syntax_warnings() {
        eprintln!(
            "warning: {} does not parse: {}",
            repair.path,
            repair.stitch.syntax_error.as_deref().unwrap_or_default()
        );
    }
    for failure in &report.failed {
        eprintln!("error: {failure}");
    }

    let outputs = report.files_to_write();
    if dry_run {
        print!("{}", codec::encode(&outputs));
    } else {
        let written = workspace::write_files(dir, &outputs)?;
        for (path, backup) in &written.backups {
            println!("{path} (backup: {backup})");
        }
        for path in written.written.iter().filter(|p| !written.backups.contains_key(*p)) {
            println!("{path} (new)");
        }
    }

    if !report.failed.is_empty() {
        bail!("{} file(s) could not be regenerated", report.failed.len());
    }
    Ok(())
}
