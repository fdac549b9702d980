mod config;
mod corpus;
mod error;
mod markdown;
mod normalize;
mod report;
mod similarity;
mod stats;
mod vectorize;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, Level};

use crate::config::Config;
use crate::corpus::{Input, LoadOutcome, LoaderOptions};
use crate::error::{QdupError, Result};
use crate::report::{OutputFormat, Report, ReportOptions, RunInfo, ToolTemplate};
use crate::similarity::{Scope, SimilarityConfig, SimilarityPair};

/// qdup - Find near-duplicate questions in quiz XML banks
#[derive(Parser)]
#[command(name = "qdup")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default: .qdup.toml, if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Worker threads for loading and comparison (default: all cores)
    #[arg(short, long, global = true)]
    jobs: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare the questions inside one quiz file
    File {
        /// Quiz XML file
        file: PathBuf,

        /// Similarity threshold (0.0 to 1.0) [default: 0.7]
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Comparison scope (global and within-document are equivalent here)
        #[arg(long, value_enum, default_value = "within-document")]
        scope: Scope,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Compare questions across every quiz file in a directory
    Dir {
        /// Directory to scan
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Similarity threshold (0.0 to 1.0) [default: 0.9]
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// Comparison scope
        #[arg(long, value_enum, default_value = "global")]
        scope: Scope,

        /// Write a removal script for files that only hold near-exact
        /// cross-file copies (never executed)
        #[arg(long, value_name = "PATH")]
        cleanup_script: Option<PathBuf>,

        #[command(flatten)]
        filter: FilterArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Show question bank statistics and structural issues
    Stats {
        /// Directory to scan
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// Also run cross-file duplicate detection
        #[arg(long)]
        dupes: bool,

        /// Duplicate threshold used with --dupes [default: 0.9]
        #[arg(short, long, requires = "dupes")]
        threshold: Option<f64>,

        #[command(flatten)]
        filter: FilterArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args)]
struct FilterArgs {
    /// Glob patterns to exclude, relative to the directory (can be repeated)
    #[arg(short, long)]
    exclude: Vec<String>,

    /// Document extensions to load (comma-separated) [default: xml]
    #[arg(long, value_delimiter = ',')]
    ext: Vec<String>,
}

#[derive(Args)]
struct OutputArgs {
    /// Include question text and answers for every pair
    #[arg(short, long)]
    verbose: bool,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Report format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Comparison tool command, with {left} and {right} placeholders
    #[arg(long)]
    tool: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.quiet);

    let result = run(cli);

    if let Err(e) = result {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

/// `QDUP_LOG` (a level name) overrides the default of `warn`.
fn init_logging(quiet: bool) {
    let default = if quiet { Level::ERROR } else { Level::WARN };
    let level = std::env::var("QDUP_LOG")
        .ok()
        .and_then(|v| v.parse::<Level>().ok())
        .unwrap_or(default);

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    if let Some(jobs) = cli.jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
            .map_err(|e| QdupError::config(format!("cannot size worker pool: {}", e)))?;
    }

    match cli.command {
        Commands::File { file, threshold, scope, output } => {
            cmd_file(&file, threshold, scope, &output, &config, cli.quiet)
        }
        Commands::Dir { path, threshold, recursive, scope, cleanup_script, filter, output } => cmd_dir(
            &path,
            threshold,
            recursive,
            scope,
            cleanup_script.as_deref(),
            &filter,
            &output,
            &config,
            cli.quiet,
        ),
        Commands::Stats { path, recursive, dupes, threshold, filter, output } => {
            cmd_stats(&path, recursive, dupes, threshold, &filter, &output, &config, cli.quiet)
        }
    }
}

fn cmd_file(
    file: &Path,
    threshold: Option<f64>,
    scope: Scope,
    output: &OutputArgs,
    config: &Config,
    quiet: bool,
) -> Result<()> {
    if scope == Scope::CrossDocument {
        return Err(QdupError::config(
            "cross-document scope needs more than one document; use 'qdup dir'",
        ));
    }
    if !file.is_file() {
        return Err(QdupError::config(format!("not a file: {}", file.display())));
    }
    let similarity = SimilarityConfig::new(config.file_threshold(threshold), scope)?;
    let options = report_options(output, config)?;
    let input = Input::Document(file.to_path_buf());

    if !quiet {
        eprintln!("{} {}", "Analyzing".cyan().bold(), file.display());
    }

    let report = detect(&input, &LoaderOptions::default(), &similarity, &options, "single-document")?;
    write_output(output.output.as_deref(), &report::render(&report, output.format)?)?;
    print_outcome(&report, output.output.as_deref(), quiet);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_dir(
    path: &Path,
    threshold: Option<f64>,
    recursive: bool,
    scope: Scope,
    cleanup_script: Option<&Path>,
    filter: &FilterArgs,
    output: &OutputArgs,
    config: &Config,
    quiet: bool,
) -> Result<()> {
    if !path.is_dir() {
        return Err(QdupError::config(format!("not a directory: {}", path.display())));
    }
    let similarity = SimilarityConfig::new(config.dir_threshold(threshold), scope)?;
    let options = report_options(output, config)?;
    let loader = loader_options(filter, config)?;
    let recursive = config.recursive(recursive);
    let input = Input::Directory {
        root: path.to_path_buf(),
        recursive,
    };

    if !quiet {
        eprintln!(
            "{} {}{}",
            "Analyzing".cyan().bold(),
            path.display(),
            if recursive { " (recursive)" } else { "" }
        );
    }

    let outcome = corpus::load(&input, &loader)?;
    let report = assemble(&outcome, &similarity, &options, "directory");
    write_output(output.output.as_deref(), &report::render(&report, output.format)?)?;
    print_outcome(&report, output.output.as_deref(), quiet);

    if let Some(script) = cleanup_script {
        let candidates = report::cleanup_candidates(&report, &outcome.corpus);
        write_output(Some(script), &report::render_cleanup_script(&report, &candidates))?;
        if !quiet {
            eprintln!(
                "{} {} ({} files to review)",
                "Cleanup script written to".green(),
                script.display().to_string().cyan(),
                candidates.len()
            );
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct StatsOutput<'a> {
    statistics: &'a stats::BankStats,
    duplicates: &'a Report,
}

#[allow(clippy::too_many_arguments)]
fn cmd_stats(
    path: &Path,
    recursive: bool,
    dupes: bool,
    threshold: Option<f64>,
    filter: &FilterArgs,
    output: &OutputArgs,
    config: &Config,
    quiet: bool,
) -> Result<()> {
    if !path.is_dir() {
        return Err(QdupError::config(format!("not a directory: {}", path.display())));
    }
    if output.format == OutputFormat::Markdown {
        return Err(QdupError::config(
            "markdown output is only available for duplicate reports ('qdup file' or 'qdup dir')",
        ));
    }
    let similarity = SimilarityConfig::new(config.dir_threshold(threshold), Scope::Global)?;
    let options = report_options(output, config)?;
    let loader = loader_options(filter, config)?;
    let input = Input::Directory {
        root: path.to_path_buf(),
        recursive: config.recursive(recursive),
    };

    if !quiet {
        eprintln!("{} {}", "Scanning".cyan().bold(), path.display());
    }

    let outcome = corpus::load(&input, &loader)?;
    let bank = stats::collect(&outcome.corpus, &outcome.errors);
    let duplicates = dupes.then(|| assemble(&outcome, &similarity, &options, "directory"));

    let rendered = match (output.format, &duplicates) {
        (format, None) => stats::render(&bank, format)?,
        (OutputFormat::Text, Some(dupes)) => {
            format!("{}\n{}", stats::render_text(&bank), report::render_text(dupes))
        }
        (format, Some(dupes)) => report::serialize(
            &StatsOutput {
                statistics: &bank,
                duplicates: dupes,
            },
            format,
        )?,
    };
    write_output(output.output.as_deref(), &rendered)?;

    if !quiet {
        eprintln!(
            "{} questions, {} issues, {} documents skipped",
            bank.questions.to_string().cyan(),
            bank.issues.len().to_string().yellow(),
            bank.documents_skipped.to_string().yellow()
        );
    }
    Ok(())
}

/// Load, normalize, vectorize, compare, and assemble the report.
fn detect(
    input: &Input,
    loader: &LoaderOptions,
    similarity: &SimilarityConfig,
    options: &ReportOptions,
    mode: &'static str,
) -> Result<Report> {
    let outcome = corpus::load(input, loader)?;
    Ok(assemble(&outcome, similarity, options, mode))
}

fn assemble(
    outcome: &LoadOutcome,
    similarity: &SimilarityConfig,
    options: &ReportOptions,
    mode: &'static str,
) -> Report {
    let (pairs, compared) = compare(outcome, similarity);
    let run = RunInfo::new(mode, outcome.corpus.root(), similarity);
    report::build_report(
        run,
        &outcome.corpus,
        &outcome.errors,
        &pairs,
        compared,
        options,
    )
}

fn compare(outcome: &LoadOutcome, similarity: &SimilarityConfig) -> (Vec<SimilarityPair>, usize) {
    let start = Instant::now();
    let tokens = normalize::tokenize_corpus(outcome.corpus.questions());
    let (model, vectors) = vectorize::vectorize(&tokens);
    info!(
        documents = model.document_count(),
        terms = model.vocabulary_len(),
        elapsed = ?start.elapsed(),
        "vector space built"
    );

    let pairs = similarity::find_pairs(&outcome.corpus, &vectors, similarity);
    let compared = similarity::eligible_pairs(&outcome.corpus, similarity.scope());
    (pairs, compared)
}

fn report_options(output: &OutputArgs, config: &Config) -> Result<ReportOptions> {
    Ok(ReportOptions {
        // Markdown is a review document and always carries the question text.
        verbose: output.verbose || output.format == OutputFormat::Markdown,
        tool: ToolTemplate::new(config.tool(output.tool.as_deref()))?,
    })
}

fn loader_options(filter: &FilterArgs, config: &Config) -> Result<LoaderOptions> {
    LoaderOptions::new(&config.extensions(&filter.ext), &config.exclude(&filter.exclude))
}

/// Write the finished artifact in one go, to a file or stdout.
fn write_output(path: Option<&Path>, content: &str) -> Result<()> {
    match path {
        Some(path) => fs::write(path, content).map_err(|source| QdupError::Io {
            path: path.to_path_buf(),
            source,
        }),
        None => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(content.as_bytes())
                .and_then(|_| stdout.flush())
                .map_err(|source| QdupError::Io {
                    path: PathBuf::from("<stdout>"),
                    source,
                })
        }
    }
}

fn print_outcome(report: &Report, output: Option<&Path>, quiet: bool) {
    if quiet {
        return;
    }
    let pairs = report.duplicates.len();
    let summary = format!(
        "{} duplicate pairs in {} questions (threshold: {:.2}, {} documents skipped)",
        pairs, report.summary.questions, report.run.threshold, report.summary.documents_skipped
    );
    if pairs == 0 {
        eprintln!("{}", summary.green());
    } else {
        eprintln!("{}", summary.yellow().bold());
    }
    if let Some(path) = output {
        eprintln!("{} {}", "Report written to".green(), path.display().to_string().cyan());
    }
}
