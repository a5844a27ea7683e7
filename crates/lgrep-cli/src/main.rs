//! lgrep CLI: hybrid semantic + lexical search over local files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use lgrep_core::search::ContextWindow;
use lgrep_core::{Backend, ChunkParams, Config, Hit, Indexer, Plan, Searcher, discover};
use syntect::easy::HighlightLines;
use syntect::highlighting::ThemeSet;
use syntect::parsing::SyntaxSet;
use syntect::util::{LinesWithEndings, as_24_bit_terminal_escaped};

#[derive(Parser)]
#[command(name = "lgrep")]
#[command(about = "Hybrid semantic + lexical search over local files", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Search query (when no subcommand is given)
    #[arg(trailing_var_arg = true)]
    query: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new .lgrep repository
    Init,

    /// Index files in the repository
    Index {
        /// Path to index (default: repository root)
        path: Option<PathBuf>,

        /// Drop all chunks and vectors before indexing
        #[arg(long)]
        reset: bool,

        /// Chunk window in lines (default: from config)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Lines shared by neighbouring chunks (default: from config)
        #[arg(long)]
        chunk_overlap: Option<usize>,
    },

    /// Show index status and consistency
    Status,

    /// Search for chunks matching a natural-language query
    Query {
        /// Search query
        query: Vec<String>,

        /// Semantic candidates to recall (default: from config)
        #[arg(short = 'k', long)]
        k: Option<usize>,

        /// Maximum number of results (default: from config)
        #[arg(short = 'n', long)]
        max_hits: Option<usize>,

        /// Number of context lines to show (default: from config)
        #[arg(short = 'C', long)]
        context: Option<usize>,

        /// Print the compiled plan before the results
        #[arg(long)]
        plan: bool,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init) => cmd_init()?,
        Some(Commands::Index {
            path,
            reset,
            chunk_size,
            chunk_overlap,
        }) => cmd_index(path, reset, chunk_size, chunk_overlap)?,
        Some(Commands::Status) => cmd_status()?,
        Some(Commands::Query {
            query,
            k,
            max_hits,
            context,
            plan,
        }) => {
            let query = query.join(" ");
            cmd_query(&query, k, max_hits, context, plan)?;
        }
        None => {
            // Default: search with the provided query
            if cli.query.is_empty() {
                println!("Usage: lgrep <query> or lgrep <command>");
                println!("Run 'lgrep --help' for more information.");
            } else {
                let query = cli.query.join(" ");
                cmd_query(&query, None, None, None, false)?;
            }
        }
    }

    Ok(())
}

fn find_root() -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    discover::find_lgrep_root(&cwd).context("Not in an lgrep repository. Run 'lgrep init' first.")
}

fn spinner(message: &'static str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(message);
    Ok(pb)
}

fn cmd_init() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let lgrep_dir = discover::init_repository(&cwd)?;

    println!("Initialized lgrep repository in {}", lgrep_dir.display());
    println!("Run 'lgrep index' to index files.");

    Ok(())
}

fn cmd_index(
    path: Option<PathBuf>,
    reset: bool,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
) -> Result<()> {
    let root = find_root()?;
    let config = Config::load(&root)?;
    let params = ChunkParams::new(
        chunk_size.unwrap_or(config.chunk_size),
        chunk_overlap.unwrap_or(config.chunk_overlap),
    )?;

    let path = path
        .map(|p| p.canonicalize().with_context(|| format!("Cannot index {}", p.display())))
        .transpose()?;

    if reset {
        Indexer::reset(&root)?;
    }

    let pb = spinner("Loading embedding model...")?;
    let backend = Backend::from_config(&config)?;
    let mut indexer = Indexer::open(root, config, backend.embedder().clone())?;

    let bar_style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
        .progress_chars("█▓░");
    indexer.set_progress_callback(Box::new({
        let pb = pb.clone();
        move |event| match event {
            lgrep_core::index::ProgressEvent::Scanning { count } => {
                pb.set_message(format!("Scanning... {} files found", count));
            }
            lgrep_core::index::ProgressEvent::Indexing {
                current,
                total,
                path,
            } => {
                pb.set_style(bar_style.clone());
                pb.set_length(total as u64);
                pb.set_position(current as u64);
                pb.set_message(path.to_string_lossy().to_string());
            }
            lgrep_core::index::ProgressEvent::Embedding { chunks } => {
                pb.set_message(format!("Embedding {} chunks...", chunks));
            }
        }
    }));

    let stats = indexer.index(path.as_deref(), params)?;

    pb.finish_and_clear();

    println!("✓ Indexing complete:");
    println!("  Files scanned:   {}", stats.files_scanned);
    println!("  Files indexed:   {}", stats.files_indexed);
    println!("  Files unchanged: {}", stats.files_unchanged);
    println!("  Files empty:     {}", stats.files_empty);
    if stats.files_removed > 0 {
        println!("  Files removed:   {}", stats.files_removed);
    }
    println!("  Chunks created:  {}", stats.chunks_created);
    if stats.chunks_retired > 0 {
        println!("  Chunks retired:  {}", stats.chunks_retired);
    }
    println!("  Ids assigned:    {}..{}", stats.first_id, stats.next_id);
    if !stats.skipped.is_empty() {
        println!("  Files skipped:   {}", stats.skipped.len());
        for skipped in &stats.skipped {
            println!("    {}: {}", skipped.path, skipped.reason);
        }
    }

    Ok(())
}

fn cmd_status() -> Result<()> {
    let root = find_root()?;
    let config = Config::load(&root)?;
    let report = lgrep_core::index::inspect(&root, &config)?;
    let store = lgrep_core::MetadataStore::open(&discover::store_path(&root))?;

    println!("lgrep repository: {}", root.display());
    println!();
    println!("Configuration:");
    println!("  Model: {}", config.model);
    println!("  Dimension: {}", config.dimension);
    println!("  Chunk size: {} lines", config.chunk_size);
    println!("  Chunk overlap: {} lines", config.chunk_overlap);
    println!("  Vector backend: {:?}", config.ann.backend);
    println!("  Planner: {} @ {}", config.planner.model, config.planner.endpoint);
    println!();
    println!("Index:");
    println!("  Files indexed: {}", store.file_count()?);
    println!("  Vectors: {}", report.vectors);
    println!("  Chunk rows: {}", report.chunk_rows);
    println!("  Orphan vectors: {}", report.orphan_vectors());
    if report.is_consistent() {
        println!("  Consistency: ok");
    } else {
        println!(
            "  Consistency: MISMATCH (max chunk id {:?}, {} rows without a vector). Run 'lgrep index --reset' to rebuild.",
            report.max_chunk_id, report.rows_without_vector
        );
    }

    Ok(())
}

fn cmd_query(
    query: &str,
    k: Option<usize>,
    max_hits: Option<usize>,
    context: Option<usize>,
    show_plan: bool,
) -> Result<()> {
    let root = find_root()?;
    let mut config = Config::load(&root)?;
    if let Some(context) = context {
        config.context_lines = context;
    }
    let k = k.unwrap_or(config.k);
    let max_hits = max_hits.unwrap_or(config.max_hits);

    let pb = spinner("Searching...")?;
    let backend = Backend::from_config(&config)?;
    let searcher = Searcher::open(root, config, &backend)?;
    let outcome = searcher.query(query, k, max_hits)?;
    pb.finish_and_clear();

    if show_plan {
        print_plan(&outcome.plan);
    }

    if outcome.hits.is_empty() {
        println!(
            "No results found for: {} ({} candidates recalled)",
            query, outcome.candidates
        );
        return Ok(());
    }

    let highlighter = SyntaxHighlighter::new();

    println!("Results for: {}\n", query);

    for (i, hit) in outcome.hits.iter().enumerate() {
        let window = match searcher.context(hit) {
            Ok(window) => window,
            Err(e) => {
                tracing::warn!("Showing stored snippet for {}: {}", hit.file, e);
                ContextWindow {
                    first_line: hit.ls,
                    last_line: hit.le,
                    text: hit.snippet.clone(),
                }
            }
        };
        print_hit(i + 1, hit, &window, &highlighter);
    }

    Ok(())
}

fn print_plan(plan: &Plan) {
    println!("Plan:");
    println!("  filters = {:?}", plan.filters);
    println!("  regex   = {:?}", plan.regex);
    if plan.time_from.is_some() || plan.time_to.is_some() {
        println!(
            "  time    = {} .. {} (not enforced)",
            plan.time_from.as_deref().unwrap_or(""),
            plan.time_to.as_deref().unwrap_or("")
        );
    }
    println!();
}

/// Pretty-print a hit with its context window, highlighted.
fn print_hit(index: usize, hit: &Hit, window: &ContextWindow, highlighter: &SyntaxHighlighter) {
    // Header: index, file path, line range
    println!(
        "\x1b[1;36m[{}]\x1b[0m \x1b[1m{}\x1b[0m:\x1b[33m{}-{}\x1b[0m",
        index, hit.file, hit.ls, hit.le,
    );

    let mut display = String::new();
    for (i, line) in window.text.lines().enumerate() {
        let line_num = window.first_line + i;
        let prefix = if line_num >= hit.ls && line_num <= hit.le {
            "│"
        } else {
            "┊"
        };
        display.push_str(&format!("{} {:4} │ {}\n", prefix, line_num, line));
    }

    let extension = Path::new(&hit.file)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("txt");

    println!("{}", highlighter.highlight(&display, extension));
    println!("---");
}

/// Wrapper around syntect for syntax highlighting.
struct SyntaxHighlighter {
    syntax_set: SyntaxSet,
    theme_set: ThemeSet,
}

impl SyntaxHighlighter {
    fn new() -> Self {
        Self {
            syntax_set: SyntaxSet::load_defaults_newlines(),
            theme_set: ThemeSet::load_defaults(),
        }
    }

    fn highlight(&self, code: &str, extension: &str) -> String {
        let syntax = self
            .syntax_set
            .find_syntax_by_extension(extension)
            .unwrap_or_else(|| self.syntax_set.find_syntax_plain_text());

        let Some(theme) = self.theme_set.themes.get("base16-ocean.dark") else {
            return code.to_string();
        };
        let mut highlighter = HighlightLines::new(syntax, theme);

        let mut output = String::new();
        for line in LinesWithEndings::from(code) {
            match highlighter.highlight_line(line, &self.syntax_set) {
                Ok(ranges) => {
                    output.push_str(&as_24_bit_terminal_escaped(&ranges[..], false));
                }
                Err(_) => {
                    output.push_str(line);
                }
            }
        }
        output.push_str("\x1b[0m"); // Reset colors

        output
    }
}
