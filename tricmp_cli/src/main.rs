use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tricmp_common::{
    default_cache_dir, load_config, validate_config, AppConfig, Arity, CompareMethod, DiffCounts,
    PathSet, SideData, WhitespaceMode,
};
use tricmp_core::{ComparisonStore, FolderScanner, HashCache, ItemSnapshot, ItemState};

#[derive(Parser)]
#[command(name = "tricmp")]
#[command(author = "tricmp Contributors")]
#[command(version)]
#[command(about = "Two- and three-way file and directory comparison", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two or three files, or two or three directory trees
    Compare(CompareArgs),
}

#[derive(clap::Args, Debug)]
struct CompareArgs {
    /// Paths to compare, one per side (left, [middle,] right)
    #[arg(num_args = 2..=3, required = true)]
    paths: Vec<PathBuf>,

    /// How sides are judged equal
    #[arg(short, long, value_enum)]
    method: Option<MethodArg>,

    /// Ignore patterns (can be specified multiple times)
    #[arg(short, long)]
    ignore: Vec<String>,

    /// Follow symbolic links
    #[arg(short = 'L', long)]
    follow_symlinks: bool,

    /// Compare text case-insensitively
    #[arg(long)]
    ignore_case: bool,

    /// Treat CRLF, CR and LF line endings as equal
    #[arg(long)]
    ignore_eol: bool,

    /// Whitespace handling for text comparison
    #[arg(long, value_enum)]
    ignore_whitespace: Option<WhitespaceArg>,

    /// Drop lines matching this regex before comparing (repeatable)
    #[arg(long = "filter")]
    line_filters: Vec<String>,

    /// Worker threads for evaluation (0 = one per core)
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Disable the fingerprint cache
    #[arg(long)]
    no_cache: bool,

    /// Cache directory for fingerprint storage (enables the cache)
    #[arg(short, long)]
    cache_dir: Option<PathBuf>,

    /// Show only differences (hide identical items)
    #[arg(short = 'd', long)]
    diff_only: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Disable ANSI colors in output
    #[arg(long)]
    no_color: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MethodArg {
    Content,
    Size,
    Date,
    SizeAndDate,
}

impl From<MethodArg> for CompareMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Content => CompareMethod::ByContent,
            MethodArg::Size => CompareMethod::BySize,
            MethodArg::Date => CompareMethod::ByDate,
            MethodArg::SizeAndDate => CompareMethod::BySizeAndDate,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum WhitespaceArg {
    All,
    Changes,
}

impl From<WhitespaceArg> for WhitespaceMode {
    fn from(arg: WhitespaceArg) -> Self {
        match arg {
            WhitespaceArg::All => WhitespaceMode::IgnoreAll,
            WhitespaceArg::Changes => WhitespaceMode::IgnoreChanges,
        }
    }
}

/// Process exit codes, diff(1) style
const EXIT_SAME: i32 = 0;
const EXIT_DIFFERENT: i32 = 1;
const EXIT_TROUBLE: i32 = 2;

fn main() {
    // Logs go to stderr so JSON on stdout stays parseable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Compare(args) => match run_compare(args) {
            Ok(code) => code,
            Err(e) => {
                error!("Compare failed: {:#}", e);
                EXIT_TROUBLE
            }
        },
    };
    std::process::exit(code);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Files,
    Directories,
}

/// All existing inputs must be of one kind; at least one must exist
fn detect_mode(paths: &[PathBuf]) -> Result<Mode> {
    let existing: Vec<&PathBuf> = paths.iter().filter(|p| p.exists()).collect();
    if existing.is_empty() {
        bail!("None of the given paths exist");
    }
    let dirs = existing.iter().filter(|p| p.is_dir()).count();
    match dirs {
        0 => Ok(Mode::Files),
        n if n == existing.len() => Ok(Mode::Directories),
        _ => bail!("Cannot compare files against directories"),
    }
}

fn apply_overrides(config: &mut AppConfig, args: &CompareArgs) {
    config.ignore_patterns.extend(args.ignore.iter().cloned());
    if args.follow_symlinks {
        config.follow_symlinks = true;
    }
    if let Some(method) = args.method {
        config.compare_method = method.into();
    }
    if args.ignore_case {
        config.text.ignore_case = true;
    }
    if args.ignore_eol {
        config.text.ignore_eol = true;
    }
    if let Some(whitespace) = args.ignore_whitespace {
        config.text.whitespace = whitespace.into();
    }
    config.text.line_filters.extend(args.line_filters.iter().cloned());
    if let Some(threads) = args.threads {
        config.worker_threads = threads;
    }
    if let Some(cache_dir) = &args.cache_dir {
        config.cache_dir = Some(cache_dir.clone());
        config.use_hash_cache = true;
    }
    if args.no_cache {
        config.use_hash_cache = false;
    }
}

fn run_compare(args: CompareArgs) -> Result<i32> {
    let arity = Arity::from_count(args.paths.len())?;
    let mode = detect_mode(&args.paths)?;

    let loaded = load_config(false).context("Failed to load configuration")?;
    let mut config = loaded.config;
    apply_overrides(&mut config, &args);
    validate_config(&config).context("Invalid compare options")?;

    info!("Comparing {} sides ({:?}):", arity.count(), mode);
    for path in &args.paths {
        info!("  {}", path.display());
    }

    let mut store = ComparisonStore::from_config(arity, &config)?;
    let cache = if config.use_hash_cache {
        let cache_path = match config.cache_dir.clone() {
            Some(path) => path,
            None => default_cache_dir(loaded.portable, &loaded.path)?,
        };
        info!("Using cache directory: {}", cache_path.display());
        let cache = HashCache::new(cache_path)?;
        store = store.with_cache(cache.clone());
        Some(cache)
    } else {
        None
    };

    match mode {
        Mode::Files => {
            store.register_paths(PathSet::new(args.paths.iter()))?;
        }
        Mode::Directories => {
            let mut scanner = FolderScanner::new(&config);
            if let Some(root) = args.paths.iter().find(|p| p.is_dir()) {
                if let Err(e) = scanner.load_gitignore(root) {
                    warn!("Ignoring .gitignore files: {}", e);
                }
            }
            let summary = store.rescan(&args.paths, &scanner, None)?;
            info!("Found {} items", summary.added);
        }
    }

    let handles = store.handles();
    let progress = progress_bar(handles.len() as u64, !args.json);
    let summary = store.evaluate_many_with_progress(&handles, None, |_| progress.inc(1));
    progress.finish_and_clear();
    info!(
        "Evaluated {} items ({} failed)",
        summary.evaluated, summary.failed
    );

    if let Some(cache) = &cache {
        if let Err(e) = cache.persist() {
            warn!("Failed to persist fingerprint cache: {}", e);
        }
    }

    let report = build_report(&args.paths, &store, config.compare_method, args.diff_only);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let use_color = !args.no_color && std::io::stdout().is_terminal();
        print_report(&report, arity, use_color);
    }

    Ok(exit_code(&report.summary))
}

fn progress_bar(len: u64, visible: bool) -> ProgressBar {
    if !visible || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {msg}") {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_message("comparing");
    bar
}

fn exit_code(summary: &DiffCounts) -> i32 {
    if summary.failed > 0 {
        EXIT_TROUBLE
    } else if summary.differences > 0 || summary.uniques > 0 {
        EXIT_DIFFERENT
    } else {
        EXIT_SAME
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
enum Status {
    Identical,
    Different,
    Unique,
    Failed,
    Unevaluated,
}

impl Status {
    fn of(snapshot: &ItemSnapshot, arity: Arity) -> Self {
        if snapshot.state != ItemState::Evaluated {
            Status::Unevaluated
        } else if snapshot.code.is_failed() {
            Status::Failed
        } else if snapshot.code.is_unique(arity) {
            Status::Unique
        } else if snapshot.code.is_different() {
            Status::Different
        } else {
            Status::Identical
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Status::Identical => "==",
            Status::Different => "!=",
            Status::Unique => "<>",
            Status::Failed => "!!",
            Status::Unevaluated => "??",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Status::Identical => "\x1b[32m",   // Green
            Status::Different => "\x1b[31m",   // Red
            Status::Unique => "\x1b[33m",      // Yellow
            Status::Failed => "\x1b[35m",      // Magenta
            Status::Unevaluated => "\x1b[36m", // Cyan
        }
    }
}

#[derive(Debug, Serialize)]
struct Report {
    generated_at: String,
    method: CompareMethod,
    sides: Vec<String>,
    summary: DiffCounts,
    entries: Vec<ReportEntry>,
}

#[derive(Debug, Serialize)]
struct ReportEntry {
    path: String,
    status: Status,
    binary: bool,
    sides: Vec<Option<ReportSide>>,
}

#[derive(Debug, Serialize)]
struct ReportSide {
    size: u64,
    modified: Option<String>,
    binary: bool,
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn report_side(side: &SideData) -> Option<ReportSide> {
    side.exists.then(|| ReportSide {
        size: side.size,
        modified: side.modified.map(format_time),
        binary: side.binary,
    })
}

fn display_path(snapshot: &ItemSnapshot) -> String {
    if let Some(relative) = &snapshot.relative_path {
        return relative.to_string_lossy().replace('\\', "/");
    }
    snapshot
        .paths
        .as_ref()
        .and_then(|paths| paths.iter().find(|p| p.exists()).or_else(|| paths.iter().next()))
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<buffer>".to_string())
}

fn build_report(
    roots: &[PathBuf],
    store: &ComparisonStore,
    method: CompareMethod,
    diff_only: bool,
) -> Report {
    let arity = store.arity();
    let entries = store
        .snapshots()
        .iter()
        .map(|snapshot| (snapshot, Status::of(snapshot, arity)))
        .filter(|(_, status)| !(diff_only && *status == Status::Identical))
        .map(|(snapshot, status)| ReportEntry {
            path: display_path(snapshot),
            status,
            binary: snapshot.code.is_binary(),
            sides: snapshot.sides.iter().map(report_side).collect(),
        })
        .collect();

    Report {
        generated_at: format_time(SystemTime::now()),
        method,
        sides: roots.iter().map(|p| p.to_string_lossy().to_string()).collect(),
        summary: store.aggregate_diff_count(),
        entries,
    }
}

/// Which sides hold the item, e.g. `L-R` for a three-way item missing in the middle
fn presence(entry: &ReportEntry, arity: Arity) -> String {
    let labels: &[char] = match arity {
        Arity::Two => &['L', 'R'],
        Arity::Three => &['L', 'M', 'R'],
    };
    labels
        .iter()
        .zip(&entry.sides)
        .map(|(label, side)| if side.is_some() { *label } else { '-' })
        .collect()
}

fn print_report(report: &Report, arity: Arity, use_color: bool) {
    println!("\n{}", "=".repeat(80));
    println!("Comparison Results");
    println!("{}", "=".repeat(80));

    for entry in &report.entries {
        let (color, reset) = if use_color {
            (entry.status.color(), "\x1b[0m")
        } else {
            ("", "")
        };
        let binary = if entry.binary { " [binary]" } else { "" };
        println!(
            "{}  {}  {} [{}] {}{}",
            color,
            entry.status.symbol(),
            reset,
            presence(entry, arity),
            entry.path,
            binary
        );
    }

    let summary = &report.summary;
    println!("\n{}", "=".repeat(80));
    println!("Summary:");
    println!("  Total items:     {}", summary.total());
    println!("  Identical:       {} (==)", summary.identical);
    println!("  Different:       {} (!=)", summary.differences);
    println!("  Unique:          {} (<>)", summary.uniques);
    println!("  Failed:          {} (!!)", summary.failed);
    if summary.unevaluated > 0 {
        println!("  Unevaluated:     {} (??)", summary.unevaluated);
    }
    println!("{}", "=".repeat(80));
}
