//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Instant;

use assetweave_core::{
    FileSource, FileStream, FsFileSource, GlobMatcher, NewlineConcat, PatternMatcher,
    RetrieveOptions, RunSummary, Useref, UserefOptions,
};
use assetweave_shared::{
    AppConfig, SearchPath, VFile, config_dir, init_config, load_config, load_config_from,
};
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use futures::StreamExt;
use futures::stream;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// assetweave: combine the assets referenced by HTML build blocks.
#[derive(Parser)]
#[command(
    name = "assetweave",
    version,
    about = "Rewrite HTML asset blocks and emit the concatenated assets they reference.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Process HTML documents and write them with their assets.
    Build(BuildArgs),

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
pub(crate) struct BuildArgs {
    /// Documents to process. Glob patterns are expanded.
    #[arg(required = true)]
    pub documents: Vec<String>,

    /// Directory outputs are written to.
    #[arg(short, long, default_value = "dist")]
    pub out_dir: PathBuf,

    /// Search root for references (repeat for alternatives).
    #[arg(long)]
    pub search_path: Vec<PathBuf>,

    /// Write every group output under this directory.
    #[arg(long)]
    pub base: Option<PathBuf>,

    /// Emit each group's files individually.
    #[arg(long)]
    pub noconcat: bool,

    /// Only rewrite documents; do not build assets.
    #[arg(long)]
    pub no_assets: bool,

    /// Asset types to process, in order (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub types: Option<Vec<String>>,

    /// Extra files to merge into every group (glob, repeatable).
    #[arg(long)]
    pub additional: Vec<String>,

    /// Config file to use instead of the discovered one.
    #[arg(long, env = "ASSETWEAVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print the run summary as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init {
        /// Write `assetweave.toml` into the current directory instead of
        /// the user config directory.
        #[arg(long)]
        project: bool,
    },
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "assetweave=info",
        1 => "assetweave=debug",
        _ => "assetweave=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Build(args) => cmd_build(args).await,
        Command::Config { action } => match action {
            ConfigAction::Init { project } => cmd_config_init(project).await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// build
// ---------------------------------------------------------------------------

async fn cmd_build(args: BuildArgs) -> Result<()> {
    let start = Instant::now();
    let cwd = std::env::current_dir()
        .map_err(|e| eyre!("cannot determine working directory: {e}"))?;

    let config = match &args.config {
        Some(path) => load_config_from(path)?,
        None => load_config(&cwd)?,
    };
    let options = build_options(&config, &args, &cwd);

    let paths = expand_documents(&cwd, &args.documents)?;
    if paths.is_empty() {
        return Err(eyre!("no documents matched {:?}", args.documents));
    }

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| eyre!("failed to read {}: {e}", path.display()))?;
        documents.push(VFile::new(&cwd, path, bytes).with_base(&cwd));
    }

    info!(
        documents = documents.len(),
        out_dir = %args.out_dir.display(),
        ?options,
        "building"
    );

    let mut useref =
        Useref::new(options).concatenator(NewlineConcat::new(config.defaults.newline.as_str()));
    for pattern in config.defaults.additional.iter().chain(&args.additional) {
        useref = useref.additional_stream(additional_stream(&cwd, pattern));
    }

    let spinner = spinner();
    spinner.set_message("Building assets");

    let run = useref.run(stream::iter(documents));
    let mut output = run.output;
    let mut written = 0usize;

    while let Some(item) = output.next().await {
        match item {
            Ok(file) => {
                let dest = output_path(&args.out_dir, &cwd, &file);
                write_file(&dest, file.bytes()).await?;
                written += 1;
                spinner.set_message(format!("[{written}] {}", dest.display()));
            }
            Err(e) if e.is_fatal_to_document() => {
                spinner.suspend(|| error!(error = %e, "document skipped"));
            }
            Err(e) => {
                spinner.suspend(|| warn!(error = %e, "build error"));
            }
        }
    }

    let summary = run.summary.await??;
    spinner.finish_and_clear();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary_json(&summary, start))?);
    } else {
        println!();
        println!("  Build finished.");
        println!("  Documents: {}", summary.documents);
        println!("  Groups:    {}", summary.groups_started);
        println!("  Files:     {}", summary.files_emitted);
        println!("  Errors:    {}", summary.errors);
        println!("  Output:    {}", args.out_dir.display());
        println!("  Time:      {:.1}s", start.elapsed().as_secs_f64());
        println!();
    }

    if summary.errors > 0 {
        return Err(eyre!("{} error(s) reported during build", summary.errors));
    }
    Ok(())
}

/// Config defaults overridden by CLI flags.
fn build_options(config: &AppConfig, args: &BuildArgs, cwd: &Path) -> UserefOptions {
    let mut options = UserefOptions::from(config);
    if let Some(types) = &args.types {
        options.types = types.clone();
    }
    if let Some(search) = SearchPath::from_list(args.search_path.clone()) {
        options.search_path = Some(search);
    }
    if let Some(base) = &args.base {
        options.base = Some(base.clone());
    }
    options.base = options.base.map(|base| cwd.join(base));
    options.noconcat |= args.noconcat;
    options.no_assets |= args.no_assets;
    options
}

/// Expand document arguments into absolute paths, keeping argument order.
fn expand_documents(cwd: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let absolute = cwd.join(pattern).to_string_lossy().into_owned();
        let mut matches = GlobMatcher.expand(&absolute)?;
        if matches.is_empty() {
            matches.push(absolute);
        }
        for m in matches {
            let path = PathBuf::from(m);
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
    }
    Ok(paths)
}

/// Files matching `pattern`, read from disk as one external producer.
fn additional_stream(cwd: &Path, pattern: &str) -> FileStream {
    let absolute = cwd.join(pattern).to_string_lossy().into_owned();
    FsFileSource::default().retrieve(
        vec![absolute],
        RetrieveOptions {
            cwd: cwd.to_path_buf(),
            base: cwd.to_path_buf(),
        },
    )
}

/// Where an emitted file lands under `out_dir`.
fn output_path(out_dir: &Path, cwd: &Path, file: &VFile) -> PathBuf {
    match file.path.strip_prefix(cwd) {
        Ok(rel) => out_dir.join(rel),
        Err(_) => out_dir.join(file.relative()),
    }
}

async fn write_file(dest: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| eyre!("failed to create {}: {e}", parent.display()))?;
    }
    tokio::fs::write(dest, bytes)
        .await
        .map_err(|e| eyre!("failed to write {}: {e}", dest.display()))
}

fn summary_json(summary: &RunSummary, start: Instant) -> serde_json::Value {
    serde_json::json!({
        "documents": summary.documents,
        "groups": summary.groups_started,
        "files": summary.files_emitted,
        "errors": summary.errors,
        "elapsed_ms": start.elapsed().as_millis() as u64,
    })
}

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init(project: bool) -> Result<()> {
    let dir = if project {
        std::env::current_dir()?
    } else {
        config_dir()?
    };
    let path = init_config(&dir)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let config: AppConfig = load_config(&cwd)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
