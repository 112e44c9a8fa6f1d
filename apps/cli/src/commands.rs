//! CLI command definitions, routing, and tracing setup.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use eva3d_cad::{Downloader, FetchProgress, OnshapeClient};
use eva3d_core::cache::BomCache;
use eva3d_core::pipeline::{self, OutputPaths};
use eva3d_shared::{
    AppConfig, FetchConfig, init_config, load_config, load_config_from, resolve_credentials,
};
use eva3d_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// eva3d: reconcile, fetch and package printable parts.
#[derive(Parser)]
#[command(
    name = "eva3d",
    version,
    about = "Reconcile CAD exports against page BOMs and build purchasing lists.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ./eva3d.toml, then ~/.eva3d/eva3d.toml).
    #[arg(long, global = true, env = "EVA3D_CONFIG")]
    pub config: Option<PathBuf>,

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
    /// Extract printable files from page archives, store BOMs, and package.
    Unpack,

    /// Fetch preview, BOM and printable exports for pages with a CAD URL.
    Download {
        /// Only the page with this namespace.
        #[arg(long)]
        page_uid: Option<String>,

        /// Only pages whose directory lies under this path.
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Write the project superbom as CSV.
    Superbom {
        /// Join vendor columns from this vendor's mapping.
        #[arg(long)]
        vendor: Option<String>,

        /// Vendor mapping CSV (defaults to the `[[vendors]]` entry).
        #[arg(long, requires = "vendor")]
        mapping: Option<PathBuf>,

        /// Output file (defaults to stdout).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Write a vendor purchasing list as CSV.
    Vendor {
        /// Vendor name.
        #[arg(long)]
        vendor: String,

        /// Vendor mapping CSV (defaults to the `[[vendors]]` entry).
        #[arg(long)]
        mapping: Option<PathBuf>,

        /// Output file (defaults to stdout).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Gather page printable files into the project tree and zip it.
    Package,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults in the current directory.
    Init,
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
        0 => "eva3d=info",
        1 => "eva3d=debug",
        _ => "eva3d=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

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
    let config_path = cli.config;
    match cli.command {
        Command::Unpack => cmd_unpack(config_path.as_deref()).await,
        Command::Download { page_uid, path } => {
            cmd_download(config_path.as_deref(), page_uid.as_deref(), path.as_deref()).await
        }
        Command::Superbom {
            vendor,
            mapping,
            out,
        } => {
            cmd_superbom(
                config_path.as_deref(),
                vendor.as_deref(),
                mapping.as_deref(),
                out.as_deref(),
            )
            .await
        }
        Command::Vendor {
            vendor,
            mapping,
            out,
        } => cmd_vendor(config_path.as_deref(), &vendor, mapping.as_deref(), out.as_deref()).await,
        Command::Package => cmd_package(config_path.as_deref()),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
        },
    }
}

/// Resolve the config and the directory relative paths are anchored at.
fn load(config_path: Option<&Path>) -> Result<(AppConfig, PathBuf)> {
    match config_path {
        Some(path) => {
            let config = load_config_from(path)?;
            let root = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            Ok((config, root))
        }
        None => Ok(load_config()?),
    }
}

async fn open_storage(config: &AppConfig, root: &Path) -> Result<Storage> {
    Ok(Storage::open(&root.join(&config.paths.database)).await?)
}

fn output_paths(config: &AppConfig, root: &Path) -> OutputPaths {
    OutputPaths {
        tree_root: root.join(&config.paths.stls_dir),
        archive: root.join(&config.paths.archive),
    }
}

/// Stdout, or a freshly created file.
fn open_output(out: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match out {
        Some(path) => Box::new(
            File::create(path).map_err(|e| eyre!("cannot create {}: {e}", path.display()))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    })
}

fn vendor_mapping_file(
    config: &AppConfig,
    root: &Path,
    vendor: &str,
    explicit: Option<&Path>,
) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| config.vendor_mapping_path(vendor, root))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_unpack(config_path: Option<&Path>) -> Result<()> {
    let (config, root) = load(config_path)?;
    let pages = config.pages(&root)?;
    let storage = open_storage(&config, &root).await?;
    let mut cache = BomCache::new();

    info!(pages = pages.len(), "unpacking pages");
    let report =
        pipeline::unpack_all(&pages, &storage, &mut cache, &output_paths(&config, &root)).await?;

    let duplicates: usize = report.pages.iter().map(|r| r.duplicates.len()).sum();
    println!();
    println!("  Pages reconciled: {}", report.pages.len());
    println!("  Duplicate entries: {duplicates}");
    println!("  Files packaged:   {}", report.package.file_count);
    println!("  Archive:          {}", report.package.archive_path.display());
    println!("  SHA-256:          {}", report.package.sha256);
    println!("  Time:             {:.1}s", report.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_download(
    config_path: Option<&Path>,
    page_uid: Option<&str>,
    path: Option<&Path>,
) -> Result<()> {
    let (config, root) = load(config_path)?;
    let (access, secret) = resolve_credentials(&config)?;

    let selected_path = path.map(|p| if p.is_absolute() { p.to_path_buf() } else { root.join(p) });
    let pages: Vec<_> =
        pipeline::select_pages(&config.pages(&root)?, page_uid, selected_path.as_deref())
            .into_iter()
            .filter(|page| page.cad.is_some())
            .collect();
    if pages.is_empty() {
        println!("No pages with a CAD URL match the selection.");
        return Ok(());
    }

    let fetch = FetchConfig::try_from(&config)?;
    let client = OnshapeClient::new(&config.cad.base_url, access, secret, fetch.request_timeout)?;
    let downloader = Downloader::new(Arc::new(client), fetch);
    let storage = open_storage(&config, &root).await?;

    let progress = Arc::new(CliProgress::new(pages.len()));
    let report =
        pipeline::download_pages(&pages, &storage, &downloader, progress.clone()).await?;
    progress.finish();

    println!();
    println!("  Pages fetched: {}", report.fetched.len());
    for (namespace, error) in &report.failed {
        println!("  FAILED {namespace}: {error}");
    }
    println!("  Time:          {:.1}s", report.elapsed.as_secs_f64());
    println!();

    if !report.is_success() {
        return Err(eyre!("{} page(s) failed to download", report.failed.len()));
    }
    Ok(())
}

async fn cmd_superbom(
    config_path: Option<&Path>,
    vendor: Option<&str>,
    mapping: Option<&Path>,
    out: Option<&Path>,
) -> Result<()> {
    let (config, root) = load(config_path)?;

    match vendor {
        Some(vendor) => {
            let storage = open_storage(&config, &root).await?;
            let mapping = vendor_mapping_file(&config, &root, vendor, mapping);
            let entries =
                pipeline::resolved_superbom(&storage, vendor, mapping.as_deref()).await?;
            eva3d_artifacts::write_superbom_resolved(&entries, open_output(out)?)?;
        }
        None => {
            let db_path = root.join(&config.paths.database);
            if !db_path.exists() {
                return Err(eyre!(
                    "no BOM database at {}; run `eva3d unpack` or `eva3d download` first",
                    db_path.display()
                ));
            }
            let storage = Storage::open_readonly(&db_path).await?;
            let entries = pipeline::superbom(&storage).await?;
            eva3d_artifacts::write_superbom_template(&entries, open_output(out)?)?;
        }
    }
    Ok(())
}

async fn cmd_vendor(
    config_path: Option<&Path>,
    vendor: &str,
    mapping: Option<&Path>,
    out: Option<&Path>,
) -> Result<()> {
    let (config, root) = load(config_path)?;
    let storage = open_storage(&config, &root).await?;
    let mapping = vendor_mapping_file(&config, &root, vendor, mapping);

    let lines = pipeline::purchasing(&storage, vendor, mapping.as_deref()).await?;
    info!(vendor, rows = lines.len(), "purchasing list built");
    eva3d_artifacts::write_purchasing_list(&lines, open_output(out)?)?;
    Ok(())
}

fn cmd_package(config_path: Option<&Path>) -> Result<()> {
    let (config, root) = load(config_path)?;
    let pages = config.pages(&root)?;
    let output = output_paths(&config, &root);

    let result = eva3d_artifacts::package(&pages, &output.tree_root, &output.archive)?;

    println!();
    println!("  Files:   {}", result.file_count);
    println!("  Archive: {}", result.archive_path.display());
    println!("  Size:    {} bytes", result.size);
    println!("  SHA-256: {}", result.sha256);
    println!();
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let cwd = std::env::current_dir()
        .map_err(|e| eyre!("cannot determine working directory: {e}"))?;
    let path = init_config(&cwd)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let (config, _) = load(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Fetch progress rendered as an indicatif bar over pages.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(pages: usize) -> Self {
        let bar = ProgressBar::new(pages as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{pos}/{len}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✓"]),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl FetchProgress for CliProgress {
    fn page_started(&self, namespace: &str) {
        self.bar.set_message(format!("Fetching {namespace}"));
    }

    fn part_exported(&self, namespace: &str, file_name: &str) {
        self.bar.set_message(format!("{namespace}: {file_name}"));
    }

    fn page_finished(&self, namespace: &str, ok: bool) {
        if !ok {
            self.bar.println(format!("  failed: {namespace}"));
        }
        self.bar.inc(1);
    }
}
