//! CLI binary for officeconv.
//!
//! A thin shim over the library crate that maps CLI flags to a remote
//! [`OfficePool`] plus a [`BatchConverter`] and prints the outcome.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use officeconv::{
    stop_quietly, BatchConverter, BatchProgressCallback, BatchReport, Converter, OfficeManager,
    OfficePool, PoolConfig, ProgressCallback, RemoteOfficeConfig, SslConfig,
};
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar for the batch, one log line per file.
/// Files complete out of order when the pool has more than one worker.
struct CliProgressCallback {
    bar: ProgressBar,
    skipped: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            skipped: AtomicUsize::new(0),
        })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        self.bar.set_length(total_files as u64);
        self.bar.reset_eta();
    }

    fn on_file_skipped(&self, _input: &Path, reason: &str) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!("  {} {}", yellow("↷"), dim(reason)));
    }

    fn on_file_start(&self, input: &Path) {
        self.bar.set_message(input.display().to_string());
    }

    fn on_file_complete(&self, input: &Path, output: &Path) {
        self.bar.println(format!(
            "  {} {}  →  {}",
            green("✓"),
            input.display(),
            dim(&output.display().to_string())
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, input: &Path, error: &str) {
        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 100 {
            error.chars().take(99).chain(['…']).collect()
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), input.display(), red(&msg)));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, converted: usize, failed: usize) {
        self.bar.finish_and_clear();
        let skipped = self.skipped.load(Ordering::SeqCst);
        let mark = if failed == 0 { green("✔") } else { red("✘") };
        eprintln!(
            "{} {} converted, {} failed, {} skipped",
            mark,
            bold(&converted.to_string()),
            failed,
            skipped
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert two documents to PDF next to their sources
  officeconv --url http://localhost:9980 -f pdf report.docx budget.xlsx

  # Explicit output names
  officeconv --url http://localhost:9980 slides.pptx -o slides.pdf

  # Every .doc of a folder, into another folder, four at a time
  officeconv --url http://localhost:9980 --pool-size 4 -f odt -d out/ 'archive/*.doc'

  # Replace existing outputs
  officeconv --url http://localhost:9980 -f pdf --overwrite *.odt

  # Export only the first page
  officeconv --url http://localhost:9980 -f pdf \
      --store-property 'FilterData={"PageRange":"1"}' report.docx

ENVIRONMENT VARIABLES:
  OFFICECONV_URL             Remote conversion endpoint
  OFFICECONV_POOL_SIZE       Concurrent conversions
  OFFICECONV_OUTPUT_DIR      Output directory
  OFFICECONV_FORMAT          Output format extension
  RUST_LOG                   Overrides the log filter (e.g. officeconv=debug)
"#;

/// Convert office documents through a remote conversion service.
#[derive(Parser, Debug)]
#[command(
    name = "officeconv",
    version,
    about = "Convert office documents through a remote conversion service",
    long_about = "Convert office documents (DOCX, XLSX, PPTX, ODT, …) by sending them to a \
LibreOffice Online / Collabora style conversion endpoint. Files are converted concurrently, \
up to the pool size.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input files. `*` and `?` wildcards are expanded in the file name.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output file for each input, in order.
    #[arg(short, long = "output", conflicts_with = "format")]
    outputs: Vec<PathBuf>,

    /// Output format extension (pdf, odt, docx, …).
    #[arg(short, long, env = "OFFICECONV_FORMAT", required_unless_present = "outputs")]
    format: Option<String>,

    /// Directory receiving the outputs. Created when missing.
    #[arg(short = 'd', long, env = "OFFICECONV_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Replace existing output files.
    #[arg(long, env = "OFFICECONV_OVERWRITE")]
    overwrite: bool,

    /// Remote conversion endpoint.
    #[arg(long, env = "OFFICECONV_URL")]
    url: String,

    /// Concurrent conversions against the endpoint.
    #[arg(long, env = "OFFICECONV_POOL_SIZE", default_value_t = 1,
          value_parser = clap::value_parser!(u16).range(1..))]
    pool_size: u16,

    /// Connection timeout in seconds.
    #[arg(long, env = "OFFICECONV_CONNECT_TIMEOUT", default_value_t = 60)]
    connect_timeout: u64,

    /// Per-request timeout in seconds.
    #[arg(long, env = "OFFICECONV_SOCKET_TIMEOUT", default_value_t = 120)]
    socket_timeout: u64,

    /// Maximum time one conversion may run, in seconds.
    #[arg(long, env = "OFFICECONV_TASK_EXECUTION_TIMEOUT", default_value_t = 120)]
    task_execution_timeout: u64,

    /// Maximum time a file waits for a free slot, in seconds.
    #[arg(long, env = "OFFICECONV_TASK_QUEUE_TIMEOUT", default_value_t = 30)]
    task_queue_timeout: u64,

    /// Accept any server certificate.
    #[arg(long, env = "OFFICECONV_TRUST_ALL")]
    trust_all: bool,

    /// PEM bundle of extra trusted root certificates.
    #[arg(long, env = "OFFICECONV_TRUST_STORE")]
    trust_store: Option<PathBuf>,

    /// PEM file holding the client certificate chain and key.
    #[arg(long, env = "OFFICECONV_IDENTITY")]
    identity: Option<PathBuf>,

    /// Skip the host name check of the server certificate.
    #[arg(long, env = "OFFICECONV_NO_VERIFY_HOSTNAME")]
    no_verify_hostname: bool,

    /// Load option, `name=value`. JSON values are parsed, anything else is a string.
    #[arg(long = "load-property", value_name = "NAME=VALUE", value_parser = parse_property)]
    load_properties: Vec<(String, Value)>,

    /// Store option, `name=value`. JSON values are parsed, anything else is a string.
    #[arg(long = "store-property", value_name = "NAME=VALUE", value_parser = parse_property)]
    store_properties: Vec<(String, Value)>,

    /// Print the batch report as JSON on stdout.
    #[arg(long, env = "OFFICECONV_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "OFFICECONV_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "OFFICECONV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "OFFICECONV_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar reports skips and failures itself, so library logs
    // drop to errors while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Pool ─────────────────────────────────────────────────────────────
    let config = build_config(&cli).context("Invalid configuration")?;
    let pool = Arc::new(OfficePool::remote(config).context("Invalid configuration")?);
    pool.start()
        .await
        .with_context(|| format!("Could not start the office pool against {}", cli.url))?;

    let report = run_batch(&cli, pool.clone(), show_progress).await;
    stop_quietly(pool.as_ref()).await;
    let report = report?;

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet && !show_progress {
        eprintln!(
            "Converted {} files, {} failed, {} skipped",
            report.converted.len(),
            report.failed.len(),
            report.skipped.len()
        );
    }

    if !report.is_success() {
        anyhow::bail!("{} of the files failed to convert", report.failed.len());
    }
    Ok(())
}

async fn run_batch(
    cli: &Cli,
    pool: Arc<OfficePool>,
    show_progress: bool,
) -> Result<BatchReport> {
    let mut converter = Converter::builder(pool);
    for (name, value) in &cli.load_properties {
        converter = converter.load_property(name.clone(), value.clone());
    }
    for (name, value) in &cli.store_properties {
        converter = converter.store_property(name.clone(), value.clone());
    }

    let mut batch = BatchConverter::new(Arc::new(converter.build())).overwrite(cli.overwrite);
    if let Some(dir) = &cli.output_dir {
        batch = batch.output_dir(dir.clone());
    }
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        batch = batch.progress_callback(cb);
    }

    let report = match &cli.format {
        Some(format) => batch.convert_to_format(&cli.inputs, format).await,
        None => batch.convert_to_files(&cli.inputs, &cli.outputs).await,
    };
    report.context("Conversion failed")
}

/// Map CLI args to a `RemoteOfficeConfig`.
fn build_config(cli: &Cli) -> Result<RemoteOfficeConfig> {
    let pool = PoolConfig::builder()
        .task_execution_timeout(Duration::from_secs(cli.task_execution_timeout))
        .task_queue_timeout(Duration::from_secs(cli.task_queue_timeout))
        .build()?;

    let mut builder = RemoteOfficeConfig::builder(cli.url.clone())
        .pool_size(usize::from(cli.pool_size))
        .connect_timeout(Duration::from_secs(cli.connect_timeout))
        .socket_timeout(Duration::from_secs(cli.socket_timeout))
        .pool(pool);

    if cli.trust_all || cli.trust_store.is_some() || cli.identity.is_some() || cli.no_verify_hostname
    {
        let mut ssl = SslConfig::new();
        ssl.trust_all = cli.trust_all;
        ssl.trust_store = cli.trust_store.clone();
        ssl.identity = cli.identity.clone();
        ssl.verify_hostname = !cli.no_verify_hostname;
        builder = builder.ssl(ssl);
    }

    Ok(builder.build()?)
}

/// Parse `name=value`; the value is JSON when it parses as JSON.
fn parse_property(s: &str) -> Result<(String, Value), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty property name in '{s}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}
