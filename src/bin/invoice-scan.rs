//! CLI binary for invoice-scan.
//!
//! A thin shim over the library crate: maps CLI flags to `ScanConfig`, runs
//! one scan session against a photographed invoice, and prints the items.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use invoice_scan::{
    CaptureFormat, FacingMode, FieldEdit, HttpInvoiceBackend, InvoiceBackend, InvoiceNumber,
    LineItem, ProgressCallback, RawOcrText, SavedText, ScanConfig, ScanProgressCallback,
    ScanSession, Stage, StillFrameCamera, SubmissionContext, SubmissionReceipt,
};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
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

/// Spinner that shows the running stage and logs one line per finished stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Scan");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ScanProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        let msg = match stage {
            Stage::Camera => "opening camera…",
            Stage::Capture => "capturing frame…",
            Stage::Extraction => "reading invoice text…",
            Stage::Submission => "submitting invoice…",
        };
        self.bar.set_prefix(stage.to_string());
        self.bar.set_message(msg);
    }

    fn on_stage_complete(&self, stage: Stage, detail: &str) {
        self.bar
            .println(format!("  {} {:<11} {}", green("✓"), stage, dim(detail)));
    }

    fn on_stage_error(&self, stage: Stage, error: &str) {
        // First line only; the full message is printed on exit.
        let first = error.lines().next().unwrap_or(error);
        self.bar
            .println(format!("  {} {:<11} {}", red("✗"), stage, red(first)));
    }

    fn on_no_items(&self, reason: &str) {
        self.bar.println(format!(
            "  {} no line items found ({})",
            yellow("⚠"),
            reason
        ));
    }

    fn on_camera_released(&self, facing: &str) {
        self.bar
            .println(format!("  {}", dim(&format!("camera released ({facing})"))));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Scan, review and submit
  invoice-scan invoice.jpg --vendor "ABC Vendor" --scanned-by 5

  # Look before submitting
  invoice-scan invoice.jpg --dry-run

  # Fix the quantity of the first row, then submit
  invoice-scan invoice.jpg --set 1.quantity=10 --vendor "ABC Vendor" --scanned-by 5

  # Use the front camera (selfie sensor) instead of the rear one
  invoice-scan rear.jpg --front-image front.jpg --facing user --dry-run

  # Parse text saved from an earlier OCR run (no camera, no OCR call)
  invoice-scan --text-file invoice.txt --json --dry-run

  # Export the reviewed items
  invoice-scan invoice.jpg --dry-run -o items.json

  # Backend lookups
  invoice-scan --list-vendors
  invoice-scan --list-invoices

EDITS (--set ROW.FIELD=VALUE, repeatable):
  ROW is 1-indexed. FIELD is one of:
    description (desc)            free text
    id (external_id, code)        free text
    quantity (qty, qt)            integer; anything else becomes 0

ENVIRONMENT VARIABLES:
  INVOICE_SCAN_OCR_API_KEY     OCR.space API key (required unless --text-file)
  INVOICE_SCAN_OCR_ENDPOINT    OCR endpoint override
  INVOICE_SCAN_BACKEND_URL     Inventory backend base URL
  RUST_LOG                     tracing filter override (e.g. invoice_scan=debug)
"#;

/// Scan a paper invoice into line items and record it in the inventory backend.
#[derive(Parser, Debug)]
#[command(
    name = "invoice-scan",
    version,
    about = "Scan a paper invoice into line items and record it in the inventory backend",
    long_about = "Photograph a delivery invoice, read it with an OCR service, parse the \
DESCRIPTION / ID / QT. columns into line items, apply review edits, and POST the result \
to the inventory backend.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Invoice photo seen by the rear (environment-facing) camera.
    image: Option<PathBuf>,

    /// Invoice photo seen by the front (user-facing) camera.
    #[arg(long, env = "INVOICE_SCAN_FRONT_IMAGE")]
    front_image: Option<PathBuf>,

    /// Camera to capture from.
    #[arg(long, env = "INVOICE_SCAN_FACING", value_enum, default_value = "environment")]
    facing: FacingArg,

    /// Parse OCR text from this file instead of capturing and calling OCR.
    #[arg(long, conflicts_with_all = ["image", "front_image"])]
    text_file: Option<PathBuf>,

    /// Vendor the invoice is from.
    #[arg(long, env = "INVOICE_SCAN_VENDOR")]
    vendor: Option<String>,

    /// Employee id of the receiver submitting the invoice.
    #[arg(long, env = "INVOICE_SCAN_SCANNED_BY")]
    scanned_by: Option<u32>,

    /// Invoice number (letters, digits, spaces). Generated when omitted.
    #[arg(long)]
    invoice_number: Option<String>,

    /// Path of the uploaded invoice image to store with the record.
    #[arg(long)]
    image_file_path: Option<String>,

    /// Review edit ROW.FIELD=VALUE (repeatable, rows are 1-indexed).
    #[arg(long = "set", value_name = "ROW.FIELD=VALUE")]
    edits: Vec<String>,

    /// Verify --vendor against the backend's vendor list before submitting.
    #[arg(long)]
    check_vendor: bool,

    /// Stop after review; do not submit.
    #[arg(long)]
    dry_run: bool,

    /// Write the reviewed items to this file as JSON.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the encoded capture to this file.
    #[arg(long)]
    save_capture: Option<PathBuf>,

    /// Print structured JSON instead of a table.
    #[arg(long, env = "INVOICE_SCAN_JSON")]
    json: bool,

    /// List the backend's vendors and exit.
    #[arg(long)]
    list_vendors: bool,

    /// List previously scanned invoices and exit.
    #[arg(long)]
    list_invoices: bool,

    /// OCR.space API key.
    #[arg(long, env = "INVOICE_SCAN_OCR_API_KEY", hide_env_values = true)]
    ocr_api_key: Option<String>,

    /// OCR endpoint URL.
    #[arg(long, env = "INVOICE_SCAN_OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    /// OCR engine number.
    #[arg(long, env = "INVOICE_SCAN_OCR_ENGINE", default_value = "2")]
    ocr_engine: String,

    /// Inventory backend base URL.
    #[arg(long, env = "INVOICE_SCAN_BACKEND_URL")]
    backend_url: Option<String>,

    /// Encoding for the captured frame.
    #[arg(long, env = "INVOICE_SCAN_FORMAT", value_enum, default_value = "png")]
    format: FormatArg,

    /// Longest edge of the encoded frame in pixels (100–10000).
    #[arg(long, env = "INVOICE_SCAN_MAX_DIMENSION", default_value_t = 2000,
          value_parser = clap::value_parser!(u32).range(100..=10000))]
    max_dimension: u32,

    /// HTTP timeout in seconds for OCR and backend calls.
    #[arg(long, env = "INVOICE_SCAN_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// Retries on network failure (0–10).
    #[arg(long, env = "INVOICE_SCAN_MAX_RETRIES", default_value_t = 2,
          value_parser = clap::value_parser!(u32).range(0..=10))]
    max_retries: u32,

    /// Disable the spinner.
    #[arg(long, env = "INVOICE_SCAN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INVOICE_SCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, env = "INVOICE_SCAN_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FacingArg {
    User,
    Environment,
}

impl From<FacingArg> for FacingMode {
    fn from(v: FacingArg) -> Self {
        match v {
            FacingArg::User => FacingMode::User,
            FacingArg::Environment => FacingMode::Environment,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Png,
    Jpeg,
}

impl From<FormatArg> for CaptureFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Png => CaptureFormat::Png,
            FormatArg::Jpeg => CaptureFormat::Jpeg,
        }
    }
}

/// What `--json` prints.
#[derive(Serialize)]
struct Report<'a> {
    items: &'a [LineItem],
    submitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    receipt: Option<&'a SubmissionReceipt>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives the feedback that matters; keep INFO logs out of it.
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

    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(
        &cli,
        progress.clone().map(|cb| cb as Arc<dyn ScanProgressCallback>),
    )?;

    // ── Backend lookups ──────────────────────────────────────────────────
    if cli.list_vendors || cli.list_invoices {
        let backend = HttpInvoiceBackend::from_config(&config).context("Invalid configuration")?;
        if cli.list_vendors {
            print_vendors(&backend, cli.json).await?;
        }
        if cli.list_invoices {
            print_invoices(&backend, cli.json).await?;
        }
        return Ok(());
    }

    let edits = cli
        .edits
        .iter()
        .map(|s| parse_edit(s))
        .collect::<Result<Vec<_>>>()?;

    let result = run_scan(&cli, config, &edits).await;
    if let Some(cb) = progress {
        cb.finish();
    }
    result
}

async fn run_scan(cli: &Cli, config: ScanConfig, edits: &[(usize, FieldEdit)]) -> Result<()> {
    // ── Session setup ────────────────────────────────────────────────────
    let mut session = if let Some(ref path) = cli.text_file {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read OCR text from {:?}", path))?;
        let backend = HttpInvoiceBackend::from_config(&config).context("Invalid configuration")?;
        let mut session = ScanSession::new(
            config,
            StillFrameCamera::new(),
            Arc::new(SavedText::new(text.clone())),
            Arc::new(backend),
        );
        session.load_text(&RawOcrText::new(text));
        session
    } else {
        let Some(ref image) = cli.image else {
            anyhow::bail!("An invoice image is required (or use --text-file)");
        };
        let mut camera = StillFrameCamera::new().with_file(FacingMode::Environment, image);
        if let Some(ref front) = cli.front_image {
            camera = camera.with_file(FacingMode::User, front);
        }

        let mut session =
            ScanSession::with_http(config, camera).context("Invalid configuration")?;
        session
            .start_camera(cli.facing.into())
            .await
            .context("Camera failed")?;
        session.capture().context("Capture failed")?;
        if let Some(ref path) = cli.save_capture {
            session
                .save_capture(path)
                .await
                .context("Failed to save capture")?;
        }
        session.extract().await.context("Text extraction failed")?;
        session
    };

    // ── Review ───────────────────────────────────────────────────────────
    for (row, edit) in edits {
        session
            .edit(*row, edit.clone())
            .with_context(|| format!("Cannot apply edit to row {}", row + 1))?;
    }

    if let Some(ref path) = cli.output {
        session
            .export_items(path)
            .await
            .context("Failed to export items")?;
        if !cli.quiet {
            eprintln!("{} items → {}", green("✔"), bold(&path.display().to_string()));
        }
    }

    let items = session.items().to_vec();
    if !cli.json {
        print_items(&items);
    }

    // ── Submission ───────────────────────────────────────────────────────
    let receipt = if cli.dry_run || items.is_empty() {
        if !cli.quiet && !cli.json && items.is_empty() {
            eprintln!("{} nothing to submit", yellow("⚠"));
        }
        None
    } else {
        let ctx = submission_context(cli)?;
        if cli.check_vendor {
            let vendors = session
                .backend()
                .list_vendors()
                .await
                .context("Failed to fetch vendors")?;
            if !vendors.iter().any(|v| v.name == ctx.vendor_name) {
                anyhow::bail!(
                    "Unknown vendor '{}'. Run --list-vendors to see valid names.",
                    ctx.vendor_name
                );
            }
        }
        Some(session.submit(&ctx).await.context("Submission failed")?)
    };

    session.stop_camera();

    if cli.json {
        let report = Report {
            items: &items,
            submitted: receipt.is_some(),
            receipt: receipt.as_ref(),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if let Some(ref r) = receipt {
        if !cli.quiet {
            eprintln!(
                "{} invoice {} recorded (HTTP {}{})",
                green("✔"),
                bold(r.invoice_number.as_str()),
                r.status,
                r.scan_id.map(|id| format!(", scan #{id}")).unwrap_or_default()
            );
        }
    }

    Ok(())
}

/// Map CLI args to `ScanConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ScanConfig> {
    let mut builder = ScanConfig::builder()
        .ocr_engine(cli.ocr_engine.clone())
        .request_timeout_secs(cli.timeout)
        .max_retries(cli.max_retries)
        .image_format(cli.format.into())
        .max_image_dimension(cli.max_dimension)
        .default_facing(cli.facing.into());

    if let Some(ref key) = cli.ocr_api_key {
        builder = builder.ocr_api_key(key.clone());
    }
    if let Some(ref url) = cli.ocr_endpoint {
        builder = builder.ocr_endpoint(url.clone());
    }
    if let Some(ref url) = cli.backend_url {
        builder = builder.backend_url(url.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn submission_context(cli: &Cli) -> Result<SubmissionContext> {
    let vendor = cli
        .vendor
        .clone()
        .context("--vendor is required to submit (or pass --dry-run)")?;
    let scanned_by = cli
        .scanned_by
        .context("--scanned-by is required to submit (or pass --dry-run)")?;

    let mut ctx = SubmissionContext::new(vendor, scanned_by);
    if let Some(ref n) = cli.invoice_number {
        ctx = ctx.with_invoice_number(InvoiceNumber::parse(n)?);
    }
    if let Some(ref p) = cli.image_file_path {
        ctx = ctx.with_image_file_path(p.clone());
    }
    Ok(ctx)
}

/// Parse `--set ROW.FIELD=VALUE` into a 0-indexed row and an edit.
fn parse_edit(s: &str) -> Result<(usize, FieldEdit)> {
    let (target, value) = s
        .split_once('=')
        .with_context(|| format!("Invalid edit '{s}': expected ROW.FIELD=VALUE"))?;
    let (row, field) = target
        .split_once('.')
        .with_context(|| format!("Invalid edit '{s}': expected ROW.FIELD=VALUE"))?;
    let row: usize = row
        .trim()
        .parse()
        .with_context(|| format!("Invalid row in edit '{s}'"))?;
    if row < 1 {
        anyhow::bail!("Rows are 1-indexed, minimum is 1 (got {})", row);
    }
    let edit = FieldEdit::from_text(field, value)?;
    Ok((row - 1, edit))
}

fn print_items(items: &[LineItem]) {
    if items.is_empty() {
        return;
    }
    println!(
        "{}",
        bold(&format!("{:>3}  {:<14}  {:>5}  {}", "#", "ID", "QTY", "DESCRIPTION"))
    );
    for (i, item) in items.iter().enumerate() {
        println!(
            "{:>3}  {:<14}  {:>5}  {}",
            i + 1,
            item.external_id,
            item.quantity,
            item.description
        );
    }
}

async fn print_vendors(backend: &dyn InvoiceBackend, json: bool) -> Result<()> {
    let vendors = backend
        .list_vendors()
        .await
        .context("Failed to fetch vendors")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&vendors)?);
    } else {
        for v in &vendors {
            println!("{:>5}  {}", dim(&v.vendor_id.to_string()), v.name);
        }
    }
    Ok(())
}

async fn print_invoices(backend: &dyn InvoiceBackend, json: bool) -> Result<()> {
    let invoices = backend
        .list_invoices()
        .await
        .context("Failed to fetch invoices")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&invoices)?);
    } else {
        for inv in &invoices {
            println!(
                "{:>5}  {:<24}  {:<20}  {:>4} items  {}",
                dim(&inv.scan_id.to_string()),
                inv.invoice_number,
                inv.vendor.as_ref().map_or("-", |v| v.name.as_str()),
                inv.total_items,
                dim(inv.created_at.as_deref().unwrap_or(""))
            );
        }
    }
    Ok(())
}
