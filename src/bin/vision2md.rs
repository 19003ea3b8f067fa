//! CLI binary for edgequake-vision2md.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints the run report.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_vision2md::{
    convert_path, default_output_path, ConversionConfig, ConversionMode,
    ConversionProgressCallback, OpenRouterBackend, ProgressCallback, SkipReason,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live progress bar plus one log line per
/// written page, retry and failure. Resumed pages only advance the bar.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Wall-clock start of the page currently in flight.
    page_started: Mutex<Option<Instant>>,
    resumed: AtomicUsize,
    before_start: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_conversion_start` tells us the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            page_started: Mutex::new(None),
            resumed: AtomicUsize::new(0),
            before_start: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
    }

    fn page_elapsed(&self) -> f64 {
        self.page_started
            .lock()
            .ok()
            .and_then(|mut started| started.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.set_message("");
    }

    fn on_page_skipped(&self, _page: usize, _total: usize, reason: SkipReason) {
        match reason {
            SkipReason::AlreadyCompleted => self.resumed.fetch_add(1, Ordering::SeqCst),
            SkipReason::BeforeStartPage => self.before_start.fetch_add(1, Ordering::SeqCst),
        };
        self.bar.inc(1);
    }

    fn on_page_start(&self, page: usize, _total: usize) {
        if let Ok(mut started) = self.page_started.lock() {
            *started = Some(Instant::now());
        }
        let resumed = self.resumed.load(Ordering::SeqCst);
        if resumed > 0 && self.bar.message().is_empty() {
            self.bar.println(format!(
                "  {} {} page(s) already in the output, resuming",
                cyan("↷"),
                resumed
            ));
        }
        self.bar.set_message(format!("page {page}"));
    }

    fn on_retry(&self, page: usize, attempt: u32, max_retries: u32, delay: Duration, error: &str) {
        self.bar.println(format!(
            "  {} Page {:>3}  retry {}/{} in {:.1}s  {}",
            yellow("↻"),
            page,
            attempt,
            max_retries,
            delay.as_secs_f64(),
            dim(&shorten(error, 80)),
        ));
    }

    fn on_page_written(&self, page: usize, total: usize, _output: &Path) {
        let elapsed = self.page_elapsed();
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page,
            total,
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page: usize, total: usize, error: &str) {
        let elapsed = self.page_elapsed();
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page,
            total,
            red(&shorten(error, 80)),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.abandon();
    }

    fn on_conversion_complete(&self, total_pages: usize, written: usize) {
        self.bar.finish_and_clear();
        let resumed = self.resumed.load(Ordering::SeqCst);
        let before_start = self.before_start.load(Ordering::SeqCst);
        eprintln!(
            "{} {} page(s) converted, {} resumed, {} before start page ({} total)",
            if before_start == 0 { green("✔") } else { cyan("◆") },
            bold(&written.to_string()),
            resumed,
            before_start,
            total_pages,
        );
    }
}

fn shorten(s: &str, max: usize) -> String {
    match s.char_indices().nth(max.saturating_sub(1)) {
        Some((idx, _)) if s.chars().count() > max => format!("{}\u{2026}", &s[..idx]),
        _ => s.to_string(),
    }
}

const AFTER_HELP: &str = r###"EXAMPLES:
  # Convert a PDF, writing book.md next to it
  vision2md book.pdf

  # Free-tier model: be gentle with the rate limit
  vision2md --provider openrouter --model gemma3:12b --request-delay 5 book.pdf

  # Interrupted at page 57? Run the same command again; pages 1-56 are skipped.
  vision2md book.pdf -o book.md

  # Skip the front matter on a fresh run
  vision2md --start-page 12 book.pdf -o book.md

  # A directory of scanned pages (natural filename order)
  vision2md scans/ -o scans.md

  # JSON run report on stdout
  vision2md --json book.pdf > report.json

  # List the models OpenRouter offers (no input needed)
  vision2md --list-models

RESUMING:
  The output file is the checkpoint. Each page is written as a section that
  begins with a line "## Page N"; any page whose header is present is never
  sent again. To redo a page, delete its section from the file.

MODEL ALIASES (OpenRouter):
  gemma3:12b, gemma3:4b   google/gemma-3-27b-it:free (default)
  vision                  meta-llama/llama-3.2-11b-vision-instruct:free
  claude-vision           anthropic/claude-3-haiku:beta
  gpt4-vision             openai/gpt-4o-mini
  vendor/model            passed through unchanged

ENVIRONMENT VARIABLES:
  OPENROUTER_API_KEY      OpenRouter API key
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Provider used when --provider is not given
  EDGEQUAKE_MODEL         Model used when --model is not given
  PDFIUM_LIB_PATH         Path to libpdfium (otherwise the system library)
  RUST_LOG                Override log filtering (e.g. edgequake_vision2md=debug)
"###;

/// Convert page images to Markdown with Vision LLMs, resumably.
#[derive(Parser, Debug)]
#[command(
    name = "vision2md",
    version,
    about = "Convert PDFs and page images to Markdown using Vision LLMs, one resumable page at a time",
    long_about = "Convert a PDF, a directory of page images, or a single image to Markdown using a \
Vision Language Model. Pages are appended to the output as they complete, and re-running the \
same command resumes after the last page present in the output.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF file, image file, or directory of page images.
    #[arg(required_unless_present = "list_models")]
    input: Option<PathBuf>,

    /// Output Markdown file (also the resume checkpoint). Default: input with `.md`.
    #[arg(short, long, env = "VISION2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// Vision model ID or alias (e.g. gemma3:12b, openai/gpt-4o-mini, gpt-4.1-nano).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Backend: openrouter, openai, anthropic, gemini, ollama, …
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// First page (1-based) to convert. Earlier pages are never sent.
    #[arg(long, env = "VISION2MD_START_PAGE", default_value_t = 1,
          value_parser = clap::value_parser!(u64).range(1..))]
    start_page: u64,

    /// Minimum seconds between consecutive requests; also the backoff base.
    #[arg(long, env = "VISION2MD_REQUEST_DELAY", default_value = "1", value_parser = parse_seconds)]
    request_delay: Duration,

    /// Retries per request after a rate limit or transient failure.
    #[arg(long, env = "VISION2MD_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Ceiling in seconds for a single backoff wait.
    #[arg(long, env = "VISION2MD_MAX_BACKOFF", default_value = "60", value_parser = parse_seconds)]
    max_backoff: Duration,

    /// auto (batch for one page, progressive otherwise), progressive, or batch.
    #[arg(long, env = "VISION2MD_MODE", value_enum, default_value = "auto")]
    mode: ModeArg,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "VISION2MD_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom instruction prompt.
    #[arg(long, env = "VISION2MD_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per request.
    #[arg(long, env = "VISION2MD_MAX_TOKENS", default_value_t = 4000)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "VISION2MD_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Longest rendered PDF page edge in pixels.
    #[arg(long, env = "VISION2MD_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, env = "VISION2MD_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Print the run report as JSON on stdout.
    #[arg(long, env = "VISION2MD_JSON")]
    json: bool,

    /// List models offered by OpenRouter and exit.
    #[arg(long)]
    list_models: bool,

    /// Disable progress bar.
    #[arg(long, env = "VISION2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "VISION2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "VISION2MD_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Auto,
    Progressive,
    Batch,
}

impl From<ModeArg> for ConversionMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Auto => ConversionMode::Auto,
            ModeArg::Progressive => ConversionMode::Progressive,
            ModeArg::Batch => ConversionMode::Batch,
        }
    }
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("'{s}' is not a number of seconds"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration '{s}': {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // With the progress bar active only errors are logged; the bar already
    // reports every page.
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Model listing ────────────────────────────────────────────────────
    if cli.list_models {
        let backend = OpenRouterBackend::from_env(&config)?;
        let models = backend
            .list_models()
            .await
            .context("Failed to list OpenRouter models")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&models).context("Failed to serialise model list")?
            );
        } else {
            for m in models {
                println!("{}", m.id);
            }
        }
        return Ok(());
    }

    // ── Run conversion ───────────────────────────────────────────────────
    let Some(ref input) = cli.input else {
        bail!("No input given. Pass a PDF, an image, or a directory of page images.");
    };
    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(input));

    let report = convert_path(input, &output_path, &config)
        .await
        .context("Conversion failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        eprintln!(
            "{}  {} written, {} resumed / {} pages  {}ms  →  {}",
            if report.is_complete() { green("✔") } else { cyan("◆") },
            report.written_pages.len(),
            report.resumed_pages.len(),
            report.total_pages,
            report.duration_ms,
            bold(&report.output_path.display().to_string()),
        );
    }

    Ok(())
}

/// Map CLI args to `ConversionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let start_page = usize::try_from(cli.start_page).context("Start page is too large")?;

    let mut builder = ConversionConfig::builder()
        .start_page(start_page)
        .request_delay(cli.request_delay)
        .max_retries(cli.max_retries)
        .max_backoff(cli.max_backoff)
        .mode(cli.mode.into())
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_rendered_pixels(cli.max_pixels)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
