//! CLI binary for edgequake-pdf2pptx.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_llm::ProviderFactory;
use edgequake_pdf2pptx::{
    convert, convert_to_file, inspect, ConversionConfig, ConversionProgressCallback, ExtractionMethod,
    PageSelection, ProgressCallback, SlideSize,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
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

/// Terminal progress callback: a live bar plus one log line per page.
/// Pages may complete out of order when several run concurrently.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    /// Pages that ended on the image fallback.
    flattened: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_conversion_start` tells us the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Loading");
        bar.set_message("Opening document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            flattened: AtomicUsize::new(0),
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

    fn elapsed(&self, page_num: usize) -> f64 {
        let started = match self.start_times.lock() {
            Ok(mut times) => times.remove(&page_num),
            Err(_) => None,
        };
        started.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {total_pages} page(s)…"))
        ));
    }

    fn on_progress(&self, event: &edgequake_pdf2pptx::ProgressEvent) {
        self.bar.set_message(format!("{}%  {}", event.percent, event.phase));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(page_num, Instant::now());
        }
    }

    fn on_page_fallback(&self, page_num: usize, from: ExtractionMethod, reason: &str) {
        let reason = if reason.chars().count() > 70 {
            let cut: String = reason.chars().take(69).collect();
            format!("{cut}\u{2026}")
        } else {
            reason.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}  {} {}",
            dim("↳"),
            page_num,
            dim(from.as_str()),
            dim(&reason)
        ));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, method: ExtractionMethod) {
        let secs = self.elapsed(page_num);
        let mark = match method {
            ExtractionMethod::ImageFallback => {
                self.flattened.fetch_add(1, Ordering::SeqCst);
                yellow("▣")
            }
            _ => green("✓"),
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<18}  {}",
            mark,
            page_num,
            total,
            method.as_str(),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_pages: usize, method: ExtractionMethod) {
        self.bar.finish_and_clear();
        let flattened = self.flattened.load(Ordering::SeqCst);
        eprintln!(
            "{} {} slides built, mostly {}{}",
            green("✔"),
            bold(&total_pages.to_string()),
            bold(method.as_str()),
            if flattened > 0 {
                format!("  ({} as images)", yellow(&flattened.to_string()))
            } else {
                String::new()
            }
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # PDF deck to PPTX (direct extraction, image fallback)
  pdf2pptx deck.pdf

  # Choose the output path
  pdf2pptx deck.pdf -o slides.pptx

  # Scanned deck with vision analysis
  pdf2pptx --provider gemini --model gemini-2.0-flash scanned.pdf

  # Several page images, one slide each, in order
  pdf2pptx page1.png page2.png page3.jpg -o pages.pptx

  # Never call a vision service
  pdf2pptx --no-vision deck.pdf

  # Inspect without converting
  pdf2pptx --inspect deck.pdf

  # JSON summary of the conversion
  pdf2pptx --json deck.pdf > summary.json

STRATEGIES (per page, first success wins):
  direct_extraction   text, shapes and images read from the PDF itself
  ai_vision           layout inferred by a vision LLM from the page raster
  image_fallback      the page raster placed full-bleed (always works)

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Vision provider (openai, anthropic, gemini, ollama, azure)
  EDGEQUAKE_MODEL         Vision model ID
  PDFIUM_LIB_PATH         Path to libpdfium if it is not on the library path

Without --provider, a provider is auto-detected from the API keys above.
Without any key, pages skip the vision tier.
"#;

/// Convert PDF decks and page images to editable PowerPoint.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2pptx",
    version,
    about = "Convert PDF decks and page images to editable PowerPoint (PPTX)",
    long_about = "Convert a PDF deck, or a set of PNG/JPEG page images, into an editable .pptx. \
Each page is rebuilt from the PDF's own text and graphics when possible, from a vision LLM's \
layout analysis otherwise, and as a full-slide image as a last resort.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// One PDF, or one or more images (local paths or HTTP/HTTPS URLs).
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Output .pptx path. Default: <prefix>_<job id>.pptx in the current directory.
    #[arg(short, long, env = "PDF2PPTX_OUTPUT")]
    output: Option<PathBuf>,

    /// Vision model ID (e.g. gemini-2.0-flash, gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Vision provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// Never call a vision service.
    #[arg(long, env = "PDF2PPTX_NO_VISION")]
    no_vision: bool,

    /// Skip direct extraction; every page starts at the vision tier.
    #[arg(long)]
    no_direct: bool,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2PPTX_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Pages resolved concurrently.
    #[arg(short, long, env = "PDF2PPTX_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "PDF2PPTX_PAGES", default_value = "all")]
    pages: String,

    /// Slide size: widescreen, standard, fit.
    #[arg(long, value_enum, default_value = "widescreen")]
    slide_size: SlideSizeArg,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2PPTX_PASSWORD")]
    password: Option<String>,

    /// Path to libpdfium.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Per-page vision call timeout in seconds.
    #[arg(long, env = "PDF2PPTX_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Vision retries per page.
    #[arg(long, env = "PDF2PPTX_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2PPTX_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print a JSON summary (ConversionOutput without the package bytes).
    #[arg(long)]
    json: bool,

    /// Print document information only, no conversion.
    #[arg(long)]
    inspect: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2PPTX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2PPTX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum SlideSizeArg {
    Widescreen,
    Standard,
    Fit,
}

impl From<SlideSizeArg> for SlideSize {
    fn from(v: SlideSizeArg) -> Self {
        match v {
            SlideSizeArg::Widescreen => SlideSize::Widescreen,
            SlideSizeArg::Standard => SlideSize::Standard,
            SlideSizeArg::Fit => SlideSize::FitFirstPage,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar already reports fallthroughs, so keep library
    // warnings out of its way unless asked for.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect mode ─────────────────────────────────────────────────────
    if cli.inspect {
        let config = ConversionConfig::builder()
            .download_timeout_secs(cli.download_timeout)
            .build()
            .context("Invalid configuration")?;
        let info = inspect(&cli.inputs, &config)
            .await
            .context("Failed to inspect input")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialize document info")?
            );
        } else {
            println!("Source:       {}", info.source_name);
            println!("Kind:         {}", info.kind);
            println!("Pages:        {}", info.page_count);
            if let Some(ref t) = info.metadata.title {
                println!("Title:        {}", t);
            }
            if let Some(ref a) = info.metadata.author {
                println!("Author:       {}", a);
            }
            if let Some(ref p) = info.metadata.producer {
                println!("Producer:     {}", p);
            }
            if let Some(ref v) = info.metadata.pdf_version {
                println!("PDF Version:  {}", v);
            }
            if let Some(first) = info.pages.first() {
                println!("Page size:    {:.0} × {:.0}", first.width, first.height);
            }
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run conversion ───────────────────────────────────────────────────
    let (output, final_path) = match &cli.output {
        Some(path) => {
            let output = convert_to_file(&cli.inputs, path, &config)
                .await
                .context("Conversion failed")?;
            (output, path.clone())
        }
        // The suggested name carries the job id, known only afterwards.
        None => {
            let output = convert(&cli.inputs, &config)
                .await
                .context("Conversion failed")?;
            let path = PathBuf::from(&output.file_name);
            std::fs::write(&path, &output.pptx)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            (output, path)
        }
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if !cli.quiet {
        let s = &output.stats;
        eprintln!(
            "{}  {} slides  {}ms  →  {}",
            green("✔"),
            s.total_pages,
            s.total_duration_ms,
            bold(&final_path.display().to_string()),
        );
        eprintln!(
            "   {} direct  /  {} vision  /  {} image  ·  method {}",
            s.direct_pages,
            s.vision_pages,
            s.fallback_pages,
            bold(output.method.as_str()),
        );
        if s.total_input_tokens > 0 {
            eprintln!(
                "   {} tokens in  /  {} tokens out",
                dim(&s.total_input_tokens.to_string()),
                dim(&s.total_output_tokens.to_string()),
            );
        }
        if s.dropped_elements > 0 {
            eprintln!(
                "   {} malformed element(s) dropped",
                yellow(&s.dropped_elements.to_string())
            );
        }
    }

    Ok(())
}

/// Map CLI args to `ConversionConfig`.
///
/// Vision provider auto-detection from API keys happens here, not in the
/// library: the library only ever sees an explicit provider.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .pages(parse_pages(&cli.pages)?)
        .slide_size(cli.slide_size.clone().into())
        .skip_direct_extraction(cli.no_direct)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_lib_path(lib.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }

    if !cli.no_vision {
        if let Some(ref name) = cli.provider {
            builder = builder.provider_name(name.clone());
        } else {
            match ProviderFactory::from_env() {
                Ok((provider, _embedding)) => builder = builder.provider(provider),
                Err(e) => tracing::warn!("No vision provider detected ({e}); pages skip the vision tier"),
            }
        }
    }

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;
        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!("Invalid page range '{}-{}': start must be <= end", start, end);
        }
        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;
        if pages.contains(&0) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1");
        }
        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageSelection::Single(page))
}
