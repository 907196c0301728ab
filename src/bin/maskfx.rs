use std::{
    fs::File,
    io::{BufReader, Read as _},
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use sha2::Digest as _;

#[derive(Parser, Debug)]
#[command(name = "maskfx", version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print source metadata as JSON.
    Probe(ProbeArgs),
    /// Write one frame as a PNG, decoded from a source or composited from a job.
    Frame(FrameArgs),
    /// Render a job and validate its output.
    Render(RenderArgs),
    /// Validate an existing output against its source.
    Validate(ValidateArgs),
}

#[derive(Parser, Debug)]
struct ProbeArgs {
    /// Source video.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Decode backend.
    #[arg(long, value_enum, default_value_t = Backend::Auto)]
    backend: Backend,
}

#[derive(Parser, Debug)]
struct FrameArgs {
    /// Source video; dumps the decoded frame without effects.
    #[arg(long = "in", conflicts_with = "job", required_unless_present = "job")]
    in_path: Option<PathBuf>,

    /// Render job JSON; composites the job's effects onto the frame.
    #[arg(long)]
    job: Option<PathBuf>,

    /// Source frame index (0-based).
    #[arg(long)]
    frame: u64,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Scale a job frame down to fit this many pixels (0 keeps the source size).
    #[arg(long, default_value_t = 0)]
    max_side: u32,

    /// Pipeline config JSON.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Render job JSON.
    #[arg(long)]
    job: PathBuf,

    /// Pipeline config JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override compositing worker threads.
    #[arg(long)]
    threads: Option<usize>,

    /// Skip output validation.
    #[arg(long, default_value_t = false)]
    no_validate: bool,

    /// Exit with an error when the quality report lists violations.
    #[arg(long, default_value_t = false)]
    strict: bool,
}

#[derive(Parser, Debug)]
struct ValidateArgs {
    /// Render job JSON.
    #[arg(long)]
    job: PathBuf,

    /// Pipeline config JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Exit with an error when the quality report lists violations.
    #[arg(long, default_value_t = false)]
    strict: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    Auto,
    Ffmpeg,
    Y4m,
}

impl From<Backend> for maskfx::media::BackendChoice {
    fn from(b: Backend) -> Self {
        match b {
            Backend::Auto => Self::Auto,
            Backend::Ffmpeg => Self::Ffmpeg,
            Backend::Y4m => Self::Y4m,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.cmd {
        Command::Probe(args) => cmd_probe(args),
        Command::Frame(args) => cmd_frame(args),
        Command::Render(args) => cmd_render(args),
        Command::Validate(args) => cmd_validate(args),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<maskfx::PipelineConfig> {
    match path {
        Some(p) => maskfx::PipelineConfig::from_path(p)
            .with_context(|| format!("load config '{}'", p.display())),
        None => Ok(maskfx::PipelineConfig::default()),
    }
}

fn load_job(path: &Path) -> anyhow::Result<maskfx::RenderJob> {
    maskfx::RenderJob::from_path(path).with_context(|| format!("load job '{}'", path.display()))
}

fn cmd_probe(args: ProbeArgs) -> anyhow::Result<()> {
    let opts = maskfx::ReaderOptions {
        backend: args.backend.into(),
        gpu_acceleration: false,
    };
    let reader = maskfx::SourceReader::open(&args.in_path, &opts)
        .with_context(|| format!("open '{}'", args.in_path.display()))?;
    let out = serde_json::json!({
        "metadata": reader.metadata(),
        "frames": reader.frame_count(),
        "vfr": reader.frame_table().is_vfr(),
        "warnings": reader.warnings(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let cfg = load_config(args.config.as_deref())?;
    let index = maskfx::FrameIndex(args.frame);
    let img = match (&args.job, &args.in_path) {
        (Some(job), _) => maskfx::render_preview(&load_job(job)?, &cfg, index, args.max_side)?,
        (None, Some(input)) => {
            let mut reader = maskfx::SourceReader::open(input, &cfg.reader_options())
                .with_context(|| format!("open '{}'", input.display()))?;
            let frame = reader
                .read_frame(index)?
                .with_context(|| format!("frame {} is past the end", args.frame))?;
            maskfx::session::frame_to_image(&frame)?.to_rgb8()
        }
        (None, None) => anyhow::bail!("either --in or --job is required"),
    };

    if let Some(parent) = args.out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    img.save_with_format(&args.out, image::ImageFormat::Png)
        .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let job = load_job(&args.job)?;
    let mut cfg = load_config(args.config.as_deref())?;
    if args.threads.is_some() {
        cfg.threads = args.threads;
    }
    if args.no_validate {
        cfg.validate_output = false;
    }

    let cancel = maskfx::CancelToken::new();
    let outcome = maskfx::run_job(&job, &cfg, &cancel)?;

    for line in &outcome.plan_log {
        eprintln!("  {line}");
    }
    eprintln!(
        "wrote {} ({} frames, {} composited)",
        outcome.summary.path.display(),
        outcome.summary.frames_total,
        outcome.frames_composited
    );
    eprintln!("sha256: {}", sha256_file(&outcome.summary.path)?);
    match (&outcome.report, &outcome.report_path) {
        (Some(report), Some(path)) => finish_report(report, path, args.strict),
        _ => Ok(()),
    }
}

fn cmd_validate(args: ValidateArgs) -> anyhow::Result<()> {
    let job = load_job(&args.job)?;
    let cfg = load_config(args.config.as_deref())?;
    let report = maskfx::validate_job(&job, &cfg)?;
    let path = maskfx::QualityReport::default_path(&job.output);
    finish_report(&report, &path, args.strict)
}

fn finish_report(report: &maskfx::QualityReport, path: &Path, strict: bool) -> anyhow::Result<()> {
    for v in &report.violations {
        eprintln!("  violation: {v}");
    }
    eprintln!(
        "quality report {} ({} frames compared): {}",
        path.display(),
        report.compared_frames().count(),
        if report.passed() { "passed" } else { "FAILED" }
    );
    if strict && !report.passed() {
        anyhow::bail!(
            "{} quality violation(s) in '{}'",
            report.violations.len(),
            report.output.display()
        );
    }
    Ok(())
}

fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let f = File::open(path).with_context(|| format!("open '{}'", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = sha2::Sha256::new();
    let mut buf = vec![0u8; 1 << 16];
    loop {
        let n = r
            .read(&mut buf)
            .with_context(|| format!("read '{}'", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(maskfx::quality::audio_hash::hex_digest(&hasher.finalize()))
}
