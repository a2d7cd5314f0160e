use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use thumbfit::batch;
use thumbfit::config::{self, CONFIG_FILE_NAME, ThumbfitConfig};
use thumbfit::imaging::{
    CanvasBackend, FfmpegFrameExtractor, FitMode, MediaBackend, MiniProgramBackend, NativeBackend,
    Resolver, ThumbnailOverrides,
};
use thumbfit::output;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "thumbfit")]
#[command(about = "Size-bounded thumbnails for message protocols")]
#[command(long_about = "\
Size-bounded thumbnails for message protocols

Each thumbnail is scaled to fit inside max_width x max_height, encoded as
JPEG, and re-encoded at decreasing quality until its base64 form fits the
protocol's message budget (limit minus reserve). Animated GIFs are passed
through untouched. Video files are thumbnailed from a single frame when
--ffmpeg is given.

Backends:
  native        files in a work directory, base64 read back (default)
  canvas        in-memory buffers, data-URI output
  mini-program  sandboxed paths under --sandbox-root, raw base64

Output:
  thumbnail  prints {\"thumbnailBase64\", \"width\", \"height\"} as JSON,
             or writes the JPEG to --out
  batch      prints one line per file and a summary

Run 'thumbfit gen-config' to generate a documented thumbfit.toml.")]
#[command(version = env!("THUMBFIT_VERSION_LABEL"))]
struct Cli {
    /// Config file (defaults apply when it does not exist)
    #[arg(long, default_value = CONFIG_FILE_NAME, global = true)]
    config: PathBuf,

    /// Platform backend to run on
    #[arg(long, value_enum, default_value_t = BackendKind::Native, global = true)]
    backend: BackendKind,

    /// Sandbox root for the mini-program backend (defaults to the current directory)
    #[arg(long, global = true)]
    sandbox_root: Option<PathBuf>,

    /// Thumbnail video files from a frame extracted with ffmpeg
    #[arg(long, global = true)]
    ffmpeg: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    Native,
    Canvas,
    MiniProgram,
}

/// Per-call overrides of the `[thumbnail]` config section.
#[derive(clap::Args, Clone, Default)]
struct ThumbnailArgs {
    #[arg(long)]
    max_width: Option<u32>,

    #[arg(long)]
    max_height: Option<u32>,

    /// Starting quality, in (0, 1]
    #[arg(long)]
    quality: Option<f32>,

    /// Elongation threshold for --fit canvas
    #[arg(long)]
    scale: Option<f32>,

    #[arg(long, value_enum)]
    fit: Option<FitArg>,
}

#[derive(Copy, Clone, ValueEnum)]
enum FitArg {
    Proportional,
    Canvas,
}

impl ThumbnailArgs {
    fn overrides(&self) -> ThumbnailOverrides {
        ThumbnailOverrides {
            max_width: self.max_width,
            max_height: self.max_height,
            quality: self.quality,
            scale: self.scale,
            fit: self.fit.map(|f| match f {
                FitArg::Proportional => FitMode::Proportional,
                FitArg::Canvas => FitMode::Canvas,
            }),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Thumbnail one image or video file
    Thumbnail {
        file: PathBuf,

        /// Write the decoded JPEG here instead of printing JSON
        #[arg(long)]
        out: Option<PathBuf>,

        /// Also report the source info, quality and pass count
        #[arg(long)]
        info: bool,

        #[command(flatten)]
        thumbnail: ThumbnailArgs,
    },
    /// Thumbnail every supported file under a directory
    Batch {
        dir: PathBuf,

        #[command(flatten)]
        thumbnail: ThumbnailArgs,
    },
    /// Show the thumbnail geometry for a source size
    Geometry {
        width: u32,
        height: u32,

        #[command(flatten)]
        thumbnail: ThumbnailArgs,
    },
    /// Print a stock thumbfit.toml with all options documented
    GenConfig,
}

fn init_tracing(verbosity: u8) -> Result<(), Box<dyn std::error::Error>> {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::from_default_env().add_directive(format!("thumbfit={level}").parse()?);
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match &cli.command {
        Command::Thumbnail {
            file,
            out,
            info,
            thumbnail,
        } => {
            let resolver = build_resolver(&cli, &cfg)?;
            let file = std::path::absolute(file)?;
            let source = batch::open_source(&file, resolver.capabilities()).await?;
            let resolved = resolver
                .resolve_with_info(&source, Some(&thumbnail.overrides()))
                .await?;

            match out {
                Some(out) => {
                    let bytes = STANDARD.decode(&resolved.thumbnail.thumbnail_base64)?;
                    std::fs::write(out, bytes)?;
                    output::print_thumbnail(&file, &resolved, resolver.budget());
                    info!(out = %out.display(), "thumbnail written");
                }
                None if *info => println!("{}", serde_json::to_string_pretty(&resolved)?),
                None => println!("{}", serde_json::to_string_pretty(&resolved.thumbnail)?),
            }
        }
        Command::Batch { dir, thumbnail } => {
            let resolver = build_resolver(&cli, &cfg)?;
            let dir = std::path::absolute(dir)?;
            let files = batch::find_media(&dir, cli.ffmpeg)?;
            let concurrency = config::effective_concurrency(&cfg.processing);
            info!(files = files.len(), concurrency, "starting batch");
            let report =
                batch::run_batch(&resolver, files, Some(thumbnail.overrides()), concurrency).await;
            output::print_batch_report(&report, &dir);
        }
        Command::Geometry {
            width,
            height,
            thumbnail,
        } => {
            let thumb = cfg.to_thumbnail_config().with_overrides(&thumbnail.overrides());
            output::print_geometry(*width, *height, &thumb);
        }
        Command::GenConfig => {}
    }

    Ok(())
}

fn build_resolver(cli: &Cli, cfg: &ThumbfitConfig) -> Result<Resolver, Box<dyn std::error::Error>> {
    let backend: Arc<dyn MediaBackend> = match cli.backend {
        BackendKind::Native => Arc::new(
            NativeBackend::in_temp_dir()?.with_read_timeout(cfg.timeouts().per_operation),
        ),
        BackendKind::Canvas => Arc::new(CanvasBackend::new()),
        BackendKind::MiniProgram => {
            let root = match &cli.sandbox_root {
                Some(root) => std::path::absolute(root)?,
                None => std::env::current_dir()?,
            };
            Arc::new(MiniProgramBackend::new(root))
        }
    };

    let resolver = cfg.resolver(backend);
    Ok(if cli.ffmpeg {
        resolver.with_frame_extractor(Arc::new(FfmpegFrameExtractor::new()))
    } else {
        resolver
    })
}
