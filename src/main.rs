use clap::{ArgGroup, Parser};
use glance_io::cache::ThumbnailSize;
use glance_io::cmm::Cmm;
use glance_io::codecs::{Registry, uri_to_path};
use glance_io::config::{self, GlanceConfig};
use glance_io::serialize::{serialize_for_search, serialize_to_stdout};
use glance_io::thumbnail::Thumbnailer;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "glance-io")]
#[command(version)]
#[command(about = "Image decoding and thumbnailing backend for an image browser")]
#[command(long_about = "\
Image decoding and thumbnailing backend for an image browser

Pixel output goes to stdout as a 24-byte native-endian header
(u64 tag, i32 width, i32 height, i32 stride, i32 format) followed by
stride x height bytes, so stdout must be a pipe or a file.

SIZE is a pixel count (128, 256, 512, 1024, 2048) or a cache directory
name (normal, large, x-large, xx-large, huge). URI is a file:// URI or a
plain path.

Run 'glance-io --gen-config' to print a documented config.toml.")]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args([
            "list_supported_media_types",
            "thumbnail",
            "extract_thumbnail",
            "thumbnail_for_search",
            "invalidate_cache",
            "gen_config",
        ])
))]
struct Cli {
    /// Print every readable MIME type, one per line
    #[arg(long)]
    list_supported_media_types: bool,

    /// Produce a cached thumbnail and write its pixels to stdout
    #[arg(long, num_args = 2, value_names = ["SIZE", "URI"])]
    thumbnail: Option<Vec<String>>,

    /// Write the preview embedded in the file to stdout
    #[arg(long, value_name = "URI")]
    extract_thumbnail: Option<String>,

    /// Write a JPEG or PNG rendition for similarity search to stdout
    #[arg(long, num_args = 2, value_names = ["SIZE", "URI"])]
    thumbnail_for_search: Option<Vec<String>>,

    /// Remove cached thumbnails whose source changed or vanished
    #[arg(long)]
    invalidate_cache: bool,

    /// Print a stock config.toml with all options documented
    #[arg(long)]
    gen_config: bool,

    /// Use the slower, deblocking JPEG decoder
    #[arg(long)]
    enhance: bool,

    /// Config file (default: $XDG_CONFIG_HOME/glance-io/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.gen_config {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }
    if cli.list_supported_media_types {
        for media_type in Registry::global().supported_media_types() {
            println!("{media_type}");
        }
        return Ok(());
    }

    let mut config = config::load_config(cli.config.as_deref())?;
    config.decode.enhance_jpeg |= cli.enhance;
    init_thread_pool(&config.processing);
    let thumbnailer = build_thumbnailer(&config)?;

    if let Some(args) = &cli.thumbnail {
        let (size, path) = size_and_path(args)?;
        let buffer = thumbnailer.produce(&path, size)?;
        serialize_to_stdout(&buffer, 0)?;
    } else if let Some(uri) = &cli.extract_thumbnail {
        let path = resolve(uri)?;
        // Giant never upscales, so the preview keeps its own size.
        match thumbnailer.extract(&path, ThumbnailSize::Giant)? {
            Some(buffer) => serialize_to_stdout(&buffer, 0)?,
            None => return Err(format!("{} has no embedded thumbnail", path.display()).into()),
        }
    } else if let Some(args) = &cli.thumbnail_for_search {
        let (size, path) = size_and_path(args)?;
        let buffer = thumbnailer.scaled(&path, size)?;
        let encoded = serialize_for_search(&buffer)?;
        let stdout = std::io::stdout();
        if stdout.is_terminal() {
            return Err("refusing to write binary data to a terminal".into());
        }
        let mut out = stdout.lock();
        out.write_all(&encoded)?;
        out.flush()?;
    } else if cli.invalidate_cache {
        let stats = thumbnailer.invalidate();
        info!(target: "glance_io::cli", "cache {}: {stats}", thumbnailer.layout().root().display());
        println!("Cache: {stats}");
    }

    Ok(())
}

/// Logs go to stderr: stdout carries pixel data.
fn init_logging(verbose: bool) {
    let default = if verbose { "glance_io=debug" } else { "glance_io=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Capped at the number of available CPU cores.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

fn build_thumbnailer(config: &GlanceConfig) -> Result<Thumbnailer, Box<dyn std::error::Error>> {
    let layout = config
        .cache_layout()
        .ok_or("no thumbnail cache directory: set thumbnails.cache_dir or HOME")?;
    let target = config.color.load_target(Cmm::global())?;
    let mut thumbnailer = Thumbnailer::new(layout)
        .with_target(target)
        .with_enhance(config.decode.enhance_jpeg)
        .with_wide_output(config.decode.wide_output);
    if let Some(producer) = &config.thumbnails.producer {
        thumbnailer = thumbnailer.with_producer(producer.clone());
    }
    debug!(target: "glance_io::cli", "cache root {}", thumbnailer.layout().root().display());
    Ok(thumbnailer)
}

fn size_and_path(args: &[String]) -> Result<(ThumbnailSize, PathBuf), Box<dyn std::error::Error>> {
    let [size, uri] = args else {
        return Err("expected SIZE and URI".into());
    };
    let size = ThumbnailSize::parse(size).ok_or_else(|| format!("unknown thumbnail size '{size}'"))?;
    Ok((size, resolve(uri)?))
}

fn resolve(uri: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if uri.contains("://") {
        Ok(uri_to_path(uri)?)
    } else {
        Ok(PathBuf::from(uri))
    }
}
