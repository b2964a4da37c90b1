use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};
use unterlumen::{PhotoService, ServiceConfig, SortField, SortOrder};

#[derive(Parser)]
#[command(name = "unterlumen")]
#[command(about = "Browse a local photo collection: listings, capture dates, thumbnails and HEIF conversion")]
struct Cli {
    /// JSON configuration file (defaults to <config dir>/unterlumen/config.json when present)
    #[arg(short, long, global = true, value_name = "FILE", env = "UNTERLUMEN_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for converted HEIF images
    #[arg(long, global = true, value_name = "DIR", env = "UNTERLUMEN_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory as JSON
    Browse {
        dir: PathBuf,

        /// Sort field: name, date or size
        #[arg(long, default_value = "name")]
        sort: String,

        /// Sort order: asc or desc
        #[arg(long, default_value = "asc")]
        order: String,

        /// Wait for capture dates and list again with them applied
        #[arg(long)]
        wait_dates: bool,
    },

    /// Show file facts and EXIF metadata as JSON
    Info { file: PathBuf },

    /// Write a grid thumbnail
    Thumbnail {
        file: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Write the full-size displayable image (HEIF becomes JPEG)
    Convert {
        file: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Convert the previews of all HEIF images in a directory ahead of time
    Warm { dir: PathBuf },

    /// Report HEIF decoder support and the effective configuration
    Doctor,
}

/// `RUST_LOG` as given, with the crate levels from `-v` layered on top when
/// `-v` is passed or `RUST_LOG` is unset
fn log_filter(verbosity: u8, rust_log: Option<&str>) -> Result<EnvFilter> {
    let rust_log = rust_log.filter(|directives| !directives.trim().is_empty());
    let mut filter = rust_log.map(EnvFilter::new).unwrap_or_default();
    if verbosity == 0 && rust_log.is_some() {
        return Ok(filter);
    }

    // map -v to log level
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    for target in ["unterlumen", "media_meta", "scan_cache", "thumbnail_cache"] {
        filter = filter.add_directive(format!("{target}={level}").parse()?);
    }
    Ok(filter)
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = log_filter(verbosity, rust_log.as_deref())?;
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut config = ServiceConfig::load(cli.config.as_deref())?;
    if let Some(cache_dir) = cli.cache_dir {
        config.cache_dir = Some(cache_dir);
    }
    let service = PhotoService::new(&config);

    match cli.command {
        Commands::Browse {
            dir,
            sort,
            order,
            wait_dates,
        } => browse(&service, &dir, SortField::parse(&sort), SortOrder::parse(&order), wait_dates).await,
        Commands::Info { file } => print_json(&service.file_info(&file).await?),
        Commands::Thumbnail { file, output } => {
            let thumb = service.thumbnail(&file).await?;
            write_output(&output, &thumb.bytes, thumb.content_type)
        }
        Commands::Convert { file, output } => {
            let image = service.full_image(&file).await?;
            write_output(&output, &image.bytes, image.content_type)
        }
        Commands::Warm { dir } => print_json(&service.warm_previews(&dir).await?),
        Commands::Doctor => {
            #[derive(Serialize)]
            struct Report<'a> {
                decoder: unterlumen::DecoderCapability,
                config: &'a ServiceConfig,
                cache_dir: PathBuf,
            }
            print_json(&Report {
                decoder: service.decoder_capability().await,
                config: &config,
                cache_dir: config.resolved_cache_dir(),
            })
        }
    }
}

async fn browse(service: &PhotoService, dir: &Path, sort: SortField, order: SortOrder, wait_dates: bool) -> Result<()> {
    let listing = service.browse(dir, sort, order).await?;
    if !wait_dates {
        return print_json(&listing);
    }

    for _ in 0..600 {
        if service.dates_ready(dir).await.ready {
            return print_json(&service.browse(dir, sort, order).await?);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    bail!("Capture dates for {} were not resolved in time", dir.display())
}

fn write_output(path: &Path, bytes: &[u8], content_type: &str) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("Failed to write output to {}", path.display()))?;
    info!(path = %path.display(), bytes = bytes.len(), content_type, "wrote image");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directives(verbosity: u8, rust_log: Option<&str>) -> Result<String> {
        Ok(log_filter(verbosity, rust_log)?.to_string().to_lowercase())
    }

    #[test]
    fn test_rust_log_kept_without_verbose() -> Result<()> {
        let filter = directives(0, Some("scan_cache=debug"))?;
        assert!(filter.contains("scan_cache=debug"));
        assert!(!filter.contains("scan_cache=warn"));
        assert!(!filter.contains("media_meta"));
        Ok(())
    }

    #[test]
    fn test_verbose_levels() -> Result<()> {
        let filter = directives(0, None)?;
        assert!(filter.contains("media_meta=warn"));

        let filter = directives(2, Some("scan_cache=trace,hyper=info"))?;
        assert!(filter.contains("scan_cache=debug"));
        assert!(filter.contains("hyper=info"));

        assert!(directives(0, Some("  "))?.contains("unterlumen=warn"));
        Ok(())
    }
}
