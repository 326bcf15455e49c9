use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use imgharvest_core::{ResolutionWindow, ScrapeOptions, ScrapeRequest, SourceKind};
use imgharvest_engine::EngineConfig;

/// Download images for a query from search engines, or crawl a site.
#[derive(Parser, Debug)]
#[command(name = "imgharvest", version)]
pub struct Args {
    /// Search query, or the seed URL when crawling with `custom`.
    pub query: String,

    /// Images to download per engine.
    #[arg(short = 'n', long = "num-images")]
    pub limit: Option<usize>,

    /// Engines to run, in order: bing, google, custom.
    #[arg(
        short,
        long = "engines",
        value_delimiter = ',',
        value_parser = parse_source,
        default_value = "bing"
    )]
    pub engines: Vec<SourceKind>,

    #[arg(short, long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// Keep names derived from the image URL instead of `<engine>_NNNN`.
    #[arg(long)]
    pub keep_filenames: bool,

    /// Re-encode downloaded WebP images as JPEG.
    #[arg(long)]
    pub convert_webp: bool,

    /// Network timeout in seconds; page loads get twice as long.
    #[arg(long, default_value_t = 15)]
    pub timeout: u64,

    /// Run the browser with a visible window.
    #[arg(long)]
    pub show_browser: bool,

    /// Browser binary to launch instead of the one found on the system.
    #[arg(long)]
    pub chrome: Option<PathBuf>,

    /// Smallest accepted size for browser results, as WIDTHxHEIGHT.
    #[arg(long, value_parser = parse_dimensions)]
    pub min_resolution: Option<(u32, u32)>,

    /// Largest accepted size for browser results, as WIDTHxHEIGHT.
    #[arg(long, value_parser = parse_dimensions)]
    pub max_resolution: Option<(u32, u32)>,

    /// Consecutive misses before the browser engine gives up.
    #[arg(long)]
    pub max_missed: Option<u32>,

    /// JPEG quality used when re-encoding (0 keeps the original).
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub quality: Option<u8>,

    #[arg(long)]
    pub resize_width: Option<u32>,

    #[arg(long)]
    pub resize_height: Option<u32>,

    /// Link depth followed by the `custom` engine.
    #[arg(long)]
    pub depth: Option<u32>,

    /// RON file with default scrape options.
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Write the effective options to the settings file and continue.
    #[arg(long, requires = "settings")]
    pub save_settings: bool,

    #[arg(long, default_value = "info", value_parser = parse_log_level)]
    pub log_level: log::LevelFilter,

    /// Also write the log to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Args {
    /// Overlays the flags given on the command line onto `base`.
    pub fn scrape_options(&self, base: ScrapeOptions) -> ScrapeOptions {
        let mut options = base;
        if let Some(limit) = self.limit {
            options.limit = limit;
        }
        if let Some(dir) = &self.output_dir {
            options.output_dir = dir.clone();
        }
        options.keep_filenames |= self.keep_filenames;
        options.convert_webp |= self.convert_webp;
        if let Some(quality) = self.quality {
            options.compression_quality = quality;
        }
        if let Some(width) = self.resize_width {
            options.resize_width = width;
        }
        if let Some(height) = self.resize_height {
            options.resize_height = height;
        }
        if let Some(missed) = self.max_missed {
            options.max_missed = missed;
        }
        if let Some(depth) = self.depth {
            options.crawl_depth = depth;
        }
        let window = options.resolution;
        options.resolution = ResolutionWindow::new(
            self.min_resolution
                .unwrap_or((window.min_width, window.min_height)),
            self.max_resolution
                .unwrap_or((window.max_width, window.max_height)),
        );
        options
    }

    pub fn request(&self, base: ScrapeOptions) -> ScrapeRequest {
        ScrapeRequest::new(
            self.query.clone(),
            self.engines.clone(),
            self.scrape_options(base),
        )
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default().with_timeout(Duration::from_secs(self.timeout));
        config.launch.headless = !self.show_browser;
        if self.chrome.is_some() {
            config.launch.chrome_path = self.chrome.clone();
        }
        config
    }
}

fn parse_source(value: &str) -> Result<SourceKind, String> {
    SourceKind::parse(value)
        .ok_or_else(|| format!("unknown engine `{value}` (expected bing, google or custom)"))
}

fn parse_log_level(value: &str) -> Result<log::LevelFilter, String> {
    engine_logging::parse_level(value).ok_or_else(|| format!("unknown log level `{value}`"))
}

/// `WIDTHxHEIGHT`; negative sides clamp to 0, which leaves that side open.
fn parse_dimensions(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got `{value}`"))?;
    Ok((parse_side(width)?, parse_side(height)?))
}

fn parse_side(value: &str) -> Result<u32, String> {
    let side: i64 = value
        .trim()
        .parse()
        .map_err(|_| format!("`{value}` is not a number"))?;
    Ok(side.clamp(0, i64::from(u32::MAX)) as u32)
}
