use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use engine_logging::{engine_error, engine_info, engine_warn};
use imgharvest_core::{slugify, RunReport, RunTally, ScrapeRequest, ScrapeResult, SourceKind};
use tokio_util::sync::CancellationToken;

use crate::browser::{BrowserDriver, ChromeLauncher, DriverFactory, LaunchSettings};
use crate::discovery::{
    BrowserSearchDiscovery, BrowserSettings, CrawlDiscovery, CrawlSettings, Discovery,
    DiscoveryReport, SearchApiDiscovery, SearchApiSettings,
};
use crate::download::{DownloadStage, Downloader};
use crate::fetch::{FetchSettings, Fetcher, ProgressSink, ReqwestFetcher};
use crate::ledger::DedupLedger;
use crate::persist::ensure_output_dir;
use crate::postprocess::{ImageCodec, PostProcessSettings, PostProcessor};
use crate::{EngineEvent, ScrapeError, SourceProgress, Stage};

/// Everything the engine needs besides the request itself.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub fetch: FetchSettings,
    pub launch: LaunchSettings,
    pub search_api: SearchApiSettings,
    pub browser: BrowserSettings,
    pub crawl: CrawlSettings,
}

impl EngineConfig {
    /// Applies one network timeout to HTTP requests; page loads get twice
    /// as long.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.fetch.request_timeout = timeout;
        self.launch.page_load_timeout = timeout * 2;
        self
    }
}

/// Runs the sources of a request one after another.
pub struct Orchestrator {
    config: EngineConfig,
    fetcher: Arc<dyn Fetcher>,
    drivers: Arc<dyn DriverFactory>,
    codec: ImageCodec,
}

impl Orchestrator {
    /// Production wiring: reqwest for HTTP, Chromium for browsing.
    pub fn new(config: EngineConfig) -> Result<Self, ScrapeError> {
        let fetcher = ReqwestFetcher::new(config.fetch.clone())
            .map_err(|err| ScrapeError::Setup(format!("http client: {err}")))?;
        let drivers = ChromeLauncher::new(config.launch.clone());
        Ok(Self::with_components(
            config,
            Arc::new(fetcher),
            Arc::new(drivers),
            ImageCodec::detect(),
        ))
    }

    pub fn with_components(
        config: EngineConfig,
        fetcher: Arc<dyn Fetcher>,
        drivers: Arc<dyn DriverFactory>,
        codec: ImageCodec,
    ) -> Self {
        Self {
            config,
            fetcher,
            drivers,
            codec,
        }
    }

    /// Validates `request` and runs each source in order. Only validation
    /// problems come back as `Err`; setup and source failures are recorded
    /// in the report.
    pub async fn run(
        &self,
        request: ScrapeRequest,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<RunReport, ScrapeError> {
        let request = request.validated()?;
        let mut report = RunReport::default();

        let post = match PostProcessor::new(PostProcessSettings::from(&request.options), self.codec)
        {
            Ok(post) => post,
            Err(err) => {
                engine_error!("Run aborted: {}", err);
                report.failures.push(err.to_string());
                report.aborted = true;
                return Ok(report);
            }
        };

        for &source in &request.sources {
            if cancel.is_cancelled() {
                engine_info!("Run cancelled before {}", source.engine_name());
                break;
            }
            match self.run_source(source, &request, &post, cancel, progress).await {
                Ok(result) => {
                    engine_info!("{}", result.summary_line());
                    progress.emit(EngineEvent::SourceFinished(result.clone()));
                    report.results.push(result);
                }
                Err(err) => {
                    let line = format!("{} run failed: {}", source.engine_name(), err);
                    engine_error!("{}", line);
                    report.failures.push(line);
                    if err.is_fatal_to_run() {
                        report.aborted = true;
                        break;
                    }
                }
            }
        }

        report.cancelled = cancel.is_cancelled();
        Ok(report)
    }

    async fn run_source(
        &self,
        source: SourceKind,
        request: &ScrapeRequest,
        post: &PostProcessor,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<ScrapeResult, ScrapeError> {
        let options = &request.options;
        let engine = source.engine_name();
        let destination = destination_for(&options.output_dir, source, &request.query);
        ensure_output_dir(&destination)
            .map_err(|err| ScrapeError::Discovery(format!("{}: {err}", destination.display())))?;
        engine_info!("Starting {} -> {}", engine, destination.display());
        progress.emit(EngineEvent::SourceStarted {
            engine: engine.to_string(),
            destination: destination.clone(),
        });
        progress.emit(EngineEvent::Progress(SourceProgress {
            engine: engine.to_string(),
            stage: Stage::Discovering,
            saved: 0,
            skipped: 0,
        }));

        let ledger = DedupLedger::load(&destination);
        let downloader = Downloader::new(
            self.fetcher.as_ref(),
            post,
            destination.clone(),
            engine,
            options.keep_filenames,
        );
        let mut stage = DownloadStage::new(downloader, ledger, cancel, progress, engine);

        let discovered = match source {
            SourceKind::SearchApi => {
                let discovery = SearchApiDiscovery::new(
                    self.fetcher.as_ref(),
                    &self.config.search_api,
                    &request.query,
                    options.limit,
                );
                discovery.discover(&mut stage, cancel).await?
            }
            SourceKind::Browser => {
                let driver = self.launch_driver()?;
                let discovery = BrowserSearchDiscovery::new(
                    driver.as_ref(),
                    &self.config.browser,
                    &request.query,
                    options.limit,
                    options.resolution,
                    options.max_missed,
                );
                discovery.discover(&mut stage, cancel).await?
            }
            SourceKind::Crawl => {
                let driver = self.launch_driver()?;
                let discovery = CrawlDiscovery::new(
                    driver.as_ref(),
                    &self.config.crawl,
                    &request.query,
                    options.crawl_depth,
                );
                stage = stage.with_saved_cap(options.limit);
                discovery.discover(&mut stage, cancel).await?
            }
        };

        let result = finish_tally(discovered, stage.into_tally()).into_result(
            engine,
            options.limit,
            destination,
        );
        progress.emit(EngineEvent::Progress(SourceProgress {
            engine: engine.to_string(),
            stage: Stage::Done,
            saved: result.saved,
            skipped: result.skipped,
        }));
        Ok(result)
    }

    fn launch_driver(&self) -> Result<Box<dyn BrowserDriver>, ScrapeError> {
        self.drivers.launch().map_err(|err| {
            engine_warn!("Browser launch failed: {}", err);
            ScrapeError::Setup(format!("could not start browser: {err}"))
        })
    }
}

/// `{output_dir}/{engine dir}/{slug(query)}`.
pub fn destination_for(output_dir: &std::path::Path, source: SourceKind, query: &str) -> PathBuf {
    output_dir.join(source.directory_name()).join(slugify(query))
}

fn finish_tally(discovered: DiscoveryReport, downloads: RunTally) -> RunTally {
    let mut tally = RunTally::new();
    for error in discovered.errors {
        tally.note_error(error);
    }
    tally.merge(downloads);
    tally
}
