//! Image harvester engine: discovery strategies, downloading, dedup ledger
//! and post-processing, driven by the [`Orchestrator`].
pub mod browser;
pub mod discovery;
mod download;
mod engine;
mod extension;
mod fetch;
mod filename;
mod ledger;
mod orchestrator;
mod persist;
mod postprocess;
mod types;

pub use download::{decode_data_uri, DownloadError, DownloadStage, Downloader};
pub use engine::{Canceller, EngineHandle};
pub use extension::{best_extension, data_uri_extension, ALLOWED_IMAGE_EXTENSIONS};
pub use fetch::{
    ByteStream, ChannelProgressSink, FetchSettings, FetchedPage, Fetcher, ImageResponse,
    NullProgressSink, ProgressSink, ReqwestFetcher, DEFAULT_USER_AGENT,
};
pub use filename::{choose_filename, data_uri_filename, sanitize_filename, short_hash};
pub use ledger::{canonical_key, DedupLedger, LEDGER_FILENAME};
pub use orchestrator::{destination_for, EngineConfig, Orchestrator};
pub use persist::{ensure_output_dir, unique_path, AtomicFileWriter, PersistError, StagedFile};
pub use postprocess::{
    bounded_dimensions, compress_in_place, convert_webp_to_jpeg, ImageCodec, PostProcessError,
    PostProcessSettings, PostProcessor, ProcessedImage,
};
pub use types::{EngineEvent, FailureKind, FetchError, ScrapeError, SourceProgress, Stage};
