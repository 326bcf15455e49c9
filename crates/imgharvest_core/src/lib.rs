//! Image harvester core: request model, candidates, tallies and result records.
//!
//! Everything here is pure data and policy; IO lives in `imgharvest_engine`.
mod candidate;
mod request;
mod result;
mod urls;

pub use candidate::{ByteSource, Candidate, DownloadOutcome, DownloadRecord};
pub use request::{ResolutionWindow, ScrapeOptions, ScrapeRequest, SourceKind, ValidationError};
pub use result::{RunReport, RunTally, ScrapeResult};
pub use urls::{is_data_image_uri, is_http_url, normalize_seed_url, slugify, url_basename};
