use std::path::{Path, PathBuf};

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use engine_logging::{engine_debug, engine_info, engine_warn};
use futures_util::StreamExt;
use imgharvest_core::{ByteSource, Candidate, DownloadRecord, RunTally};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::discovery::CandidateSink;
use crate::extension::{best_extension, data_uri_extension};
use crate::fetch::{Fetcher, ProgressSink};
use crate::filename::{choose_filename, sanitize_filename};
use crate::ledger::DedupLedger;
use crate::persist::{split_extension, PersistError, StagedFile};
use crate::postprocess::PostProcessor;
use crate::{EngineEvent, FailureKind, FetchError, SourceProgress, Stage};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("{0}")]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Persist(#[from] PersistError),
    #[error("invalid data uri: {0}")]
    InvalidDataUri(String),
}

/// Saves candidates into one destination directory, consulting and
/// extending that directory's ledger.
pub struct Downloader<'a> {
    fetcher: &'a dyn Fetcher,
    post: &'a PostProcessor,
    destination: PathBuf,
    prefix: String,
    keep_filenames: bool,
}

impl<'a> Downloader<'a> {
    pub fn new(
        fetcher: &'a dyn Fetcher,
        post: &'a PostProcessor,
        destination: impl Into<PathBuf>,
        prefix: impl Into<String>,
        keep_filenames: bool,
    ) -> Self {
        Self {
            fetcher,
            post,
            destination: destination.into(),
            prefix: prefix.into(),
            keep_filenames,
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Downloads one candidate. Never fails: every problem ends up in the
    /// returned record. `ordinal` numbers synthesized filenames.
    pub async fn download(
        &self,
        candidate: &Candidate,
        ordinal: usize,
        ledger: &mut DedupLedger,
    ) -> DownloadRecord {
        if ledger.contains(&candidate.url) {
            engine_debug!("Already downloaded {}", candidate.url);
            return DownloadRecord::already_downloaded(&candidate.url);
        }

        let saved = if candidate.is_data_uri() {
            self.save_inline(candidate, ordinal)
                .map(|path| (path, ByteSource::Inline))
        } else {
            self.save_remote(candidate, ordinal)
                .await
                .map(|path| (path, ByteSource::Network))
        };

        let (path, source) = match saved {
            Ok(saved) => saved,
            Err(err) => {
                engine_warn!("Failed to download {}: {}", candidate.url, err);
                return DownloadRecord::failed(&candidate.url, err.to_string());
            }
        };

        if let Err(err) = ledger.record(&candidate.url) {
            engine_warn!(
                "Saved {} but could not update {}: {}",
                path.display(),
                ledger.path().display(),
                err
            );
        }
        engine_info!("Saved {} image -> {}", self.prefix, path.display());

        let processed = self.post.process(&path);
        let mut record = DownloadRecord::saved(&candidate.url, processed.path, source);
        if let Some(err) = processed.conversion_error {
            record.warnings.push(format!("{} ({})", candidate.url, err));
        }
        record
    }

    async fn save_remote(
        &self,
        candidate: &Candidate,
        ordinal: usize,
    ) -> Result<PathBuf, DownloadError> {
        let response = self
            .fetcher
            .open_image(&candidate.url, &candidate.referrer_page)
            .await?;

        let original = candidate
            .suggested_name
            .as_deref()
            .and_then(sanitize_filename);
        let ext = best_extension(
            original.as_deref(),
            &candidate.url,
            response.content_type.as_deref(),
        );
        let filename = choose_filename(
            self.keep_filenames,
            original.as_deref(),
            &self.prefix,
            ordinal,
            &ext,
        );

        let max_bytes = self.fetcher.max_image_bytes();
        let mut staged = StagedFile::new_in(&self.destination)?;
        let mut body = response.body;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            let next_len = staged.written() + chunk.len() as u64;
            if next_len > max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes,
                        actual: Some(next_len),
                    },
                    "response too large",
                )
                .into());
            }
            staged.write_chunk(&chunk)?;
        }

        Ok(staged.commit(&filename)?)
    }

    fn save_inline(&self, candidate: &Candidate, ordinal: usize) -> Result<PathBuf, DownloadError> {
        let (header, bytes) = decode_data_uri(&candidate.url)?;
        let ext = data_uri_extension(header);

        // The MIME type decides the extension, whatever the hint says.
        let original = candidate
            .suggested_name
            .as_deref()
            .and_then(sanitize_filename)
            .map(|name| format!("{}{}", split_extension(&name).0, ext));
        let filename = choose_filename(
            self.keep_filenames,
            original.as_deref(),
            &self.prefix,
            ordinal,
            ext,
        );

        let mut staged = StagedFile::new_in(&self.destination)?;
        staged.write_chunk(&bytes)?;
        Ok(staged.commit(&filename)?)
    }
}

/// Splits `data:image/png;base64,AAAA` into its header and decoded bytes.
pub fn decode_data_uri(uri: &str) -> Result<(&str, Vec<u8>), DownloadError> {
    let (header, payload) = uri
        .split_once(',')
        .ok_or_else(|| DownloadError::InvalidDataUri("missing payload separator".into()))?;
    if !header.to_ascii_lowercase().ends_with(";base64") {
        return Err(DownloadError::InvalidDataUri("payload is not base64".into()));
    }

    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(&payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload.trim_end_matches('=')))
        .map_err(|err| DownloadError::InvalidDataUri(err.to_string()))?;
    if bytes.is_empty() {
        return Err(DownloadError::InvalidDataUri("empty payload".into()));
    }
    Ok((header, bytes))
}

/// Receives candidates from a discovery strategy and downloads each one
/// in arrival order, tallying outcomes for the source.
pub struct DownloadStage<'a> {
    downloader: Downloader<'a>,
    ledger: DedupLedger,
    tally: RunTally,
    cancel: &'a CancellationToken,
    progress: &'a dyn ProgressSink,
    engine: String,
    ordinal: usize,
    saved_cap: Option<usize>,
}

impl<'a> DownloadStage<'a> {
    pub fn new(
        downloader: Downloader<'a>,
        ledger: DedupLedger,
        cancel: &'a CancellationToken,
        progress: &'a dyn ProgressSink,
        engine: impl Into<String>,
    ) -> Self {
        Self {
            downloader,
            ledger,
            tally: RunTally::new(),
            cancel,
            progress,
            engine: engine.into(),
            ordinal: 0,
            saved_cap: None,
        }
    }

    /// Stop downloading once this many files were saved.
    pub fn with_saved_cap(mut self, cap: usize) -> Self {
        self.saved_cap = Some(cap);
        self
    }

    pub fn tally(&self) -> &RunTally {
        &self.tally
    }

    pub fn into_tally(self) -> RunTally {
        self.tally
    }

    fn emit_progress(&self) {
        self.progress.emit(EngineEvent::Progress(SourceProgress {
            engine: self.engine.clone(),
            stage: Stage::Downloading,
            saved: self.tally.saved,
            skipped: self.tally.skipped,
        }));
    }
}

#[async_trait::async_trait]
impl CandidateSink for DownloadStage<'_> {
    fn is_known(&self, url: &str) -> bool {
        self.ledger.contains(url)
    }

    async fn accept(&mut self, candidate: Candidate) {
        self.ordinal += 1;
        if self.cancel.is_cancelled() {
            engine_debug!("Cancelled; not downloading {}", candidate.url);
            return;
        }
        if self.saved_cap.is_some_and(|cap| self.tally.saved >= cap) {
            return;
        }

        let record = self
            .downloader
            .download(&candidate, self.ordinal, &mut self.ledger)
            .await;
        self.tally.record(&record);
        self.emit_progress();
    }
}
