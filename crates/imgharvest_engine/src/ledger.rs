use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use engine_logging::{engine_debug, engine_warn};
use imgharvest_core::is_data_image_uri;

use crate::filename::sha256_hex;
use crate::persist::PersistError;

pub const LEDGER_FILENAME: &str = "_downloaded_urls.txt";

/// Append-only record of every URL already saved into one destination
/// directory, one key per line.
#[derive(Debug)]
pub struct DedupLedger {
    path: PathBuf,
    seen: HashSet<String>,
}

impl DedupLedger {
    /// Loads the ledger of `dir`. A missing file is an empty ledger; an
    /// unreadable one is logged and treated as empty.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(LEDGER_FILENAME);
        let seen = match fs::read_to_string(&path) {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => HashSet::new(),
            Err(err) => {
                engine_warn!("Could not read ledger {}: {}", path.display(), err);
                HashSet::new()
            }
        };
        engine_debug!("Loaded {} ledger entries from {}", seen.len(), path.display());
        Self { path, seen }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, url: &str) -> bool {
        self.seen.contains(&canonical_key(url))
    }

    /// Appends `url` to the file and the in-memory set. Recording a URL
    /// twice is a no-op.
    pub fn record(&mut self, url: &str) -> Result<(), PersistError> {
        let key = canonical_key(url);
        if self.seen.contains(&key) {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{key}")?;
        self.seen.insert(key);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Ledger key for `url`: http(s) URLs verbatim, data URIs by content digest
/// so multi-megabyte payloads never land in the file.
pub fn canonical_key(url: &str) -> String {
    let trimmed = url.trim();
    if is_data_image_uri(trimmed) {
        format!("data:sha256:{}", sha256_hex(trimmed))
    } else {
        trimmed.to_string()
    }
}
