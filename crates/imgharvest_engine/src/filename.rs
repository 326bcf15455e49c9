use std::fmt::Write;

use sha2::{Digest, Sha256};

use crate::persist::split_extension;

const MAX_FILENAME_LEN: usize = 255;
/// Room left for a `_N` collision suffix.
const COLLISION_SUFFIX_RESERVE: usize = 12;

/// Filesystem-safe version of an original filename: every run of characters
/// outside `[A-Za-z0-9_.-]` (Unicode word characters included) becomes a
/// single `_`. Returns `None` when nothing usable is left.
pub fn sanitize_filename(input: &str) -> Option<String> {
    let mut cleaned = String::with_capacity(input.len());
    let mut prev_replaced = false;
    for c in input.trim().chars() {
        if is_allowed(c) {
            cleaned.push(c);
            prev_replaced = false;
        } else if !prev_replaced {
            cleaned.push('_');
            prev_replaced = true;
        }
    }

    let trimmed = cleaned.trim_matches(&['.', ' '][..]);
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_') {
        return None;
    }

    let mut final_name = truncate_at_boundary(trimmed, MAX_FILENAME_LEN).to_string();
    if is_reserved_windows_name(split_extension(&final_name).0) {
        final_name.insert(0, '_');
    }
    Some(final_name)
}

fn is_allowed(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}

/// `{prefix}_{ordinal:04}{ext}`, e.g. `bing_0007.jpg`.
pub fn synthesized_filename(prefix: &str, ordinal: usize, ext: &str) -> String {
    format!("{prefix}_{ordinal:04}{ext}")
}

/// Picks the on-disk name for a download. `original` must already be
/// sanitized; it is only honoured when `keep_original` is set.
pub fn choose_filename(
    keep_original: bool,
    original: Option<&str>,
    prefix: &str,
    ordinal: usize,
    ext: &str,
) -> String {
    match original {
        Some(name) if keep_original && !name.is_empty() => {
            if split_extension(name).1.is_empty() {
                fit_filename(&format!("{name}{ext}"))
            } else {
                fit_filename(name)
            }
        }
        _ => synthesized_filename(prefix, ordinal, ext),
    }
}

/// Shortens the stem so that the name plus a collision suffix stays within
/// the filesystem's name limit. Overlong extensions are cut with the rest.
pub(crate) fn fit_filename(name: &str) -> String {
    let budget = MAX_FILENAME_LEN - COLLISION_SUFFIX_RESERVE;
    if name.len() <= budget {
        return name.to_string();
    }
    let (stem, ext) = split_extension(name);
    if ext.len() >= budget / 2 {
        return truncate_at_boundary(name, budget).to_string();
    }
    format!("{}{ext}", truncate_at_boundary(stem, budget - ext.len()))
}

fn truncate_at_boundary(value: &str, max: usize) -> &str {
    let mut end = max.min(value.len());
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Stable name for images that only exist as data URIs.
pub fn data_uri_filename(uri: &str) -> String {
    format!("data_image_{}.jpg", short_hash(uri))
}

/// First 10 hex digits of the SHA-256 of `input`.
pub fn short_hash(input: &str) -> String {
    let mut hex = sha256_hex(input);
    hex.truncate(10);
    hex
}

pub(crate) fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}
