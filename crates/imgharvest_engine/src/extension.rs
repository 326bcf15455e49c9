use crate::persist::split_extension;

pub const DEFAULT_EXTENSION: &str = ".jpg";

/// Extensions accepted from filename and URL hints.
pub const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".webp", ".tiff", ".tif",
];

/// Picks an extension from, in order: the original filename, the URL path,
/// the response content type, then `.jpg`. Only allow-listed extensions win;
/// `.jpe` counts as `.jpg`.
pub fn best_extension(original_name: Option<&str>, url: &str, content_type: Option<&str>) -> String {
    let hints = [
        original_name.and_then(path_extension),
        path_extension(url),
        content_type.and_then(extension_for_mime),
    ];

    hints
        .into_iter()
        .flatten()
        .map(|ext| if ext == ".jpe" { DEFAULT_EXTENSION.to_string() } else { ext })
        .find(|ext| ALLOWED_IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Lowercased extension of the last path segment, ignoring query and fragment.
fn path_extension(source: &str) -> Option<String> {
    let without_query = source.split(['?', '#']).next().unwrap_or_default();
    let segment = without_query.rsplit('/').next().unwrap_or_default();
    let ext = split_extension(segment).1;
    if ext.len() > 1 {
        Some(ext.to_ascii_lowercase())
    } else {
        None
    }
}

fn extension_for_mime(content_type: &str) -> Option<String> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let ext = match mime.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/bmp" | "image/x-ms-bmp" => ".bmp",
        "image/webp" => ".webp",
        "image/tiff" => ".tiff",
        _ => return None,
    };
    Some(ext.to_string())
}

/// Extension implied by a data URI header such as `data:image/png;base64`.
pub fn data_uri_extension(header: &str) -> &'static str {
    let lower = header.to_ascii_lowercase();
    if lower.contains("image/png") {
        ".png"
    } else if lower.contains("image/gif") {
        ".gif"
    } else if lower.contains("image/webp") {
        ".webp"
    } else {
        DEFAULT_EXTENSION
    }
}

pub fn has_extension(path: &std::path::Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext.trim_start_matches('.')))
}
