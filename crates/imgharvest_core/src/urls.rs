/// Prefixes `https://` when the seed carries no http(s) scheme.
pub fn normalize_seed_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

/// Directory-friendly slug of a query: lowercase, punctuation dropped,
/// whitespace and hyphen runs collapsed to a single `-`.
pub fn slugify(value: &str) -> String {
    let cleaned: String = value
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();

    let mut slug = String::with_capacity(cleaned.len());
    let mut pending_dash = false;
    for c in cleaned.chars() {
        if c.is_whitespace() || c == '-' {
            pending_dash = true;
            continue;
        }
        if pending_dash && !slug.is_empty() {
            slug.push('-');
        }
        pending_dash = false;
        slug.push(c);
    }

    if slug.is_empty() {
        "query".to_string()
    } else {
        slug
    }
}

pub fn is_http_url(value: &str) -> bool {
    let lower = value.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

pub fn is_data_image_uri(value: &str) -> bool {
    value
        .trim_start()
        .get(..11)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:image/"))
}

/// Last path segment of a URL (query and fragment ignored), or an empty
/// string when there is none.
pub fn url_basename(value: &str) -> String {
    let path = match url::Url::parse(value) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => value
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    path.rsplit('/').next().unwrap_or_default().to_string()
}
