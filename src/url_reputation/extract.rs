use regex::Regex;
use std::collections::BTreeSet;
use url::Url;

/// Path extensions of static assets that are never a phishing landing page.
pub const LOW_VALUE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "bmp", "ico", "svg", "css", "js", "woff", "woff2",
    "ttf", "otf", "eot",
];

/// Pulls candidate links out of message bodies.
pub struct UrlExtractor {
    url_regex: Regex,
    entity_regex: Regex,
}

impl Default for UrlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlExtractor {
    pub fn new() -> Self {
        Self {
            url_regex: Regex::new(r#"(?i)\bhttps?://[^\s"'<>()\[\]{}\\^`|]+"#).unwrap(),
            entity_regex: Regex::new(r"&(?:#([0-9]{1,7})|#[xX]([0-9a-fA-F]{1,6})|([a-zA-Z]+));")
                .unwrap(),
        }
    }

    /// Unique, normalised, non-asset links found in either body.
    pub fn extract(&self, text: &str, html: &str) -> BTreeSet<String> {
        let decoded = self.decode_html_entities(html);
        let mut urls = BTreeSet::new();
        for body in [text, decoded.as_str()] {
            for m in self.url_regex.find_iter(body) {
                let candidate = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
                if let Some(normalized) = normalize_url(candidate) {
                    if !is_low_value(&normalized) {
                        urls.insert(normalized);
                    }
                }
            }
        }
        urls
    }

    pub fn decode_html_entities(&self, text: &str) -> String {
        self.entity_regex
            .replace_all(text, |caps: &regex::Captures| {
                let code = if let Some(decimal) = caps.get(1) {
                    decimal.as_str().parse::<u32>().ok()
                } else if let Some(hex) = caps.get(2) {
                    u32::from_str_radix(hex.as_str(), 16).ok()
                } else {
                    None
                };
                if let Some(ch) = code.and_then(char::from_u32) {
                    return ch.to_string();
                }
                let named = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
                match named {
                    "amp" => "&".to_string(),
                    "lt" => "<".to_string(),
                    "gt" => ">".to_string(),
                    "quot" => "\"".to_string(),
                    "apos" => "'".to_string(),
                    "nbsp" => " ".to_string(),
                    _ => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

/// Parses and re-serialises an http(s) link so equivalent spellings compare equal.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

pub fn is_low_value(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let last_segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    match last_segment.rsplit_once('.') {
        Some((_, ext)) => LOW_VALUE_EXTENSIONS.contains(&ext.to_lowercase().as_str()),
        None => false,
    }
}
