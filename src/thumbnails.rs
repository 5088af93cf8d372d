//! Crop thumbnail lookup.
//!
//! Images are decoration: every failure (network, status, missing field)
//! degrades to "no image" and is only logged.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

// ---

#[async_trait]
pub trait ThumbnailLookup: Send + Sync {
    /// Image URL for `name`, or `None`. Never fails.
    async fn lookup(&self, name: &str) -> Option<String>;
}

/// Page-summary API (Wikipedia REST `page/summary/{title}`).
pub struct WikipediaThumbnails {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PageSummary {
    thumbnail: Option<ImageRef>,
    originalimage: Option<ImageRef>,
}

#[derive(Debug, Deserialize)]
struct ImageRef {
    source: String,
}

impl WikipediaThumbnails {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        // ---
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("piliseed/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn page_url(&self, name: &str) -> String {
        let title = page_title(name);
        format!("{}/{}", self.base_url.trim_end_matches('/'), title)
    }

    async fn fetch(&self, name: &str) -> Result<Option<String>, reqwest::Error> {
        // ---
        let summary: PageSummary = self
            .http
            .get(self.page_url(name))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(summary
            .thumbnail
            .or(summary.originalimage)
            .map(|img| img.source))
    }
}

#[async_trait]
impl ThumbnailLookup for WikipediaThumbnails {
    async fn lookup(&self, name: &str) -> Option<String> {
        // ---
        if name.trim().is_empty() {
            return None;
        }
        match self.fetch(name).await {
            Ok(Some(url)) => Some(url),
            Ok(None) => {
                tracing::debug!(name, "no thumbnail on page summary");
                None
            }
            Err(e) => {
                tracing::warn!(name, error = %e, "thumbnail lookup failed");
                None
            }
        }
    }
}

/// Lookup that never finds anything (used when images are disabled).
pub struct NoThumbnails;

#[async_trait]
impl ThumbnailLookup for NoThumbnails {
    async fn lookup(&self, _name: &str) -> Option<String> {
        None
    }
}

/// Encyclopedia-style title: trimmed, first letter upper-cased, spaces as
/// underscores, and path-unsafe characters percent-encoded.
fn page_title(name: &str) -> String {
    // ---
    let trimmed = name.trim();
    let mut chars = trimmed.chars();
    let capitalized: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };

    let mut out = String::with_capacity(capitalized.len());
    for c in capitalized.chars() {
        match c {
            ' ' => out.push('_'),
            'A'..='Z' | 'a'..='z' | '0'..='9' | '_' | '-' | '.' | '(' | ')' | ',' => out.push(c),
            _ => {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_page_title_encoding() {
        // ---
        assert_eq!(page_title("bitter gourd"), "Bitter_gourd");
        assert_eq!(page_title("  mustard greens "), "Mustard_greens");
        assert_eq!(page_title("Ampalaya - Jade 20"), "Ampalaya_-_Jade_20");
        assert_eq!(page_title("Ñame/yam"), "%C3%91ame%2Fyam");
        assert_eq!(page_title(""), "");
    }

    #[test]
    fn test_page_url_joins_base() {
        // ---
        let lookup = WikipediaThumbnails::new("https://example.test/summary/", Duration::from_secs(1)).unwrap();
        assert_eq!(lookup.page_url("eggplant"), "https://example.test/summary/Eggplant");
    }

    #[tokio::test]
    async fn test_unreachable_service_degrades_to_none() {
        // ---
        // port 9 (discard) on localhost is not an HTTP server
        let lookup = WikipediaThumbnails::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        assert_eq!(lookup.lookup("eggplant").await, None);
        assert_eq!(lookup.lookup("   ").await, None);
        assert_eq!(NoThumbnails.lookup("eggplant").await, None);
    }
}
