use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

use crate::upstream::RawItem;
use crate::util::site_origin;

/// Source link used when an item's origin URL is missing or malformed.
pub const PLACEHOLDER_SOURCE_URL: &str = "#";

/// Writing direction of a block of entry text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextDirection {
    #[default]
    Ltr,
    Rtl,
}

impl TextDirection {
    fn from_hint(hint: Option<&str>) -> Self {
        match hint {
            Some(h) if h.trim().eq_ignore_ascii_case("rtl") => TextDirection::Rtl,
            _ => TextDirection::Ltr,
        }
    }
}

/// One unread feed item, normalized from a [`RawItem`].
///
/// Optional upstream fields are flattened to empty strings; only the
/// timestamp keeps its `Option`, since "no timestamp" sorts as the epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub id: String,
    pub published_at: Option<DateTime<Utc>>,
    pub title: String,
    pub title_direction: TextDirection,
    pub body: String,
    pub body_direction: TextDirection,
    pub source_name: String,
    pub source_url: String,
    pub permalink: String,
}

impl Entry {
    /// Timestamp used for watermark comparison, in epoch millis (absent = 0).
    pub fn published_ms(&self) -> i64 {
        self.published_at.map_or(0, |t| t.timestamp_millis())
    }

    /// Normalize an upstream item.
    ///
    /// Never fails: a missing or malformed origin URL becomes
    /// [`PLACEHOLDER_SOURCE_URL`], missing text becomes `""`, and an item
    /// without an id gets a stable id hashed from its link, title and time.
    pub fn from_raw(item: RawItem, show_full_content: bool) -> Self {
        let RawItem {
            id,
            title,
            crawled,
            origin,
            alternate,
            content,
            summary,
        } = item;

        let (source_name, origin_url) = match origin {
            Some(o) => (o.title.unwrap_or_default(), o.html_url),
            None => (String::new(), None),
        };
        let source_url = match origin_url.as_deref().and_then(site_origin) {
            Some(url) => url,
            None => {
                tracing::debug!(origin = ?origin_url, "Unusable origin URL, using placeholder");
                PLACEHOLDER_SOURCE_URL.to_string()
            }
        };

        let permalink = alternate
            .and_then(|links| links.into_iter().next())
            .and_then(|link| link.href)
            .unwrap_or_default();

        let mut body = String::new();
        let mut body_direction = TextDirection::Ltr;
        if show_full_content {
            if let Some(full) = content {
                body = full.content.unwrap_or_default();
                body_direction = TextDirection::from_hint(full.direction.as_deref());
            }
        }
        if body.is_empty() {
            if let Some(short) = summary {
                body = short.content.unwrap_or_default();
                body_direction = TextDirection::from_hint(short.direction.as_deref());
            }
        }

        let (title, title_direction) = normalize_title(title.unwrap_or_default());
        let published_at = crawled.and_then(DateTime::from_timestamp_millis);
        let id = match id.map(|s| s.trim().to_string()) {
            Some(id) if !id.is_empty() => id,
            _ => synthesize_id(&permalink, &title, crawled),
        };

        Self {
            id,
            published_at,
            title,
            title_direction,
            body,
            body_direction,
            source_name,
            source_url,
            permalink,
        }
    }
}

/// Map a page of upstream items, preserving order.
pub fn map_items(items: Vec<RawItem>, show_full_content: bool) -> Vec<Entry> {
    items
        .into_iter()
        .map(|item| Entry::from_raw(item, show_full_content))
        .collect()
}

fn div_tag() -> Option<&'static Regex> {
    static DIV_TAG: OnceLock<Option<Regex>> = OnceLock::new();
    DIV_TAG
        .get_or_init(|| Regex::new(r"(?is)</?div[^>]*>").ok())
        .as_ref()
}

/// Right-to-left titles arrive wrapped in a styled `<div>`; notifications
/// only take plain text, so the wrapper is removed and the direction kept.
fn normalize_title(title: String) -> (String, TextDirection) {
    if title.contains("direction:rtl") {
        let stripped = match div_tag() {
            Some(re) => re.replace_all(&title, "").into_owned(),
            None => title,
        };
        (stripped, TextDirection::Rtl)
    } else {
        (title, TextDirection::Ltr)
    }
}

fn synthesize_id(permalink: &str, title: &str, crawled: Option<i64>) -> String {
    let input = format!(
        "{}|{}|{}",
        permalink,
        title,
        crawled.map(|c| c.to_string()).unwrap_or_default()
    );
    format!("{:x}", Sha256::digest(input.as_bytes()))
}
