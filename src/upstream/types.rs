use serde::Deserialize;

/// Unread total for one category, as reported by `markers/counts`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnreadCount {
    #[serde(rename = "id")]
    pub category_id: String,
    pub count: i64,
}

impl UnreadCount {
    pub fn new(category_id: impl Into<String>, count: i64) -> Self {
        Self {
            category_id: category_id.into(),
            count,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UnreadCountsResponse {
    #[serde(default)]
    pub unreadcounts: Vec<UnreadCount>,
}

/// Body of `streams/{id}/contents`.
///
/// Items stay as raw JSON so one odd item cannot fail the whole page;
/// see [`decode_items`].
#[derive(Debug, Deserialize)]
pub struct StreamContents {
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}

/// One upstream entry exactly as the service sends it. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawItem {
    pub id: Option<String>,
    pub title: Option<String>,
    /// Crawl time in epoch millis.
    pub crawled: Option<i64>,
    pub origin: Option<Origin>,
    pub alternate: Option<Vec<Alternate>>,
    pub content: Option<ItemText>,
    pub summary: Option<ItemText>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Origin {
    pub title: Option<String>,
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Alternate {
    pub href: Option<String>,
}

/// A block of text with its writing direction (`ltr` / `rtl`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ItemText {
    pub content: Option<String>,
    pub direction: Option<String>,
}

/// Decode stream items one at a time, skipping any that do not fit [`RawItem`].
///
/// Returns the decoded items in order and the number skipped.
pub fn decode_items(values: Vec<serde_json::Value>) -> (Vec<RawItem>, usize) {
    let mut skipped = 0;
    let items = values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<RawItem>(value) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping undecodable upstream item");
                skipped += 1;
                None
            }
        })
        .collect();
    (items, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_counts_response_keeps_order() {
        let body = json!({
            "unreadcounts": [
                {"id": "user/1/category/global.all", "count": 5, "updated": 1},
                {"id": "user/1/category/global.uncategorized", "count": 5}
            ]
        });
        let parsed: UnreadCountsResponse = serde_json::from_value(body).unwrap();
        assert_eq!(
            parsed.unreadcounts,
            vec![
                UnreadCount::new("user/1/category/global.all", 5),
                UnreadCount::new("user/1/category/global.uncategorized", 5),
            ]
        );
    }

    #[test]
    fn test_raw_item_full_shape() {
        let item: RawItem = serde_json::from_value(json!({
            "id": "entry-1",
            "title": "Hello",
            "crawled": 1_700_000_000_000i64,
            "origin": {"title": "Blog", "htmlUrl": "https://blog.example.com/x"},
            "alternate": [{"href": "https://blog.example.com/post", "type": "text/html"}],
            "content": {"content": "<p>full</p>", "direction": "ltr"},
            "summary": {"content": "short", "direction": "ltr"}
        }))
        .unwrap();

        assert_eq!(item.id.as_deref(), Some("entry-1"));
        assert_eq!(item.crawled, Some(1_700_000_000_000));
        assert_eq!(
            item.origin.unwrap().html_url.as_deref(),
            Some("https://blog.example.com/x")
        );
        assert_eq!(item.content.unwrap().content.as_deref(), Some("<p>full</p>"));
    }

    #[test]
    fn test_raw_item_empty_object() {
        let item: RawItem = serde_json::from_value(json!({})).unwrap();
        assert_eq!(item, RawItem::default());
    }

    #[test]
    fn test_decode_items_skips_bad_items() {
        let values = vec![
            json!({"id": "a"}),
            json!({"id": "b", "crawled": "yesterday"}),
            json!("not an object"),
            json!({"id": "c"}),
        ];
        let (items, skipped) = decode_items(values);
        assert_eq!(skipped, 2);
        let ids: Vec<_> = items.iter().map(|i| i.id.as_deref().unwrap()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
