use super::entry::Entry;

/// Publication time of the newest entry already processed, in epoch millis.
///
/// Before the first sync it sits at [`Watermark::BEGINNING`], which is older
/// than every timestamp including the epoch, so undated entries are new
/// exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(i64);

impl Watermark {
    pub const BEGINNING: Watermark = Watermark(i64::MIN);

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    /// Restore from storage; `None` means no sync has completed yet.
    pub fn from_stored(stored: Option<i64>) -> Self {
        stored.map_or(Self::BEGINNING, Self)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    pub fn is_beginning(self) -> bool {
        self == Self::BEGINNING
    }

    /// Strictly newer than the watermark; equal timestamps are already seen.
    pub fn admits(self, entry: &Entry) -> bool {
        entry.published_ms() > self.0
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::BEGINNING
    }
}

/// Outcome of comparing a fetched page against the watermark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntries {
    /// Entries newer than the watermark, in fetch order.
    pub entries: Vec<Entry>,
    /// The watermark to persist: never older than the one compared against.
    pub max_seen: Watermark,
}

/// Select the entries strictly newer than `watermark`, and the watermark
/// those entries move it to.
pub fn filter_new(entries: &[Entry], watermark: Watermark) -> NewEntries {
    let mut max_seen = watermark;
    let mut fresh = Vec::new();
    for entry in entries {
        max_seen = max_seen.max(Watermark(entry.published_ms()));
        if watermark.admits(entry) {
            fresh.push(entry.clone());
        }
    }

    NewEntries {
        entries: fresh,
        max_seen,
    }
}
