//! Chapter binding.
//!
//! Chapters from the source are remapped through the trim list before they
//! are attached to the output container. A chapter whose start catches up
//! with its end after trimming is dropped.

use muxpipe_core::{TimeBase, TimestampAdjuster};
use std::collections::BTreeMap;
use tracing::debug;

/// A chapter marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    /// Chapter id, unique within the container.
    pub id: u32,
    /// Start timestamp in `time_base` units.
    pub start: i64,
    /// End timestamp in `time_base` units.
    pub end: i64,
    /// Time base of `start` and `end`.
    pub time_base: TimeBase,
    /// Metadata copied verbatim to the container.
    pub metadata: BTreeMap<String, String>,
}

impl Chapter {
    /// Create a chapter.
    pub fn new(id: u32, start: i64, end: i64, time_base: TimeBase) -> Self {
        Self {
            id,
            start,
            end,
            time_base,
            metadata: BTreeMap::new(),
        }
    }

    /// Set the chapter title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.metadata.insert("title".to_string(), title.into());
        self
    }

    /// The chapter title, if set.
    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").map(String::as_str)
    }
}

/// Remap chapters through the trim list, dropping the ones whose adjusted
/// range collapses, renumbering the survivors in order.
///
/// A `title` key is always present afterwards.
pub fn bind_chapters(chapters: &[Chapter], adjuster: &TimestampAdjuster) -> Vec<Chapter> {
    let mut out = Vec::with_capacity(chapters.len());
    for chapter in chapters {
        let tb = chapter.time_base;
        let start = adjuster
            .adjust(chapter.start, tb, tb, true)
            .expect("last_valid_frame mapping is total");
        let end = adjuster
            .adjust(chapter.end, tb, tb, true)
            .expect("last_valid_frame mapping is total");
        if start >= end {
            debug!(id = chapter.id, "chapter collapsed by trim, dropping");
            continue;
        }
        let id = out.len() as u32 + 1;
        let mut metadata = chapter.metadata.clone();
        metadata
            .entry("title".to_string())
            .or_insert_with(|| format!("Chapter {:02}", id));
        out.push(Chapter {
            id,
            start,
            end,
            time_base: tb,
            metadata,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxpipe_core::{Rational, TrimList, TrimRange};

    fn adjuster(ranges: &[(i64, i64)]) -> TimestampAdjuster {
        let trims =
            TrimList::new(ranges.iter().map(|&(s, e)| TrimRange::new(s, e)).collect()).unwrap();
        TimestampAdjuster::new(Rational::new(30, 1), trims)
    }

    #[test]
    fn test_bind_without_trim_keeps_all() {
        let tb = TimeBase::MILLISECONDS;
        let chapters = vec![
            Chapter::new(7, 0, 10_000, tb).with_title("A"),
            Chapter::new(9, 10_000, 20_000, tb).with_title("B"),
        ];
        let bound = bind_chapters(&chapters, &adjuster(&[]));
        assert_eq!(bound.len(), 2);
        assert_eq!(bound[0].id, 1);
        assert_eq!(bound[1].id, 2);
        assert_eq!(bound[0].title(), Some("A"));
        assert_eq!(bound[0].start, 0);
        assert_eq!(bound[1].end, 20_000);
    }

    #[test]
    fn test_bind_drops_collapsed_chapter() {
        // trim keeps [150, end) at 30fps = keeps from t = 5 s
        let tb = TimeBase::MILLISECONDS;
        let chapters = vec![
            Chapter::new(1, 0, 5_000, tb).with_title("A"),
            Chapter::new(2, 10_000, 20_000, tb).with_title("B"),
        ];
        let bound = bind_chapters(&chapters, &adjuster(&[(150, i64::MAX)]));
        // chapter A's end remaps to 0: dropped; B survives shifted by 5 s
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].title(), Some("B"));
        assert_eq!(bound[0].id, 1);
        assert_eq!(bound[0].start, 5_000);
        assert_eq!(bound[0].end, 15_000);
    }

    #[test]
    fn test_bind_chapter_start_snaps_into_kept_region() {
        let tb = TimeBase::MILLISECONDS;
        // chapter starting at t=0 with trim starting at frame 150: start snaps to 0
        let chapters = vec![Chapter::new(1, 0, 20_000, tb).with_title("B")];
        let bound = bind_chapters(&chapters, &adjuster(&[(150, i64::MAX)]));
        assert_eq!(bound[0].start, 0);
        assert_eq!(bound[0].end, 15_000);
    }

    #[test]
    fn test_bind_synthesizes_title() {
        let tb = TimeBase::MILLISECONDS;
        let chapters = vec![Chapter::new(1, 0, 1_000, tb)];
        let bound = bind_chapters(&chapters, &adjuster(&[]));
        assert_eq!(bound[0].title(), Some("Chapter 01"));
    }
}
