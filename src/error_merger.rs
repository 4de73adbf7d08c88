// Error interval merging, in two stages:
// - within one source, same-message intervals that overlap or touch are coalesced;
// - across sources, overlapping windows are unioned into grouped overlay windows that keep
//   each source's intervals for display.

use std::collections::BTreeMap;

use crate::models::{ErrorInterval, GroupedMultiErrorInterval};

#[derive(Debug, Default)]
pub struct ErrorIntervalCollector {
    intervals: Vec<ErrorInterval>,
}

impl ErrorIntervalCollector {
    pub fn add(&mut self, interval: ErrorInterval) {
        self.intervals.push(interval);
    }

    pub fn add_all(&mut self, intervals: &[ErrorInterval]) {
        self.intervals.extend_from_slice(intervals);
    }

    /// Coalesced intervals ordered by `(from, to)`.
    pub fn into_merged(self) -> Vec<ErrorInterval> {
        let mut by_message: BTreeMap<String, Vec<ErrorInterval>> = BTreeMap::new();
        for interval in self.intervals {
            by_message
                .entry(interval.message.clone())
                .or_default()
                .push(interval);
        }
        let mut out = Vec::new();
        for (_message, mut intervals) in by_message {
            intervals.sort_by_key(|i| (i.from, i.to));
            let mut curr: Option<ErrorInterval> = None;
            for interval in intervals {
                match curr.as_mut() {
                    Some(c) if interval.from <= c.to => {
                        c.to = c.to.max(interval.to);
                        c.count = c.count.saturating_add(interval.count);
                    }
                    _ => out.extend(curr.replace(interval)),
                }
            }
            out.extend(curr);
        }
        out.sort_by(|a, b| (a.from, a.to, &a.message).cmp(&(b.from, b.to, &b.message)));
        out
    }
}

#[derive(Debug, Default)]
pub struct MultiErrorIntervalMerger {
    intervals: Vec<(String, ErrorInterval)>,
}

impl MultiErrorIntervalMerger {
    /// Adds one source's intervals (already coalesced within that source).
    pub fn add_error_intervals(&mut self, source_id: &str, intervals: &[ErrorInterval]) {
        self.intervals.extend(
            intervals
                .iter()
                .map(|interval| (source_id.to_string(), interval.clone())),
        );
    }

    /// Groups overlapping windows. A group spans the union (min from, max to) of its members,
    /// so a smaller incident fully inside a larger one is kept, never clipped.
    pub fn into_grouped(mut self) -> Vec<GroupedMultiErrorInterval> {
        self.intervals
            .sort_by(|(a_src, a), (b_src, b)| (a.from, a.to, a_src).cmp(&(b.from, b.to, b_src)));
        let mut out = Vec::new();
        let mut curr: Option<GroupedMultiErrorInterval> = None;
        for (source_id, interval) in self.intervals {
            match curr.as_mut() {
                Some(group) if interval.from <= group.to => {
                    group.to = group.to.max(interval.to);
                    group
                        .error_intervals
                        .entry(source_id)
                        .or_default()
                        .push(interval);
                }
                _ => {
                    let group = GroupedMultiErrorInterval {
                        from: interval.from,
                        to: interval.to,
                        error_intervals: BTreeMap::from([(source_id, vec![interval])]),
                    };
                    out.extend(curr.replace(group));
                }
            }
        }
        out.extend(curr);
        out
    }
}

/// Convenience over [`MultiErrorIntervalMerger`] for a full per-source map.
pub fn group_error_intervals(
    by_source: &BTreeMap<String, Vec<ErrorInterval>>,
) -> Vec<GroupedMultiErrorInterval> {
    let mut merger = MultiErrorIntervalMerger::default();
    for (source_id, intervals) in by_source {
        merger.add_error_intervals(source_id, intervals);
    }
    merger.into_grouped()
}
