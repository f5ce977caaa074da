//! Interval rollup over stored hourly buckets.
//!
//! One implementation is shared by every backend. Each entity's rows are
//! scanned newest-first and folded into windows of `interval`: flow fields are
//! summed, snapshot fields keep the newest row's values. The newest window is
//! anchored to the query's `to` edge when it is bounded.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashMap;

/// A stored bucket the rollup engine can fold.
pub trait Bucket: Clone {
    fn time(&self) -> DateTime<Utc>;

    fn set_time(&mut self, time: DateTime<Utc>);

    /// Entity the row belongs to. Rows sharing a key roll up together.
    fn group_key(&self) -> &str;

    /// Fold an older row into this one: add flow fields, keep snapshot fields.
    fn merge(&mut self, other: &Self);
}

/// Roll `rows` (ascending by time) up into `interval` windows.
///
/// Groups come out in order of first appearance, each ascending. An interval
/// of zero or less returns the rows untouched.
pub fn rollup<B: Bucket>(rows: Vec<B>, to: Option<DateTime<Utc>>, interval: Duration) -> Vec<B> {
    if interval <= Duration::zero() || rows.is_empty() {
        return rows;
    }

    let mut order: Vec<String> = Vec::new();
    let mut groups: FxHashMap<String, Vec<B>> = FxHashMap::default();
    for row in rows {
        match groups.get_mut(row.group_key()) {
            Some(group) => group.push(row),
            None => {
                order.push(row.group_key().to_string());
                groups.insert(row.group_key().to_string(), vec![row]);
            },
        }
    }

    let mut out = Vec::new();
    for key in order {
        if let Some(group) = groups.remove(&key) {
            out.extend(rollup_group(group, to, interval));
        }
    }
    out
}

fn rollup_group<B: Bucket>(rows: Vec<B>, to: Option<DateTime<Utc>>, interval: Duration) -> VecDeque<B> {
    let mut windows = VecDeque::new();
    let mut scan = rows.into_iter().rev();

    let Some(mut window) = scan.next() else {
        return windows;
    };
    let mut window_time = window.time();
    // The first window spans [to - interval, to); later ones close at a full interval.
    let mut pinned = false;
    if let Some(to) = to {
        window.set_time(to);
        pinned = true;
    }

    for row in scan {
        let gap = window.time() - row.time();
        let closed = if pinned { gap > interval } else { gap >= interval };

        if closed {
            window.set_time(window_time);
            windows.push_front(window);

            window_time = row.time();
            window = row;
            pinned = false;
        } else {
            window.merge(&row);
        }
    }

    window.set_time(window_time);
    windows.push_front(window);
    windows
}
