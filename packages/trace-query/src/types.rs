//! Shared value types: query windows and (object, trace) identities.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};

/// Hex length of a rendered trace id (16 bytes).
pub const TRACE_ID_HEX_LEN: usize = 32;

/// Hex length of a rendered span id (8 bytes).
pub const SPAN_ID_HEX_LEN: usize = 16;

/// Closed time interval `[start, end]` in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: u64,
    pub end: u64,
}

impl TimeWindow {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(QueryError::InvalidQuery(format!(
                "time window start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Closed-interval overlap: touching at a single instant counts.
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        start <= self.end && end >= self.start
    }

    /// `[start, end]` lies entirely inside the window.
    pub fn contains(&self, start: u64, end: u64) -> bool {
        self.start <= start && end <= self.end
    }
}

/// Composite identity of a trace inside one stored batch object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectTraceKey {
    pub object: String,
    pub trace_id: String,
}

impl ObjectTraceKey {
    pub fn new(object: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            trace_id: trace_id.into(),
        }
    }
}

/// Batch object name -> trace ids of interest in that object.
pub type ObjectTraces = BTreeMap<String, BTreeSet<String>>;

/// Flatten an `ObjectTraces` map into composite keys.
pub fn object_trace_keys(traces: &ObjectTraces) -> impl Iterator<Item = ObjectTraceKey> + '_ {
    traces.iter().flat_map(|(object, ids)| {
        ids.iter().map(move |id| ObjectTraceKey::new(object.as_str(), id.as_str()))
    })
}

/// Total number of (object, trace) pairs in the map.
pub fn pair_count(traces: &ObjectTraces) -> usize {
    traces.values().map(|ids| ids.len()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_rejects_inverted_bounds() {
        let err = TimeWindow::new(20, 10).unwrap_err();
        assert_eq!(err.code(), "INVALID_QUERY");
    }

    #[test]
    fn test_window_overlap_is_closed() {
        let w = TimeWindow::new(1000, 2000).unwrap();
        assert!(w.overlaps(500, 1000));
        assert!(w.overlaps(2000, 2100));
        assert!(w.overlaps(900, 2100));
        assert!(!w.overlaps(500, 999));
        assert!(!w.overlaps(2001, 3000));
    }

    #[test]
    fn test_window_contains() {
        let w = TimeWindow::new(1000, 2000).unwrap();
        assert!(w.contains(1000, 2000));
        assert!(w.contains(1200, 1300));
        assert!(!w.contains(900, 1300));
        assert!(!w.contains(1900, 2001));
    }

    #[test]
    fn test_object_trace_keys_flatten() {
        let mut traces = ObjectTraces::new();
        traces.entry("b1".into()).or_default().insert("t1".into());
        traces.entry("b1".into()).or_default().insert("t2".into());
        traces.entry("b2".into()).or_default().insert("t1".into());

        let keys: Vec<ObjectTraceKey> = object_trace_keys(&traces).collect();
        assert_eq!(keys.len(), 3);
        assert_eq!(pair_count(&traces), 3);
        assert!(keys.contains(&ObjectTraceKey::new("b2", "t1")));
    }
}
