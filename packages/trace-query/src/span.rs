//! Raw span data stored per service and batch.
//!
//! A span bucket object is a JSON `SpanBatch`. Ids are byte strings written
//! as lowercase hex; timestamps are unix nanoseconds.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{QueryError, Result};

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Attribute or condition value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
}

impl AttributeValue {
    /// Order two values. Numbers compare numerically across Int/Double;
    /// a string compared with a number is parsed as a number first.
    /// Returns `None` for incomparable kinds.
    pub fn compare(&self, other: &AttributeValue) -> Option<Ordering> {
        use AttributeValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Str(a), Str(b)) => Some(a.cmp(b)),
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Str(s), other) => parse_number(s)?.compare(other),
            (this, Str(s)) => this.compare(&parse_number(s)?),
            (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(v) => Some(*v as f64),
            AttributeValue::Double(v) => Some(*v),
            _ => None,
        }
    }
}

fn parse_number(s: &str) -> Option<AttributeValue> {
    let s = s.trim();
    if let Ok(v) = s.parse::<i64>() {
        return Some(AttributeValue::Int(v));
    }
    s.parse::<f64>().ok().map(AttributeValue::Double)
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(v) => write!(f, "{}", v),
            AttributeValue::Int(v) => write!(f, "{}", v),
            AttributeValue::Double(v) => write!(f, "{}", v),
            AttributeValue::Str(v) => f.write_str(v),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Str(s.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

/// Which property of a span a condition reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanField {
    TraceId,
    SpanId,
    ParentSpanId,
    Name,
    StartTime,
    EndTime,
    Duration,
    Attribute(String),
}

impl SpanField {
    pub fn read(&self, span: &SpanRecord) -> Option<AttributeValue> {
        match self {
            SpanField::TraceId => Some(AttributeValue::Str(span.trace_id_hex())),
            SpanField::SpanId => Some(AttributeValue::Str(span.span_id_hex())),
            SpanField::ParentSpanId => Some(AttributeValue::Str(hex_encode(&span.parent_span_id))),
            SpanField::Name => Some(AttributeValue::Str(span.name.clone())),
            SpanField::StartTime => i64::try_from(span.start_time_unix_nano)
                .ok()
                .map(AttributeValue::Int),
            SpanField::EndTime => i64::try_from(span.end_time_unix_nano)
                .ok()
                .map(AttributeValue::Int),
            SpanField::Duration => i64::try_from(span.duration_nanos())
                .ok()
                .map(AttributeValue::Int),
            SpanField::Attribute(key) => span.attributes.get(key).cloned(),
        }
    }

    /// Name used to locate an index bucket for this property.
    pub fn property_name(&self) -> &str {
        match self {
            SpanField::TraceId => "trace-id",
            SpanField::SpanId => "span-id",
            SpanField::ParentSpanId => "parent-span-id",
            SpanField::Name => "name",
            SpanField::StartTime => "start-time",
            SpanField::EndTime => "end-time",
            SpanField::Duration => "duration",
            SpanField::Attribute(key) => key.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    #[serde(with = "hex_bytes")]
    pub trace_id: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub span_id: Vec<u8>,
    #[serde(with = "hex_bytes", default)]
    pub parent_span_id: Vec<u8>,
    #[serde(default)]
    pub name: String,
    pub start_time_unix_nano: u64,
    pub end_time_unix_nano: u64,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl SpanRecord {
    pub fn trace_id_hex(&self) -> String {
        hex_encode(&self.trace_id)
    }

    pub fn span_id_hex(&self) -> String {
        hex_encode(&self.span_id)
    }

    pub fn duration_nanos(&self) -> u64 {
        self.end_time_unix_nano.saturating_sub(self.start_time_unix_nano)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpanBatch {
    pub spans: Vec<SpanRecord>,
}

impl SpanBatch {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| QueryError::MalformedRecord(format!("span batch: {}", e)))
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// `trace id -> (start, end)` in unix seconds over the spans of each
    /// listed trace: earliest start rounded down, latest end rounded up.
    /// Traces with no spans in the batch are absent.
    pub fn trace_intervals(&self, trace_ids: &BTreeSet<String>) -> HashMap<String, (u64, u64)> {
        let mut intervals: HashMap<String, (u64, u64)> = HashMap::new();
        for span in &self.spans {
            let id = span.trace_id_hex();
            if !trace_ids.contains(&id) {
                continue;
            }
            let start = span.start_time_unix_nano / NANOS_PER_SECOND;
            let end = span.end_time_unix_nano / NANOS_PER_SECOND
                + u64::from(span.end_time_unix_nano % NANOS_PER_SECOND != 0);
            intervals
                .entry(id)
                .and_modify(|(s, e)| {
                    *s = (*s).min(start);
                    *e = (*e).max(end);
                })
                .or_insert((start, end));
        }
        intervals
    }
}

/// Spans of one batch keyed by hex span id.
#[derive(Debug, Clone, Default)]
pub struct SpanTable {
    by_id: HashMap<String, SpanRecord>,
}

impl SpanTable {
    pub fn get(&self, span_id_hex: &str) -> Option<&SpanRecord> {
        self.by_id.get(span_id_hex)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl From<SpanBatch> for SpanTable {
    fn from(batch: SpanBatch) -> Self {
        let mut by_id = HashMap::with_capacity(batch.spans.len());
        for span in batch.spans {
            // First occurrence wins.
            by_id.entry(span.span_id_hex()).or_insert(span);
        }
        Self { by_id }
    }
}

pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

mod hex_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex_encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex_decode(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid hex id '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(trace: &str, id: &str, start: u64, end: u64) -> SpanRecord {
        SpanRecord {
            trace_id: hex_decode(trace).unwrap(),
            span_id: hex_decode(id).unwrap(),
            parent_span_id: Vec::new(),
            name: "GET /".to_string(),
            start_time_unix_nano: start,
            end_time_unix_nano: end,
            attributes: BTreeMap::from([("http.status_code".to_string(), AttributeValue::Int(200))]),
        }
    }

    #[test]
    fn test_hex_roundtrip_and_rejects() {
        let bytes = vec![0x00, 0xab, 0x7f];
        assert_eq!(hex_encode(&bytes), "00ab7f");
        assert_eq!(hex_decode("00ab7f"), Some(bytes));
        assert_eq!(hex_decode("abc"), None);
        assert_eq!(hex_decode("zz"), None);
    }

    #[test]
    fn test_span_json_shape() {
        let json = r#"{"spans": [{
            "trace_id": "0af7651916cd43dd8448eb211c80319c",
            "span_id": "b7ad6b7169203331",
            "name": "charge",
            "start_time_unix_nano": 1000000000000,
            "end_time_unix_nano": 1000500000000,
            "attributes": {"http.status_code": 500, "region": "eu", "retry": true, "ratio": 0.5}
        }]}"#;
        let batch = SpanBatch::from_json(json.as_bytes()).unwrap();
        let s = &batch.spans[0];
        assert_eq!(s.span_id_hex(), "b7ad6b7169203331");
        assert!(s.parent_span_id.is_empty());
        assert_eq!(s.attributes["http.status_code"], AttributeValue::Int(500));
        assert_eq!(s.attributes["region"], AttributeValue::Str("eu".into()));
        assert_eq!(s.attributes["retry"], AttributeValue::Bool(true));
        assert_eq!(s.attributes["ratio"], AttributeValue::Double(0.5));
    }

    #[test]
    fn test_bad_span_json_is_malformed() {
        let err = SpanBatch::from_json(br#"{"spans": [{"trace_id": "xyz"}]}"#).unwrap_err();
        assert_eq!(err.code(), "MALFORMED_RECORD");
    }

    #[test]
    fn test_compare_coerces() {
        let int = AttributeValue::Int(200);
        assert_eq!(int.compare(&AttributeValue::Int(200)), Some(Ordering::Equal));
        assert_eq!(int.compare(&AttributeValue::Double(250.0)), Some(Ordering::Less));
        assert_eq!(int.compare(&"200".into()), Some(Ordering::Equal));
        assert_eq!(AttributeValue::from("500").compare(&int), Some(Ordering::Greater));
        assert_eq!(AttributeValue::from("abc").compare(&"abd".into()), Some(Ordering::Less));
        assert_eq!(AttributeValue::from("abc").compare(&int), None);
        assert_eq!(AttributeValue::Bool(true).compare(&int), None);
    }

    #[test]
    fn test_field_reads() {
        let s = span("0af7651916cd43dd8448eb211c80319c", "b7ad6b7169203331", 10, 35);
        assert_eq!(SpanField::Duration.read(&s), Some(AttributeValue::Int(25)));
        assert_eq!(SpanField::SpanId.read(&s), Some("b7ad6b7169203331".into()));
        assert_eq!(
            SpanField::Attribute("http.status_code".into()).read(&s),
            Some(AttributeValue::Int(200))
        );
        assert_eq!(SpanField::Attribute("missing".into()).read(&s), None);
        assert_eq!(SpanField::TraceId.property_name(), "trace-id");
        assert_eq!(SpanField::Attribute("http.status_code".into()).property_name(), "http.status_code");
    }

    #[test]
    fn test_field_json_form() {
        let field: SpanField = serde_json::from_str(r#"{"attribute": "http.status_code"}"#).unwrap();
        assert_eq!(field, SpanField::Attribute("http.status_code".into()));
        let field: SpanField = serde_json::from_str(r#""start_time""#).unwrap();
        assert_eq!(field, SpanField::StartTime);
    }

    #[test]
    fn test_trace_intervals_min_max_seconds() {
        let t1 = "0af7651916cd43dd8448eb211c80319c";
        let t2 = "ffffffffffffffffffffffffffffffff";
        let batch = SpanBatch {
            spans: vec![
                span(t1, "0000000000000001", 1_200_000_000_000, 1_201_000_000_000),
                span(t1, "0000000000000002", 1_100_500_000_000, 1_150_000_000_001),
                span(t2, "0000000000000003", 5_000_000_000_000, 5_001_000_000_000),
            ],
        };
        let wanted = BTreeSet::from([t1.to_string(), "absent".to_string()]);
        let intervals = batch.trace_intervals(&wanted);
        assert_eq!(intervals.get(t1), Some(&(1100, 1201)));
        assert_eq!(intervals.len(), 1);
    }

    #[test]
    fn test_span_table_lookup() {
        let t = "0af7651916cd43dd8448eb211c80319c";
        let table = SpanTable::from(SpanBatch {
            spans: vec![span(t, "00000000000000aa", 1, 2), span(t, "00000000000000aa", 3, 4)],
        });
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("00000000000000aa").unwrap().start_time_unix_nano, 1);
        assert!(table.get("00000000000000bb").is_none());
    }
}
