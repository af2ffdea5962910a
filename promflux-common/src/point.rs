use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Write;

/// A single write unit for a time-series sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Measurement name (e.g., "node", "exporter").
    pub measurement: String,

    /// Tag set, attached verbatim.
    pub tags: BTreeMap<String, String>,

    /// Field set.
    pub fields: BTreeMap<String, FieldValue>,

    /// Point timestamp.
    pub timestamp: DateTime<Utc>,
}

impl Point {
    /// Create a new point with no tags or fields.
    pub fn new(measurement: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    /// Add a tag to this point.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add multiple tags to this point.
    pub fn with_tags<I, K, V>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.tags
            .extend(tags.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Add a field to this point.
    pub fn with_field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Replace the field set of this point.
    pub fn with_fields(mut self, fields: BTreeMap<String, FieldValue>) -> Self {
        self.fields = fields;
        self
    }

    /// Render the point as one line of InfluxDB line protocol.
    ///
    /// The timestamp is written in nanoseconds. Returns `None` when the point
    /// has no fields or its timestamp does not fit in `i64` nanoseconds
    /// (before 1677 or after 2262), neither of which line protocol can express.
    pub fn to_line_protocol(&self) -> Option<String> {
        if self.fields.is_empty() {
            return None;
        }
        let nanos = self.timestamp.timestamp_nanos_opt()?;

        let mut line = String::with_capacity(64 + self.fields.len() * 24);
        escape_into(&mut line, &self.measurement, &[',', ' ']);

        for (key, value) in &self.tags {
            line.push(',');
            escape_into(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            escape_into(&mut line, value, &[',', '=', ' ']);
        }

        line.push(' ');
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            escape_into(&mut line, key, &[',', '=', ' ']);
            let _ = write!(line, "={}", value.as_f64());
        }

        let _ = write!(line, " {}", nanos);

        Some(line)
    }
}

fn escape_into(out: &mut String, text: &str, special: &[char]) {
    for c in text.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Typed field value.
///
/// Every variant carries a float payload and is written as an InfluxDB float
/// field; the tag records where the sample came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    /// Counter (monotonically increasing).
    Counter(f64),

    /// Gauge (can go up or down).
    Gauge(f64),
}

impl FieldValue {
    /// Numeric payload.
    pub fn as_f64(&self) -> f64 {
        match *self {
            FieldValue::Counter(v) | FieldValue::Gauge(v) => v,
        }
    }

    /// Interpret the payload as Unix epoch seconds, truncated toward zero.
    ///
    /// Returns `None` for non-finite values and for times that cannot be
    /// written with nanosecond precision (e.g. a milliseconds value).
    pub fn as_epoch_seconds(&self) -> Option<DateTime<Utc>> {
        let v = self.as_f64();
        if !v.is_finite() || v < i64::MIN as f64 || v > i64::MAX as f64 {
            return None;
        }
        DateTime::from_timestamp(v.trunc() as i64, 0)
            .filter(|timestamp| timestamp.timestamp_nanos_opt().is_some())
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Gauge(v)
    }
}
