//! Flattening of metric families into a single field set.
//!
//! Every sample becomes one field. The field key is the sample's series name
//! followed by one `_name:value` suffix per label, in declaration order:
//!
//! ```text
//! foo{a="1"} 5            -> foo_a:1 = 5
//! foo{a="1",b="x"} 7      -> foo_a:1_b:x = 7
//! req_seconds_bucket{le="0.1"} 3 -> req_seconds_bucket_le:0.1 = 3
//! up 1                    -> up = 1
//! ```
//!
//! Characters that would make two series share a key are backslash-escaped:
//! `:` in series names, `_` in label names, and `\`, `_` and `:` in label
//! values. Distinct series therefore always get distinct keys.
//!
//! ```text
//! foo_a:1 3               -> foo_a\:1 = 3
//! foo{a_b="1"} 4          -> foo_a\_b:1 = 4
//! x{a="1_b:2"} 1          -> x_a:1\_b\:2 = 1
//! ```

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

use promflux_common::FieldValue;

use crate::parser::{MetricFamilies, MetricFamily, MetricType, Sample};

/// Separator between the series name and each label suffix.
pub const KEY_SEPARATOR: char = '_';

/// Flattened fields of one scrape, keyed by field key.
pub type FlatSampleSet = BTreeMap<String, FieldValue>;

/// A sample that could not be turned into a field.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlattenError {
    #[error("field '{key}' has non-numeric value {value}")]
    NonFinite { key: String, value: f64 },

    /// The exposition listed the same series twice.
    #[error("field '{key}' already set by another sample")]
    DuplicateKey { key: String },
}

/// Separator between a label name and its value.
pub const LABEL_SEPARATOR: char = ':';

/// Build the field key for a series name and its ordered labels.
///
/// Injective over (name, labels): see the module docs for the escaping.
pub fn field_key(name: &str, labels: &[(String, String)]) -> String {
    let extra: usize = labels.iter().map(|(k, v)| k.len() + v.len() + 2).sum();
    let mut key = String::with_capacity(name.len() + extra);
    push_escaped(&mut key, name, &[LABEL_SEPARATOR]);
    for (label, value) in labels {
        key.push(KEY_SEPARATOR);
        push_escaped(&mut key, label, &[KEY_SEPARATOR]);
        key.push(LABEL_SEPARATOR);
        push_escaped(&mut key, value, &['\\', KEY_SEPARATOR, LABEL_SEPARATOR]);
    }
    key
}

fn push_escaped(key: &mut String, text: &str, special: &[char]) {
    for c in text.chars() {
        if special.contains(&c) {
            key.push('\\');
        }
        key.push(c);
    }
}

/// Flatten all families into one field set.
///
/// Samples that cannot be represented are logged, skipped, and returned
/// alongside the set; they never fail the whole scrape.
pub fn flatten(families: &MetricFamilies) -> (FlatSampleSet, Vec<FlattenError>) {
    let mut fields = FlatSampleSet::new();
    let mut skipped = Vec::new();

    for family in families.values() {
        for sample in &family.samples {
            if let Err(e) = insert_sample(&mut fields, family, sample) {
                warn!(family = %family.name, error = %e, "Skipping sample");
                skipped.push(e);
            }
        }
    }

    (fields, skipped)
}

fn insert_sample(
    fields: &mut FlatSampleSet,
    family: &MetricFamily,
    sample: &Sample,
) -> Result<(), FlattenError> {
    let key = field_key(&sample.name, &sample.labels);

    if !sample.value.is_finite() {
        return Err(FlattenError::NonFinite {
            key,
            value: sample.value,
        });
    }

    if fields.contains_key(&key) {
        return Err(FlattenError::DuplicateKey { key });
    }

    fields.insert(key, field_value(family, sample));
    Ok(())
}

/// Tag a sample value by what it counts.
fn field_value(family: &MetricFamily, sample: &Sample) -> FieldValue {
    let is_counter = match family.metric_type {
        MetricType::Counter => true,
        MetricType::Histogram | MetricType::Summary => {
            sample.name.ends_with("_count") || sample.name.ends_with("_bucket")
        }
        MetricType::Gauge | MetricType::Untyped => false,
    };

    if is_counter {
        FieldValue::Counter(sample.value)
    } else {
        FieldValue::Gauge(sample.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_text;

    fn flatten_text(text: &str) -> (FlatSampleSet, Vec<FlattenError>) {
        flatten(&parse_text(text).unwrap())
    }

    #[test]
    fn test_label_disambiguation() {
        let (fields, skipped) = flatten_text("foo{a=\"1\"} 5\nfoo{a=\"2\"} 7\n");

        assert!(skipped.is_empty());
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["foo_a:1"], FieldValue::Gauge(5.0));
        assert_eq!(fields["foo_a:2"], FieldValue::Gauge(7.0));
    }

    #[test]
    fn test_field_key_is_deterministic() {
        let labels = vec![
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ];
        assert_eq!(field_key("foo", &labels), "foo_b:2_a:1");
        assert_eq!(field_key("foo", &labels), field_key("foo", &labels.clone()));
        assert_eq!(field_key("foo", &[]), "foo");
    }

    #[test]
    fn test_distinct_label_values_give_distinct_keys() {
        let text: String = (0..50)
            .map(|i| format!("temp{{sensor=\"s{}\",unit=\"c\"}} {}\n", i, i))
            .collect();
        let (fields, skipped) = flatten_text(&text);

        assert!(skipped.is_empty());
        assert_eq!(fields.len(), 50);
        assert_eq!(fields["temp_sensor:s17_unit:c"].as_f64(), 17.0);
    }

    #[test]
    fn test_all_families_flattened() {
        let text = "\
# TYPE node_boot_time_seconds gauge
node_boot_time_seconds 1.7e9
# TYPE node_forks_total counter
node_forks_total 1234
up 1
";
        let (fields, _) = flatten_text(text);

        assert_eq!(fields.len(), 3);
        assert_eq!(fields["node_boot_time_seconds"], FieldValue::Gauge(1.7e9));
        assert_eq!(fields["node_forks_total"], FieldValue::Counter(1234.0));
        assert_eq!(fields["up"], FieldValue::Gauge(1.0));
    }

    #[test]
    fn test_histogram_components() {
        let text = "\
# TYPE req histogram
req_bucket{le=\"0.5\"} 2
req_bucket{le=\"+Inf\"} 4
req_sum 1.5
req_count 4
";
        let (fields, skipped) = flatten_text(text);

        assert!(skipped.is_empty());
        assert_eq!(fields["req_bucket_le:0.5"], FieldValue::Counter(2.0));
        assert_eq!(fields["req_bucket_le:+Inf"], FieldValue::Counter(4.0));
        assert_eq!(fields["req_sum"], FieldValue::Gauge(1.5));
        assert_eq!(fields["req_count"], FieldValue::Counter(4.0));
    }

    #[test]
    fn test_non_finite_sample_skipped() {
        let (fields, skipped) = flatten_text("a NaN\nb +Inf\nc 3\n");

        assert_eq!(fields.len(), 1);
        assert_eq!(fields["c"], FieldValue::Gauge(3.0));
        assert_eq!(skipped.len(), 2);
        assert!(matches!(skipped[0], FlattenError::NonFinite { ref key, .. } if key == "a"));
    }

    #[test]
    fn test_separator_in_names_and_values_keeps_series_apart() {
        let text = "\
foo_a:1 3
foo{a=\"1\"} 5
foo_a{b=\"1\"} 6
foo{a_b=\"1\"} 7
x{a=\"1_b:2\"} 1
x{a=\"1\",b=\"2\"} 2
y{p=\"c:\\\\d\"} 8
";
        let (fields, skipped) = flatten_text(text);

        assert!(skipped.is_empty(), "skipped: {:?}", skipped);
        assert_eq!(fields.len(), 7);
        assert_eq!(fields["foo_a\\:1"], FieldValue::Gauge(3.0));
        assert_eq!(fields["foo_a:1"], FieldValue::Gauge(5.0));
        assert_eq!(fields["foo_a_b:1"], FieldValue::Gauge(6.0));
        assert_eq!(fields["foo_a\\_b:1"], FieldValue::Gauge(7.0));
        assert_eq!(fields["x_a:1\\_b\\:2"], FieldValue::Gauge(1.0));
        assert_eq!(fields["x_a:1_b:2"], FieldValue::Gauge(2.0));
        assert_eq!(fields["y_p:c\\:\\\\d"], FieldValue::Gauge(8.0));
    }

    #[test]
    fn test_repeated_series_skipped() {
        let (fields, skipped) = flatten_text("x{a=\"1\"} 1\nx{a=\"1\"} 2\n");

        assert_eq!(fields.len(), 1);
        assert_eq!(fields["x_a:1"], FieldValue::Gauge(1.0));
        assert_eq!(
            skipped,
            vec![FlattenError::DuplicateKey {
                key: "x_a:1".to_string()
            }]
        );
    }
}
