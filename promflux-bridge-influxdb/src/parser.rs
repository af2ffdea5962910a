//! Parser for the Prometheus text exposition format (version 0.0.4).

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::iter::Peekable;
use std::str::CharIndices;
use thiserror::Error;

/// Metric type declared by a `# TYPE` line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
    #[default]
    Untyped,
}

impl MetricType {
    /// Parse the type keyword used in `# TYPE` lines.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "counter" => Some(Self::Counter),
            "gauge" => Some(Self::Gauge),
            "histogram" => Some(Self::Histogram),
            "summary" => Some(Self::Summary),
            "untyped" => Some(Self::Untyped),
            _ => None,
        }
    }

    /// Get the keyword used in `# TYPE` lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::Summary => "summary",
            Self::Untyped => "untyped",
        }
    }
}

/// One exposed sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Series name as written in the exposition (e.g. `http_duration_seconds_bucket`).
    pub name: String,
    /// Labels in declaration order.
    pub labels: Vec<(String, String)>,
    /// Sample value.
    pub value: f64,
    /// Optional exposition timestamp in milliseconds.
    pub timestamp_ms: Option<i64>,
}

impl Sample {
    /// Look up a label value by name.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A named group of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub metric_type: MetricType,
    pub help: Option<String>,
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            metric_type: MetricType::Untyped,
            help: None,
            samples: Vec::new(),
        }
    }
}

/// Metric families keyed by family name.
pub type MetricFamilies = BTreeMap<String, MetricFamily>;

/// Exposition parse failure.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    /// 1-based line number.
    pub line: usize,
    pub kind: ParseErrorKind,
}

/// What went wrong on a line.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseErrorKind {
    #[error("invalid metric name '{0}'")]
    InvalidMetricName(String),

    #[error("invalid label name '{0}'")]
    InvalidLabelName(String),

    #[error("duplicate label '{0}'")]
    DuplicateLabel(String),

    #[error("expected {expected}, found '{found}'")]
    UnexpectedChar { expected: &'static str, found: char },

    #[error("unterminated label set")]
    UnterminatedLabelSet,

    #[error("unterminated label value")]
    UnterminatedLabelValue,

    #[error("invalid escape sequence '\\{0}'")]
    InvalidEscape(char),

    #[error("missing sample value")]
    MissingValue,

    #[error("invalid sample value '{0}'")]
    InvalidValue(String),

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("unexpected text after sample: '{0}'")]
    TrailingText(String),

    #[error("unknown metric type '{0}'")]
    UnknownType(String),

    #[error("missing metric name in {0} line")]
    MissingName(&'static str),

    #[error("second TYPE line for metric '{0}'")]
    DuplicateType(String),

    #[error("second HELP line for metric '{0}'")]
    DuplicateHelp(String),

    #[error("TYPE line for metric '{0}' after its samples")]
    TypeAfterSamples(String),

    #[error("sample '{sample}' does not fit {metric_type} family '{family}'")]
    TypeMismatch {
        sample: String,
        family: String,
        metric_type: &'static str,
    },

    #[error("sample '{sample}' is missing the '{label}' label")]
    MissingLabel { sample: String, label: &'static str },
}

static METRIC_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").unwrap());

static LABEL_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap());

/// Newest exposition timestamp (milliseconds) over all samples, if any
/// sample carries one.
pub fn latest_timestamp_ms(families: &MetricFamilies) -> Option<i64> {
    families
        .values()
        .flat_map(|family| family.samples.iter())
        .filter_map(|sample| sample.timestamp_ms)
        .max()
}

/// Parse exposition text into metric families.
///
/// Families that end up with no samples (only HELP/TYPE lines) are dropped.
pub fn parse_text(text: &str) -> Result<MetricFamilies, ParseError> {
    let mut parser = TextParser::default();

    for (index, raw) in text.lines().enumerate() {
        parser
            .parse_line(raw)
            .map_err(|kind| ParseError { line: index + 1, kind })?;
    }

    let mut families = parser.families;
    families.retain(|_, family| !family.samples.is_empty());
    Ok(families)
}

#[derive(Default)]
struct TextParser {
    families: MetricFamilies,
    /// Families that already saw a TYPE line.
    typed: HashSet<String>,
}

impl TextParser {
    fn parse_line(&mut self, raw: &str) -> Result<(), ParseErrorKind> {
        let line = raw.trim();
        if line.is_empty() {
            return Ok(());
        }

        if let Some(comment) = line.strip_prefix('#') {
            let (keyword, rest) = split_token(comment);
            return match keyword {
                "HELP" => self.parse_help(rest),
                "TYPE" => self.parse_type(rest),
                _ => Ok(()),
            };
        }

        let sample = parse_sample(line)?;
        let family = self.family_for(&sample)?;
        self.families
            .entry(family.clone())
            .or_insert_with(|| MetricFamily::new(&family))
            .samples
            .push(sample);
        Ok(())
    }

    fn parse_help(&mut self, rest: &str) -> Result<(), ParseErrorKind> {
        let (name, text) = split_token(rest);
        validate_metric_name(name, "HELP")?;

        let family = self
            .families
            .entry(name.to_string())
            .or_insert_with(|| MetricFamily::new(name));
        if family.help.is_some() {
            return Err(ParseErrorKind::DuplicateHelp(name.to_string()));
        }
        family.help = Some(unescape_help(text));
        Ok(())
    }

    fn parse_type(&mut self, rest: &str) -> Result<(), ParseErrorKind> {
        let (name, rest) = split_token(rest);
        validate_metric_name(name, "TYPE")?;

        let (keyword, trailing) = split_token(rest);
        if !trailing.is_empty() {
            return Err(ParseErrorKind::TrailingText(trailing.to_string()));
        }
        let metric_type = MetricType::from_keyword(keyword)
            .ok_or_else(|| ParseErrorKind::UnknownType(keyword.to_string()))?;

        if !self.typed.insert(name.to_string()) {
            return Err(ParseErrorKind::DuplicateType(name.to_string()));
        }

        let family = self
            .families
            .entry(name.to_string())
            .or_insert_with(|| MetricFamily::new(name));
        if !family.samples.is_empty() {
            return Err(ParseErrorKind::TypeAfterSamples(name.to_string()));
        }
        family.metric_type = metric_type;
        Ok(())
    }

    /// Resolve the family a sample belongs to, checking histogram and summary shape.
    fn family_for(&self, sample: &Sample) -> Result<String, ParseErrorKind> {
        let declared = |name: &str| self.families.get(name).map(|f| f.metric_type);

        for suffix in ["_bucket", "_sum", "_count"] {
            let Some(base) = sample.name.strip_suffix(suffix) else {
                continue;
            };
            match declared(base) {
                Some(MetricType::Histogram) => {
                    if suffix == "_bucket" && sample.label("le").is_none() {
                        return Err(ParseErrorKind::MissingLabel {
                            sample: sample.name.clone(),
                            label: "le",
                        });
                    }
                    return Ok(base.to_string());
                }
                Some(MetricType::Summary) if suffix != "_bucket" => {
                    return Ok(base.to_string());
                }
                _ => {}
            }
        }

        match declared(&sample.name) {
            Some(MetricType::Summary) if sample.label("quantile").is_none() => {
                Err(ParseErrorKind::MissingLabel {
                    sample: sample.name.clone(),
                    label: "quantile",
                })
            }
            Some(MetricType::Histogram) => Err(ParseErrorKind::TypeMismatch {
                sample: sample.name.clone(),
                family: sample.name.clone(),
                metric_type: MetricType::Histogram.as_str(),
            }),
            _ => Ok(sample.name.clone()),
        }
    }
}

/// Split off the first whitespace-delimited token, returning it and the trimmed rest.
fn split_token(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(end) => (&text[..end], text[end..].trim_start()),
        None => (text, ""),
    }
}

fn validate_metric_name(name: &str, line_kind: &'static str) -> Result<(), ParseErrorKind> {
    if name.is_empty() {
        return Err(ParseErrorKind::MissingName(line_kind));
    }
    if !METRIC_NAME_REGEX.is_match(name) {
        return Err(ParseErrorKind::InvalidMetricName(name.to_string()));
    }
    Ok(())
}

fn unescape_help(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn parse_sample(line: &str) -> Result<Sample, ParseErrorKind> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if !METRIC_NAME_REGEX.is_match(name) {
        return Err(ParseErrorKind::InvalidMetricName(name.to_string()));
    }

    let mut rest = &line[name_end..];
    let mut labels = Vec::new();
    if let Some(label_text) = rest.strip_prefix('{') {
        let (parsed, consumed) = parse_labels(label_text)?;
        labels = parsed;
        rest = &label_text[consumed..];
    }

    let mut tokens = rest.split_whitespace();
    let value_text = tokens.next().ok_or(ParseErrorKind::MissingValue)?;
    let value = parse_value(value_text)?;

    let timestamp_ms = match tokens.next() {
        Some(ts) => Some(
            ts.parse::<i64>()
                .map_err(|_| ParseErrorKind::InvalidTimestamp(ts.to_string()))?,
        ),
        None => None,
    };

    if let Some(extra) = tokens.next() {
        return Err(ParseErrorKind::TrailingText(extra.to_string()));
    }

    Ok(Sample {
        name: name.to_string(),
        labels,
        value,
        timestamp_ms,
    })
}

fn parse_value(text: &str) -> Result<f64, ParseErrorKind> {
    match text {
        "NaN" => Ok(f64::NAN),
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        _ => {
            let value: f64 = text
                .parse()
                .map_err(|_| ParseErrorKind::InvalidValue(text.to_string()))?;
            // Rust also accepts spellings like "infinity"; the format does not.
            if value.is_finite() {
                Ok(value)
            } else {
                Err(ParseErrorKind::InvalidValue(text.to_string()))
            }
        }
    }
}

/// Parse a label set starting right after `{`.
///
/// Returns the labels and the number of bytes consumed, including the closing `}`.
fn parse_labels(text: &str) -> Result<(Vec<(String, String)>, usize), ParseErrorKind> {
    let mut labels: Vec<(String, String)> = Vec::new();
    let mut chars = text.char_indices().peekable();

    loop {
        skip_whitespace(&mut chars);
        let Some(&(start, c)) = chars.peek() else {
            return Err(ParseErrorKind::UnterminatedLabelSet);
        };
        if c == '}' {
            return Ok((labels, start + 1));
        }

        let mut end = start;
        while let Some(&(i, c)) = chars.peek() {
            if c == '=' || c.is_whitespace() || c == '}' || c == ',' || c == '"' {
                break;
            }
            end = i + c.len_utf8();
            chars.next();
        }
        let name = &text[start..end];
        if !LABEL_NAME_REGEX.is_match(name) {
            return Err(ParseErrorKind::InvalidLabelName(name.to_string()));
        }

        skip_whitespace(&mut chars);
        expect_char(&mut chars, '=', "'='")?;
        skip_whitespace(&mut chars);
        expect_char(&mut chars, '"', "'\"'")?;
        let value = parse_label_value(&mut chars)?;

        if labels.iter().any(|(k, _)| k == name) {
            return Err(ParseErrorKind::DuplicateLabel(name.to_string()));
        }
        labels.push((name.to_string(), value));

        skip_whitespace(&mut chars);
        match chars.next() {
            Some((_, ',')) => continue,
            Some((i, '}')) => return Ok((labels, i + 1)),
            Some((_, found)) => {
                return Err(ParseErrorKind::UnexpectedChar {
                    expected: "',' or '}'",
                    found,
                });
            }
            None => return Err(ParseErrorKind::UnterminatedLabelSet),
        }
    }
}

fn parse_label_value(chars: &mut Peekable<CharIndices<'_>>) -> Result<String, ParseErrorKind> {
    let mut value = String::new();
    loop {
        match chars.next() {
            Some((_, '"')) => return Ok(value),
            Some((_, '\\')) => match chars.next() {
                Some((_, '\\')) => value.push('\\'),
                Some((_, '"')) => value.push('"'),
                Some((_, 'n')) => value.push('\n'),
                Some((_, other)) => return Err(ParseErrorKind::InvalidEscape(other)),
                None => return Err(ParseErrorKind::UnterminatedLabelValue),
            },
            Some((_, c)) => value.push(c),
            None => return Err(ParseErrorKind::UnterminatedLabelValue),
        }
    }
}

fn skip_whitespace(chars: &mut Peekable<CharIndices<'_>>) {
    while chars.next_if(|&(_, c)| c.is_whitespace()).is_some() {}
}

fn expect_char(
    chars: &mut Peekable<CharIndices<'_>>,
    wanted: char,
    expected: &'static str,
) -> Result<(), ParseErrorKind> {
    match chars.next() {
        Some((_, c)) if c == wanted => Ok(()),
        Some((_, found)) => Err(ParseErrorKind::UnexpectedChar { expected, found }),
        None => Err(ParseErrorKind::UnterminatedLabelSet),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_simple_gauge() {
        let text = "# HELP node_load1 1m load average.\n# TYPE node_load1 gauge\nnode_load1 0.42\n";
        let families = parse_text(text).unwrap();

        let family = &families["node_load1"];
        assert_eq!(family.metric_type, MetricType::Gauge);
        assert_eq!(family.help.as_deref(), Some("1m load average."));
        assert_eq!(family.samples.len(), 1);
        assert_eq!(family.samples[0].value, 0.42);
        assert!(family.samples[0].labels.is_empty());
    }

    #[test]
    fn test_parse_labels_in_declaration_order() {
        let families = parse_text("foo{b=\"2\",a=\"1\"} 5\nfoo{a=\"3\"} 7 1700000000000\n").unwrap();

        let family = &families["foo"];
        assert_eq!(family.metric_type, MetricType::Untyped);
        assert_eq!(family.samples.len(), 2);
        assert_eq!(family.samples[0].labels, labels(&[("b", "2"), ("a", "1")]));
        assert_eq!(family.samples[1].labels, labels(&[("a", "3")]));
        assert_eq!(family.samples[1].timestamp_ms, Some(1_700_000_000_000));
    }

    #[test]
    fn test_latest_timestamp() {
        let families =
            parse_text("a 1 1700000000000
b 2
c{x=\"y\"} 3 1700000005000
").unwrap();
        assert_eq!(latest_timestamp_ms(&families), Some(1_700_000_005_000));

        let families = parse_text("a 1
b 2
").unwrap();
        assert_eq!(latest_timestamp_ms(&families), None);
    }

    #[test]
    fn test_parse_label_escapes_and_spacing() {
        let text = r#"msg{ path = "C:\\tmp" , quote="say \"hi\"", nl="a\nb", } 1"#;
        let families = parse_text(text).unwrap();

        let sample = &families["msg"].samples[0];
        assert_eq!(sample.label("path"), Some(r"C:\tmp"));
        assert_eq!(sample.label("quote"), Some(r#"say "hi""#));
        assert_eq!(sample.label("nl"), Some("a\nb"));
    }

    #[test]
    fn test_parse_label_value_with_braces() {
        let families = parse_text("x{q=\"{} , =\"} 2\n").unwrap();
        assert_eq!(families["x"].samples[0].label("q"), Some("{} , ="));
    }

    #[test]
    fn test_parse_special_values() {
        let text = "a NaN\nb +Inf\nc -Inf\nd 1.5e3\ne -0\n";
        let families = parse_text(text).unwrap();

        assert!(families["a"].samples[0].value.is_nan());
        assert_eq!(families["b"].samples[0].value, f64::INFINITY);
        assert_eq!(families["c"].samples[0].value, f64::NEG_INFINITY);
        assert_eq!(families["d"].samples[0].value, 1500.0);
        assert_eq!(families["e"].samples[0].value, 0.0);
    }

    #[test]
    fn test_parse_histogram_groups_components() {
        let text = "\
# TYPE req_seconds histogram
req_seconds_bucket{le=\"0.1\"} 3
req_seconds_bucket{le=\"+Inf\"} 5
req_seconds_sum 1.2
req_seconds_count 5
";
        let families = parse_text(text).unwrap();
        assert_eq!(families.len(), 1);

        let family = &families["req_seconds"];
        assert_eq!(family.metric_type, MetricType::Histogram);
        let names: Vec<_> = family.samples.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "req_seconds_bucket",
                "req_seconds_bucket",
                "req_seconds_sum",
                "req_seconds_count"
            ]
        );
    }

    #[test]
    fn test_parse_summary_groups_components() {
        let text = "\
# TYPE rpc summary
rpc{quantile=\"0.5\"} 0.01
rpc_sum 10
rpc_count 100
";
        let families = parse_text(text).unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families["rpc"].samples.len(), 3);
    }

    #[test]
    fn test_suffix_without_declared_type_is_own_family() {
        let families = parse_text("jobs_count 3\n# TYPE jobs gauge\njobs 1\n").unwrap();
        assert_eq!(families.len(), 2);
        assert!(families.contains_key("jobs_count"));
        assert!(families.contains_key("jobs"));
    }

    #[test]
    fn test_comments_and_blank_lines_ignored() {
        let text = "\n# just a comment\n#\n   \nup 1\n";
        let families = parse_text(text).unwrap();
        assert_eq!(families.len(), 1);
    }

    #[test]
    fn test_families_without_samples_dropped() {
        let families = parse_text("# HELP lonely nothing here\n# TYPE lonely gauge\n").unwrap();
        assert!(families.is_empty());
    }

    #[test]
    fn test_help_unescape() {
        let families = parse_text("# HELP h line one\\nline two \\\\ done\nh 1\n").unwrap();
        assert_eq!(
            families["h"].help.as_deref(),
            Some("line one\nline two \\ done")
        );
    }

    fn parse_err(text: &str) -> ParseError {
        parse_text(text).expect_err("expected parse failure")
    }

    #[test]
    fn test_error_reports_line_number() {
        let err = parse_err("ok 1\nok2 2\nbad{ 3\n");
        assert_eq!(err.line, 3);
        assert!(err.to_string().starts_with("line 3:"));
    }

    #[test]
    fn test_error_truncated_label_set() {
        assert_eq!(
            parse_err("foo{a=\"1\"").kind,
            ParseErrorKind::UnterminatedLabelSet
        );
        assert_eq!(
            parse_err("foo{a=\"1").kind,
            ParseErrorKind::UnterminatedLabelValue
        );
    }

    #[test]
    fn test_error_bad_tokens() {
        assert!(matches!(
            parse_err("foo").kind,
            ParseErrorKind::MissingValue
        ));
        assert!(matches!(
            parse_err("foo abc").kind,
            ParseErrorKind::InvalidValue(_)
        ));
        assert!(matches!(
            parse_err("foo infinity").kind,
            ParseErrorKind::InvalidValue(_)
        ));
        assert!(matches!(
            parse_err("foo 1 2.5").kind,
            ParseErrorKind::InvalidTimestamp(_)
        ));
        assert!(matches!(
            parse_err("foo 1 2 3").kind,
            ParseErrorKind::TrailingText(_)
        ));
        assert!(matches!(
            parse_err("9foo 1").kind,
            ParseErrorKind::InvalidMetricName(_)
        ));
        assert!(matches!(
            parse_err("foo{1a=\"x\"} 1").kind,
            ParseErrorKind::InvalidLabelName(_)
        ));
        assert!(matches!(
            parse_err("foo{a=x} 1").kind,
            ParseErrorKind::UnexpectedChar { found: 'x', .. }
        ));
        assert!(matches!(
            parse_err("foo{a=\"\\t\"} 1").kind,
            ParseErrorKind::InvalidEscape('t')
        ));
        assert!(matches!(
            parse_err("foo{a=\"1\",a=\"2\"} 1").kind,
            ParseErrorKind::DuplicateLabel(_)
        ));
    }

    #[test]
    fn test_error_type_lines() {
        assert!(matches!(
            parse_err("# TYPE foo gauge\n# TYPE foo counter\n").kind,
            ParseErrorKind::DuplicateType(_)
        ));
        assert!(matches!(
            parse_err("foo 1\n# TYPE foo gauge\n").kind,
            ParseErrorKind::TypeAfterSamples(_)
        ));
        assert!(matches!(
            parse_err("# TYPE foo meter\n").kind,
            ParseErrorKind::UnknownType(_)
        ));
        assert!(matches!(
            parse_err("# TYPE\n").kind,
            ParseErrorKind::MissingName("TYPE")
        ));
        assert!(matches!(
            parse_err("# HELP foo a\n# HELP foo b\n").kind,
            ParseErrorKind::DuplicateHelp(_)
        ));
    }

    #[test]
    fn test_error_type_mismatch() {
        assert!(matches!(
            parse_err("# TYPE h histogram\nh_bucket 1\n").kind,
            ParseErrorKind::MissingLabel { label: "le", .. }
        ));
        assert!(matches!(
            parse_err("# TYPE h histogram\nh 1\n").kind,
            ParseErrorKind::TypeMismatch { .. }
        ));
        assert!(matches!(
            parse_err("# TYPE s summary\ns 1\n").kind,
            ParseErrorKind::MissingLabel {
                label: "quantile",
                ..
            }
        ));
    }
}
