use std::fmt;
use std::iter::FusedIterator;

use serde::{Deserialize, Serialize};

/// Sanitizes a raw metric name into a key accepted by the trapper.
///
/// Slashes become dashes and spaces become underscores. Every remaining character outside of
/// `[A-Za-z0-9_.-]` is removed. The result may be empty.
///
/// # Example
///
/// ```
/// assert_eq!(zbx_metrics::normalize_key("api/v1 requests!"), "api-v1_requests");
/// ```
pub fn normalize_key(raw: &str) -> String {
    raw.chars()
        .filter_map(|c| match c {
            '/' => Some('-'),
            ' ' => Some('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') => Some(c),
            _ => None,
        })
        .collect()
}

/// Identity of a counter or timer.
///
/// Two samples with the same host and normalized name aggregate together.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Deserialize, Serialize)]
pub struct MetricKey {
    /// The host the metric is reported for, as sent by the client.
    pub host: String,
    /// The normalized metric name.
    pub name: String,
}

impl MetricKey {
    /// Creates a key from a host and an already normalized name.
    pub fn new(host: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.name)
    }
}

/// The typed value of a [`Sample`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SampleValue {
    /// A counter delta, already scaled by the inverse of the sample rate.
    Counter(f64),
    /// A single timing in milliseconds.
    Timer(i64),
}

impl SampleValue {
    /// Returns a short name of the value's kind, used for tagging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Counter(_) => "counter",
            Self::Timer(_) => "timer",
        }
    }
}

/// The reason a line was rejected by [`Sample::parse`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseSampleErrorKind {
    /// The line is not valid UTF-8.
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
    /// The line does not consist of exactly three colon-separated fields.
    #[error("expected exactly three colon-separated fields")]
    FieldCount,
    /// The value is not followed by a `|kind` component.
    #[error("missing metric kind")]
    MissingKind,
    /// The value is not an integer.
    #[error("value is not an integer")]
    InvalidValue,
    /// The third component is not `@` followed by a positive number with a finite inverse.
    #[error("invalid sample rate")]
    InvalidSampleRate,
    /// More than three pipe-separated components.
    #[error("too many pipe-separated components")]
    TooManyComponents,
}

impl ParseSampleErrorKind {
    /// Returns a stable identifier of this kind, used for tagging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidUtf8 => "invalid_utf8",
            Self::FieldCount => "field_count",
            Self::MissingKind => "missing_kind",
            Self::InvalidValue => "invalid_value",
            Self::InvalidSampleRate => "invalid_sample_rate",
            Self::TooManyComponents => "too_many_components",
        }
    }
}

/// An error returned by [`Sample::parse`] and [`Sample::parse_all`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("invalid datagram: {kind}")]
pub struct ParseSampleError {
    kind: ParseSampleErrorKind,
}

impl ParseSampleError {
    /// Returns the reason for rejecting the line.
    pub fn kind(&self) -> ParseSampleErrorKind {
        self.kind
    }
}

impl From<ParseSampleErrorKind> for ParseSampleError {
    fn from(kind: ParseSampleErrorKind) -> Self {
        Self { kind }
    }
}

fn parse_integer(value: &str, default: i64) -> Result<i64, ParseSampleErrorKind> {
    if value.is_empty() {
        return Ok(default);
    }

    value.parse().map_err(|_| ParseSampleErrorKind::InvalidValue)
}

fn parse_sample_rate(component: &str) -> Result<f64, ParseSampleErrorKind> {
    let rate: f64 = component
        .strip_prefix('@')
        .and_then(|rate| rate.parse().ok())
        .ok_or(ParseSampleErrorKind::InvalidSampleRate)?;

    // The inverse scales counter deltas and must be finite as well.
    if rate.is_finite() && rate > 0.0 && rate.recip().is_finite() {
        Ok(rate)
    } else {
        Err(ParseSampleErrorKind::InvalidSampleRate)
    }
}

/// A single decoded measurement from the statsd line protocol.
///
/// The line protocol has the shape:
///
/// ```text
/// <host>:<name>:<value>|<kind>[|@<sample_rate>]
/// ```
///
/// - `host`: The host in the monitoring backend that receives the item. Taken verbatim.
/// - `name`: The metric name, which is passed through [`normalize_key`].
/// - `value`: An integer. Defaults to `0` for timers and `1` for counters if empty.
/// - `kind`: `ms` for timers. Every other kind is treated as a counter, `c` being the canonical
///   one.
/// - `sample_rate`: An optional positive number prefixed with `@`. Counter deltas are multiplied
///   by its inverse. Timers validate but ignore it.
///
/// # Example
///
/// ```
/// use zbx_metrics::{Sample, SampleValue};
///
/// let sample = Sample::parse(b"web1:app.hits:5|c|@0.5").unwrap();
/// assert_eq!(sample.key.name, "app.hits");
/// assert_eq!(sample.value, SampleValue::Counter(10.0));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// The identity this sample aggregates into.
    pub key: MetricKey,
    /// The typed value of this sample.
    pub value: SampleValue,
    /// The client-side sample rate, if declared.
    pub sample_rate: Option<f64>,
}

impl Sample {
    fn parse_str(line: &str) -> Result<Self, ParseSampleErrorKind> {
        let mut fields = line.split(':');
        let (Some(host), Some(name), Some(rest), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(ParseSampleErrorKind::FieldCount);
        };

        let mut components = rest.split('|');
        let raw_value = components.next().unwrap_or_default();
        let kind = components.next().ok_or(ParseSampleErrorKind::MissingKind)?;
        let sample_rate = components.next().map(parse_sample_rate).transpose()?;

        if components.next().is_some() {
            return Err(ParseSampleErrorKind::TooManyComponents);
        }

        let value = match kind {
            "ms" => SampleValue::Timer(parse_integer(raw_value, 0)?),
            _ => {
                let delta = parse_integer(raw_value, 1)? as f64;
                SampleValue::Counter(delta * (1.0 / sample_rate.unwrap_or(1.0)))
            }
        };

        Ok(Self {
            key: MetricKey::new(host, normalize_key(name)),
            value,
            sample_rate,
        })
    }

    /// Parses a single sample from one line of the raw protocol.
    ///
    /// See the [`Sample`] for more information on the protocol.
    pub fn parse(slice: &[u8]) -> Result<Self, ParseSampleError> {
        let line = std::str::from_utf8(slice).or(Err(ParseSampleErrorKind::InvalidUtf8))?;
        Ok(Self::parse_str(line)?)
    }

    /// Parses all samples contained in one datagram.
    ///
    /// Returns a result for each line in `slice`, ignoring empty lines. Both UNIX newlines (`\n`)
    /// and Windows newlines (`\r\n`) are supported. A datagram without newlines yields exactly one
    /// result.
    ///
    /// It is possible to continue consuming the iterator after `Err` is yielded.
    ///
    /// # Example
    ///
    /// ```
    /// use zbx_metrics::Sample;
    ///
    /// let data = b"web1:app.hits:1|c\nweb1:app.latency:120|ms\n";
    /// let samples = Sample::parse_all(data).collect::<Result<Vec<_>, _>>().unwrap();
    /// assert_eq!(samples.len(), 2);
    /// ```
    pub fn parse_all(slice: &[u8]) -> ParseSamples<'_> {
        ParseSamples { slice }
    }
}

/// Iterator over parsed samples returned from [`Sample::parse_all`].
#[derive(Clone, Debug, Default)]
pub struct ParseSamples<'a> {
    slice: &'a [u8],
}

impl Iterator for ParseSamples<'_> {
    type Item = Result<Sample, ParseSampleError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.slice.is_empty() {
                return None;
            }

            let mut split = self.slice.splitn(2, |&b| b == b'\n');
            let current = split.next()?;
            self.slice = split.next().unwrap_or_default();

            let line = current.strip_suffix(b"\r").unwrap_or(current);
            if !line.is_empty() {
                return Some(Sample::parse(line));
            }
        }
    }
}

impl FusedIterator for ParseSamples<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_err(s: &str) -> ParseSampleErrorKind {
        Sample::parse(s.as_bytes()).unwrap_err().kind()
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("app.hits"), "app.hits");
        assert_eq!(normalize_key("api/v1/users"), "api-v1-users");
        assert_eq!(normalize_key("page views"), "page_views");
        assert_eq!(normalize_key("a$b%c(d)"), "abcd");
        assert_eq!(normalize_key("cpu_load-1.avg"), "cpu_load-1.avg");
        assert_eq!(normalize_key("ünïcödé"), "ncd");
        assert_eq!(normalize_key("!!!"), "");
    }

    #[test]
    fn test_parse_counter() {
        let sample = Sample::parse(b"web1:app.hits:4|c").unwrap();
        insta::assert_debug_snapshot!(sample, @r###"
        Sample {
            key: MetricKey {
                host: "web1",
                name: "app.hits",
            },
            value: Counter(
                4.0,
            ),
            sample_rate: None,
        }
        "###);
    }

    #[test]
    fn test_parse_timer() {
        let sample = Sample::parse(b"web1:app.latency:120|ms").unwrap();
        insta::assert_debug_snapshot!(sample, @r###"
        Sample {
            key: MetricKey {
                host: "web1",
                name: "app.latency",
            },
            value: Timer(
                120,
            ),
            sample_rate: None,
        }
        "###);
    }

    #[test]
    fn test_parse_sample_rate_scales_counter() {
        let sample = Sample::parse(b"web1:app.hits:5|c|@0.5").unwrap();
        assert_eq!(sample.value, SampleValue::Counter(10.0));
        assert_eq!(sample.sample_rate, Some(0.5));
    }

    #[test]
    fn test_parse_sample_rate_ignored_for_timer() {
        let sample = Sample::parse(b"web1:app.latency:100|ms|@0.1").unwrap();
        assert_eq!(sample.value, SampleValue::Timer(100));
    }

    #[test]
    fn test_parse_empty_value_defaults() {
        let counter = Sample::parse(b"web1:app.hits:|c").unwrap();
        assert_eq!(counter.value, SampleValue::Counter(1.0));

        let timer = Sample::parse(b"web1:app.latency:|ms").unwrap();
        assert_eq!(timer.value, SampleValue::Timer(0));
    }

    #[test]
    fn test_parse_unknown_kind_is_counter() {
        let sample = Sample::parse(b"web1:app.mem:7|g").unwrap();
        assert_eq!(sample.value, SampleValue::Counter(7.0));
    }

    #[test]
    fn test_parse_negative_counter() {
        let sample = Sample::parse(b"web1:app.queue:-3|c").unwrap();
        assert_eq!(sample.value, SampleValue::Counter(-3.0));
    }

    #[test]
    fn test_parse_normalizes_name_only() {
        let sample = Sample::parse(b"web 1:api/v1 hits:1|c").unwrap();
        assert_eq!(sample.key, MetricKey::new("web 1", "api-v1_hits"));
    }

    #[test]
    fn test_parse_field_count() {
        assert_eq!(parse_err("app.hits:1|c"), ParseSampleErrorKind::FieldCount);
        assert_eq!(
            parse_err("web1:app:hits:1|c"),
            ParseSampleErrorKind::FieldCount
        );
        assert_eq!(parse_err(""), ParseSampleErrorKind::FieldCount);
    }

    #[test]
    fn test_parse_missing_kind() {
        assert_eq!(parse_err("web1:app.hits:1"), ParseSampleErrorKind::MissingKind);
    }

    #[test]
    fn test_parse_invalid_value() {
        assert_eq!(
            parse_err("web1:app.hits:abc|c"),
            ParseSampleErrorKind::InvalidValue
        );
        assert_eq!(
            parse_err("web1:app.latency:1.5|ms"),
            ParseSampleErrorKind::InvalidValue
        );
    }

    #[test]
    fn test_parse_invalid_sample_rate() {
        for line in [
            "web1:app.hits:1|c|0.5",
            "web1:app.hits:1|c|@",
            "web1:app.hits:1|c|@abc",
            "web1:app.hits:1|c|@0",
            "web1:app.hits:1|c|@-0.5",
            "web1:app.hits:1|c|@inf",
            "web1:app.latency:1|ms|@NaN",
            "web1:app.hits:1|c|@1e-320",
        ] {
            assert_eq!(
                parse_err(line),
                ParseSampleErrorKind::InvalidSampleRate,
                "{line}"
            );
        }
    }

    #[test]
    fn test_parse_too_many_components() {
        assert_eq!(
            parse_err("web1:app.hits:1|c|@0.5|x"),
            ParseSampleErrorKind::TooManyComponents
        );
    }

    #[test]
    fn test_parse_garbage() {
        let result = Sample::parse(&[0xff, 0xfe, b':', b'a']);
        assert_eq!(
            result.unwrap_err().kind(),
            ParseSampleErrorKind::InvalidUtf8
        );
    }

    #[test]
    fn test_error_display() {
        let error = Sample::parse(b"web1:app.hits:1").unwrap_err();
        assert_eq!(error.to_string(), "invalid datagram: missing metric kind");
    }

    #[test]
    fn test_parse_all() {
        let s = "web1:app.hits:1|c\nweb1:app.latency:20|ms";
        let samples: Vec<Sample> = Sample::parse_all(s.as_bytes())
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(samples.len(), 2);
    }

    #[test]
    fn test_parse_all_crlf() {
        let s = "web1:app.hits:1|c\r\nweb1:app.hits:2|c\r\n";
        let samples: Vec<Sample> = Sample::parse_all(s.as_bytes())
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(samples[0].value, SampleValue::Counter(1.0));
        assert_eq!(samples[1].value, SampleValue::Counter(2.0));
    }

    #[test]
    fn test_parse_all_empty_lines() {
        let s = "web1:app.hits:1|c\n\n\nweb1:app.hits:2|c";
        assert_eq!(Sample::parse_all(s.as_bytes()).count(), 2);
    }

    #[test]
    fn test_parse_all_continues_after_error() {
        let s = "web1:app.hits:1|c\ngarbage\nweb1:app.hits:2|c";
        let results: Vec<_> = Sample::parse_all(s.as_bytes()).collect();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }
}
