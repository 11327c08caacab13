use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    #[error("Unknown metric kind: {0}")]
    UnknownKind(String),
    #[error("Metric name cannot be empty")]
    EmptyId,
    #[error("Metric {id} of kind {kind} carries no {field}")]
    MissingValue {
        id: String,
        kind: MetricKind,
        field: &'static str,
    },
    #[error("Invalid {kind} value '{raw}' for metric {id}")]
    InvalidValue {
        id: String,
        kind: MetricKind,
        raw: String,
    },
}

/// The two metric kinds understood end to end.
///
/// Gauges are last-writer-wins floats; counters are additive signed integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }

    fn value_field(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "value",
            MetricKind::Counter => "delta",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(MetricError::UnknownKind(other.to_string())),
        }
    }
}

/// A single metric sample as it travels on the wire and sits in storage.
///
/// Exactly one of `value` / `delta` is meaningful, selected by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    /// Builds a metric from the positional `/update/{kind}/{id}/{value}` form.
    pub fn parse(kind: &str, id: &str, raw: &str) -> Result<Self, MetricError> {
        let kind: MetricKind = kind.parse()?;
        if id.is_empty() {
            return Err(MetricError::EmptyId);
        }
        let invalid = || MetricError::InvalidValue {
            id: id.to_string(),
            kind,
            raw: raw.to_string(),
        };
        let metric = match kind {
            MetricKind::Gauge => Metric::gauge(id, raw.parse::<f64>().map_err(|_| invalid())?),
            MetricKind::Counter => {
                Metric::counter(id, raw.parse::<i64>().map_err(|_| invalid())?)
            }
        };
        metric.validate()?;
        Ok(metric)
    }

    /// Checks that the metric is storable: a non-empty id and a finite value in
    /// the field its kind selects.
    pub fn validate(&self) -> Result<(), MetricError> {
        if self.id.is_empty() {
            return Err(MetricError::EmptyId);
        }
        let missing = || MetricError::MissingValue {
            id: self.id.clone(),
            kind: self.kind,
            field: self.kind.value_field(),
        };
        match self.kind {
            MetricKind::Gauge => {
                let value = self.value.ok_or_else(missing)?;
                // JSON has no encoding for NaN/inf, so they could never be read back.
                if !value.is_finite() {
                    return Err(MetricError::InvalidValue {
                        id: self.id.clone(),
                        kind: self.kind,
                        raw: value.to_string(),
                    });
                }
            }
            MetricKind::Counter => {
                self.delta.ok_or_else(missing)?;
            }
        }
        Ok(())
    }

    /// Drops the field the kind does not use.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        match self.kind {
            MetricKind::Gauge => self.delta = None,
            MetricKind::Counter => self.value = None,
        }
        self
    }

    /// Plain-text rendering used by `GET /value/{kind}/{id}` and the index page.
    pub fn render_value(&self) -> String {
        match self.kind {
            MetricKind::Gauge => self.value.map(|v| v.to_string()).unwrap_or_default(),
            MetricKind::Counter => self.delta.map(|d| d.to_string()).unwrap_or_default(),
        }
    }
}

/// Lookup key accepted by `POST /value/` and `Metrics.GetMetric`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_serializes_without_delta() {
        let json = serde_json::to_value(Metric::gauge("HeapAlloc", 1.5)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "HeapAlloc", "type": "gauge", "value": 1.5})
        );
    }

    #[test]
    fn test_counter_deserializes_from_wire() {
        let metric: Metric =
            serde_json::from_str(r#"{"id":"PollCount","type":"counter","delta":5}"#).unwrap();
        assert_eq!(metric, Metric::counter("PollCount", 5));
    }

    #[test]
    fn test_unknown_kind_is_rejected_by_serde() {
        let result = serde_json::from_str::<Metric>(r#"{"id":"x","type":"histogram"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_requires_kind_field() {
        let metric = Metric {
            id: "Hits".into(),
            kind: MetricKind::Counter,
            delta: None,
            value: Some(3.0),
        };
        assert!(matches!(
            metric.validate(),
            Err(MetricError::MissingValue { field: "delta", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_id_and_non_finite() {
        assert_eq!(Metric::gauge("", 1.0).validate(), Err(MetricError::EmptyId));
        assert!(Metric::gauge("x", f64::NAN).validate().is_err());
        assert!(Metric::gauge("x", f64::INFINITY).validate().is_err());
    }

    #[test]
    fn test_parse_positional_form() {
        assert_eq!(
            Metric::parse("gauge", "HeapAlloc", "123.456").unwrap(),
            Metric::gauge("HeapAlloc", 123.456)
        );
        assert_eq!(
            Metric::parse("counter", "Hits", "3").unwrap(),
            Metric::counter("Hits", 3)
        );
        assert!(matches!(
            Metric::parse("counter", "Hits", "3.5"),
            Err(MetricError::InvalidValue { .. })
        ));
        assert!(matches!(
            Metric::parse("timer", "Hits", "3"),
            Err(MetricError::UnknownKind(_))
        ));
        assert_eq!(Metric::parse("gauge", "", "1"), Err(MetricError::EmptyId));
    }

    #[test]
    fn test_render_value_uses_shortest_representation() {
        assert_eq!(Metric::gauge("g", 123.456).render_value(), "123.456");
        assert_eq!(Metric::gauge("g", 3.0).render_value(), "3");
        assert_eq!(Metric::counter("c", -6).render_value(), "-6");
    }

    #[test]
    fn test_normalized_drops_foreign_field() {
        let metric = Metric {
            id: "g".into(),
            kind: MetricKind::Gauge,
            delta: Some(1),
            value: Some(2.0),
        };
        assert_eq!(metric.normalized(), Metric::gauge("g", 2.0));
    }
}
