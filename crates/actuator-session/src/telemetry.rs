//! Session metric definitions.
//!
//! Metrics go through the `metrics` facade, so they cost nothing until the
//! application installs a recorder. Call [`describe_metrics`] once after
//! installing it.

use actuator_protocol::Mode;
use metrics::{describe_counter, describe_histogram, Label, Unit};

/// Type of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonically increasing count.
    Counter,
    /// Distribution of values.
    Histogram,
}

/// A metric definition with its metadata.
#[derive(Debug, Clone, Copy)]
pub struct Metric {
    /// Metric name.
    pub name: &'static str,
    /// Metric kind.
    pub kind: MetricKind,
    /// Description.
    pub description: &'static str,
    /// Unit, if any.
    pub unit: Option<Unit>,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// Creates a new counter metric with the given name.
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new histogram metric with the given name.
    pub const fn histogram(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Histogram,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Sets the description for the metric.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit for the metric.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the expected label keys for the metric.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Label set for one emission from `session` while speaking `mode`.
    ///
    /// Only the keys declared on the metric are produced, in declaration order.
    pub fn labels_for(&self, session: &str, mode: Mode) -> Vec<Label> {
        self.labels
            .iter()
            .filter_map(|&key| match key {
                "session" => Some(Label::new(key, session.to_string())),
                "mode" => Some(Label::new(key, mode.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Registers this metric's description with the metrics recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// All session metrics.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Labels present on every session metric.
    pub const SESSION_LABELS: &[&str] = &["session", "mode"];

    /// Frames written to the transport.
    pub const FRAMES_SENT: Metric = Metric::counter("actuator.session.frames_sent")
        .with_description("Frames written to the transport")
        .with_unit(Unit::Count)
        .with_labels(SESSION_LABELS);

    /// Frames decoded from the transport, including unsolicited ones.
    pub const FRAMES_RECEIVED: Metric = Metric::counter("actuator.session.frames_received")
        .with_description("Frames decoded from the transport")
        .with_unit(Unit::Count)
        .with_labels(SESSION_LABELS);

    /// Undecodable input skipped by the reader.
    pub const FRAME_ERRORS: Metric = Metric::counter("actuator.session.frame_errors")
        .with_description("Undecodable frames skipped")
        .with_unit(Unit::Count)
        .with_labels(SESSION_LABELS);

    /// Requests that received no reply in time.
    pub const TIMEOUTS: Metric = Metric::counter("actuator.session.timeouts")
        .with_description("Requests that timed out")
        .with_unit(Unit::Count)
        .with_labels(SESSION_LABELS);

    /// Sends rejected because a request was in flight.
    pub const BUSY_REJECTIONS: Metric = Metric::counter("actuator.session.busy_rejections")
        .with_description("Sends rejected while a request was in flight")
        .with_unit(Unit::Count)
        .with_labels(SESSION_LABELS);

    /// Time from submission to matching reply.
    pub const REPLY_LATENCY: Metric = Metric::histogram("actuator.session.reply_latency_us")
        .with_description("Time from request submission to reply in microseconds")
        .with_unit(Unit::Microseconds)
        .with_labels(SESSION_LABELS);

    /// Every session metric, for bulk registration.
    pub const ALL: &[Metric] = &[
        FRAMES_SENT,
        FRAMES_RECEIVED,
        FRAME_ERRORS,
        TIMEOUTS,
        BUSY_REJECTIONS,
        REPLY_LATENCY,
    ];
}

/// Register descriptions for every session metric.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_unique() {
        let mut names: Vec<_> = metric_defs::ALL.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
    }

    #[test]
    fn test_metric_labels() {
        for metric in metric_defs::ALL {
            assert!(metric.name.starts_with("actuator.session."));
            assert_eq!(metric.labels, metric_defs::SESSION_LABELS);
            assert!(!metric.description.is_empty());
        }
        assert_eq!(metric_defs::REPLY_LATENCY.kind, MetricKind::Histogram);
    }

    #[test]
    fn test_labels_for_emission() {
        let labels = metric_defs::TIMEOUTS.labels_for("arm", Mode::Binary);
        let pairs: Vec<(&str, &str)> = labels.iter().map(|l| (l.key(), l.value())).collect();
        assert_eq!(pairs, [("session", "arm"), ("mode", "binary")]);

        let bare = Metric::counter("actuator.test.bare");
        assert!(bare.labels_for("arm", Mode::Binary).is_empty());
    }

    #[test]
    fn test_describe_without_recorder() {
        describe_metrics();
    }
}
