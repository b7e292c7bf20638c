//! Metric declarations for the accessory link.
//!
//! Every metric the link records is declared here as a [`Metric`] constant so
//! names cannot drift between the recording site and the description.
//! Recording is a no-op unless the host process installs a `metrics`
//! recorder.
//!
//! ```rust
//! use phonelink_link::link_metrics::metric_defs;
//!
//! metrics::counter!(metric_defs::FRAMES_SENT.name, "kind" => "query").increment(1);
//! ```

use metrics::{describe_counter, Unit};

/// A counter declaration with its metadata.
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "phonelink.frames_sent").
    pub name: &'static str,
    /// Human-readable description of the metric.
    pub description: &'static str,
    /// Expected label keys for this metric.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// Creates a new counter metric with the given name.
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            description: "",
            labels: &[],
        }
    }

    /// Sets the description.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the expected label keys.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers the description with the installed recorder.
    pub fn describe(&self) {
        describe_counter!(self.name, Unit::Count, self.description);
    }
}

/// All metrics recorded by the link.
pub mod metric_defs {
    use super::Metric;

    /// Frames written to the accessory, by frame kind.
    pub const FRAMES_SENT: Metric = Metric::counter("phonelink.frames_sent")
        .with_description("Frames written to the accessory")
        .with_labels(&["kind"]);

    /// Telemetry pushes skipped because nothing changed.
    pub const TELEMETRY_SUPPRESSED: Metric = Metric::counter("phonelink.telemetry_suppressed")
        .with_description("Telemetry pushes skipped because the snapshot was unchanged");

    /// Frames that could not be written.
    pub const WRITE_FAILURES: Metric = Metric::counter("phonelink.write_failures")
        .with_description("Frames that could not be written to the accessory");

    /// Accessory sessions opened.
    pub const SESSIONS_OPENED: Metric = Metric::counter("phonelink.sessions_opened")
        .with_description("Accessory sessions opened");

    /// Accessory sessions lost to channel failures.
    pub const CONNECTIONS_LOST: Metric = Metric::counter("phonelink.connections_lost")
        .with_description("Accessory sessions lost to channel failures");

    /// Listener failures (bind or accept).
    pub const ACCEPT_FAILURES: Metric = Metric::counter("phonelink.accept_failures")
        .with_description("Failures to open or accept on the listening endpoint");

    /// Every metric, for bulk registration.
    pub const ALL: &[Metric] = &[
        FRAMES_SENT,
        TELEMETRY_SUPPRESSED,
        WRITE_FAILURES,
        SESSIONS_OPENED,
        CONNECTIONS_LOST,
        ACCEPT_FAILURES,
    ];
}

/// Register descriptions for every metric. Call once at startup, after the
/// recorder is installed.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_unique() {
        let mut names: Vec<&str> = metric_defs::ALL.iter().map(|m| m.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
    }

    #[test]
    fn test_metric_builder() {
        assert_eq!(metric_defs::FRAMES_SENT.labels, &["kind"]);
        assert!(metric_defs::ALL.iter().all(|m| m.name.starts_with("phonelink.")));
        assert!(metric_defs::ALL.iter().all(|m| !m.description.is_empty()));
    }

    #[test]
    fn test_describe_without_recorder() {
        describe_metrics();
    }
}
