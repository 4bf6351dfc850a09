use crate::error::MeasureError;
use tokio::sync::mpsc;

pub const PLACEHOLDER: &str = "--";
pub const READY: &str = "Ready to test";
pub const CANCELLED: &str = "Test cancelled";
pub const STOPPED: &str = "Test stopped";

/// One `(status, metric)` pair as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: String,
    pub metric: String,
}

impl StatusUpdate {
    pub fn new(status: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            metric: metric.into(),
        }
    }
}

/// Receives live updates from a running measurement.
///
/// Calls arrive from the measurement task at arbitrary times. The controller
/// forwards them while holding its state lock, so an implementation must not
/// call back into the controller.
pub trait ReportSink: Send + Sync {
    fn report(&self, status: &str, metric: &str);

    /// Whether the start buttons (or their equivalent) should be usable.
    fn controls_enabled(&self, _enabled: bool) {}
}

impl<F> ReportSink for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn report(&self, status: &str, metric: &str) {
        self(status, metric)
    }
}

/// What a front end receives through [`ChannelSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Status(StatusUpdate),
    Controls { enabled: bool },
}

/// Forwards every report over an unbounded channel, for front ends that
/// poll from their own event loop.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Update>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Update>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ReportSink for ChannelSink {
    fn report(&self, status: &str, metric: &str) {
        // A closed receiver means the front end is gone; nothing to tell.
        let _ = self.tx.send(Update::Status(StatusUpdate::new(status, metric)));
    }

    fn controls_enabled(&self, enabled: bool) {
        let _ = self.tx.send(Update::Controls { enabled });
    }
}

/// Turns the outcome of a loop into its final report.
pub fn report_outcome<R: ReportSink + ?Sized>(sink: &R, err: &MeasureError) {
    if err.is_cancelled() {
        sink.report(CANCELLED, PLACEHOLDER);
    } else {
        sink.report(&format!("Error: {err}"), PLACEHOLDER);
    }
}

pub fn format_speed(mb_per_sec: f64) -> String {
    format!("{mb_per_sec:.2} MB/s")
}

pub fn format_latency(ms: f64) -> String {
    format!("{ms:.1} ms")
}
