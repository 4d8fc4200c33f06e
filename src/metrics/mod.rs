//! Delivery metrics.
//!
//! A single in-memory accumulator fed from the send path through a
//! narrow recording interface, snapshotted on demand. Tracks counters,
//! a cumulative latency histogram, an error breakdown by kind, and a
//! failure ledger with per-recipient failure counts.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::{ErrorKind, MailError};

/// Histogram cutoffs in seconds. Buckets are cumulative: a send counts
/// into every bucket whose cutoff it does not exceed.
pub const HISTOGRAM_BUCKETS: [f64; 5] = [0.1, 0.5, 1.0, 2.0, 5.0];

const BUCKET_LABELS: [&str; 5] = ["0.1", "0.5", "1", "2", "5"];

/// Outcome of the most recent send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    /// Last send succeeded.
    Success,
    /// Last send failed.
    Failure,
    /// No send has completed yet.
    None,
}

/// One entry in the failure ledger.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    /// When the failure occurred.
    pub timestamp: DateTime<Utc>,
    /// Recipients of the failed send, joined with `", "`.
    pub recipients: String,
    /// Error code.
    pub code: String,
    /// Error kind.
    pub kind: ErrorKind,
    /// Error message.
    pub message: String,
}

/// Error counts broken down by kind.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ErrorsByType {
    /// Connection failures.
    pub connection: u64,
    /// Authentication failures.
    pub authentication: u64,
    /// Rate-limit rejections.
    pub rate_limit: u64,
    /// Validation failures.
    pub validation: u64,
    /// Timeouts.
    pub timeout: u64,
    /// Attachment failures.
    pub attachment: u64,
    /// Command failures.
    pub command: u64,
    /// Everything else.
    pub unknown: u64,
}

impl ErrorsByType {
    fn increment(&mut self, kind: ErrorKind) {
        match kind {
            ErrorKind::Connection => self.connection += 1,
            ErrorKind::Authentication => self.authentication += 1,
            ErrorKind::RateLimit => self.rate_limit += 1,
            ErrorKind::Validation => self.validation += 1,
            ErrorKind::Timeout => self.timeout += 1,
            ErrorKind::Attachment => self.attachment += 1,
            ErrorKind::Command => self.command += 1,
            ErrorKind::Unknown => self.unknown += 1,
        }
    }
}

/// Send latency statistics, in seconds.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DurationStats {
    /// Sum of all observed latencies.
    pub sum: f64,
    /// Number of observations.
    pub count: u64,
    /// Mean latency.
    pub avg: f64,
    /// Worst latency.
    pub max: f64,
    /// Best latency. Zero until the first observation.
    pub min: f64,
}

/// Failure ledger and per-recipient failure accounting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FailureDetails {
    /// Failure records, oldest first.
    pub recent: Vec<FailureRecord>,
    /// Failure count per recipient address.
    pub error_count_by_recipient: HashMap<String, u64>,
    /// Mean failures across recipients that have failed at least once.
    pub avg_failures_per_recipient: f64,
}

#[derive(Debug)]
struct MetricsInner {
    emails_total: u64,
    emails_successful: u64,
    emails_failed: u64,
    connection_errors: u64,
    rate_limit_exceeded_total: u64,
    total_retry_attempts: u64,
    successful_retries: u64,
    banned_recipients_count: u64,
    consecutive_failures: u64,
    duration_sum: f64,
    duration_count: u64,
    duration_avg: f64,
    duration_max: f64,
    duration_min: f64,
    buckets: [u64; 5],
    email_send_rate: f64,
    last_email_status: EmailStatus,
    last_email_at: Option<Instant>,
    last_email_timestamp: Option<DateTime<Utc>>,
    errors_by_type: ErrorsByType,
    failure_details: FailureDetails,
}

impl Default for MetricsInner {
    fn default() -> Self {
        Self {
            emails_total: 0,
            emails_successful: 0,
            emails_failed: 0,
            connection_errors: 0,
            rate_limit_exceeded_total: 0,
            total_retry_attempts: 0,
            successful_retries: 0,
            banned_recipients_count: 0,
            consecutive_failures: 0,
            duration_sum: 0.0,
            duration_count: 0,
            duration_avg: 0.0,
            duration_max: 0.0,
            duration_min: f64::INFINITY,
            buckets: [0; 5],
            email_send_rate: 0.0,
            last_email_status: EmailStatus::None,
            last_email_at: None,
            last_email_timestamp: None,
            errors_by_type: ErrorsByType::default(),
            failure_details: FailureDetails::default(),
        }
    }
}

/// Metrics accumulator.
#[derive(Debug, Default)]
pub struct Metrics {
    inner: Mutex<MetricsInner>,
}

impl Metrics {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed successful send.
    pub fn record_success(&self, elapsed: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.emails_total += 1;
        inner.emails_successful += 1;
        inner.last_email_status = EmailStatus::Success;
        inner.consecutive_failures = 0;
        observe_duration(&mut inner, elapsed);
        update_rate(&mut inner);
    }

    /// Records a completed failed send.
    pub fn record_failure(&self, elapsed: Duration, recipients: &[String], error: &MailError) {
        let mut inner = self.inner.lock().unwrap();
        inner.emails_total += 1;
        inner.emails_failed += 1;
        inner.last_email_status = EmailStatus::Failure;
        inner.consecutive_failures += 1;
        inner.errors_by_type.increment(error.kind());
        observe_duration(&mut inner, elapsed);
        update_rate(&mut inner);

        inner.failure_details.recent.push(FailureRecord {
            timestamp: Utc::now(),
            recipients: recipients.join(", "),
            code: error.code().to_string(),
            kind: error.kind(),
            message: error.message().to_string(),
        });
        for recipient in recipients {
            *inner
                .failure_details
                .error_count_by_recipient
                .entry(recipient.clone())
                .or_insert(0) += 1;
        }
        let counts = &inner.failure_details.error_count_by_recipient;
        inner.failure_details.avg_failures_per_recipient = if counts.is_empty() {
            0.0
        } else {
            counts.values().sum::<u64>() as f64 / counts.len() as f64
        };
    }

    /// Records a rate-limit rejection. Rejections never count into
    /// `emails_total`; no socket was opened.
    pub fn record_rate_limit_exceeded(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.rate_limit_exceeded_total += 1;
        inner.errors_by_type.rate_limit += 1;
    }

    /// Records a failed connection probe.
    pub fn record_connection_error(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.connection_errors += 1;
        inner.errors_by_type.connection += 1;
        inner.last_email_status = EmailStatus::Failure;
    }

    /// Records a recipient entering the banned state.
    pub fn record_ban(&self) {
        self.inner.lock().unwrap().banned_recipients_count += 1;
    }

    /// Records a recipient's ban expiring.
    pub fn record_ban_cleared(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.banned_recipients_count = inner.banned_recipients_count.saturating_sub(1);
    }

    /// Records one retry of a failed attempt.
    pub fn record_retry_attempt(&self) {
        self.inner.lock().unwrap().total_retry_attempts += 1;
    }

    /// Records a send that succeeded after at least one retry.
    pub fn record_successful_retry(&self) {
        self.inner.lock().unwrap().successful_retries += 1;
    }

    /// Returns a point-in-time snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock().unwrap();
        let mut buckets = BTreeMap::new();
        for (label, count) in BUCKET_LABELS.iter().zip(inner.buckets.iter()) {
            buckets.insert(label.to_string(), *count);
        }

        MetricsSnapshot {
            emails_total: inner.emails_total,
            emails_successful: inner.emails_successful,
            emails_failed: inner.emails_failed,
            connection_errors: inner.connection_errors,
            rate_limit_exceeded_total: inner.rate_limit_exceeded_total,
            total_retry_attempts: inner.total_retry_attempts,
            successful_retries: inner.successful_retries,
            banned_recipients_count: inner.banned_recipients_count,
            consecutive_failures: inner.consecutive_failures,
            email_send_rate: inner.email_send_rate,
            email_send_duration_seconds: DurationStats {
                sum: inner.duration_sum,
                count: inner.duration_count,
                avg: inner.duration_avg,
                max: inner.duration_max,
                min: if inner.duration_count == 0 {
                    0.0
                } else {
                    inner.duration_min
                },
            },
            email_send_duration_buckets: buckets,
            last_email_status: inner.last_email_status,
            last_email_timestamp: inner.last_email_timestamp,
            errors_by_type: inner.errors_by_type,
            failure_details: inner.failure_details.clone(),
        }
    }
}

fn observe_duration(inner: &mut MetricsInner, elapsed: Duration) {
    let seconds = elapsed.as_secs_f64();
    inner.duration_sum += seconds;
    inner.duration_count += 1;
    inner.duration_avg = inner.duration_sum / inner.duration_count as f64;
    inner.duration_max = inner.duration_max.max(seconds);
    inner.duration_min = inner.duration_min.min(seconds);
    for (bucket, cutoff) in inner.buckets.iter_mut().zip(HISTOGRAM_BUCKETS.iter()) {
        if seconds <= *cutoff {
            *bucket += 1;
        }
    }
}

/// Per-send rate ratio: total emails over minutes since the previous
/// send. Noisy by construction; not a true throughput.
fn update_rate(inner: &mut MetricsInner) {
    let now = Instant::now();
    if let Some(previous) = inner.last_email_at {
        let minutes = now.duration_since(previous).as_secs_f64() / 60.0;
        if minutes > 0.0 {
            inner.email_send_rate = inner.emails_total as f64 / minutes;
        }
    }
    inner.last_email_at = Some(now);
    inner.last_email_timestamp = Some(Utc::now());
}

/// Point-in-time view of the accumulator.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Completed sends, successful or failed.
    pub emails_total: u64,
    /// Successful sends.
    pub emails_successful: u64,
    /// Failed sends.
    pub emails_failed: u64,
    /// Failed connection probes.
    pub connection_errors: u64,
    /// Rate-limit rejections.
    pub rate_limit_exceeded_total: u64,
    /// Retries performed.
    pub total_retry_attempts: u64,
    /// Sends that succeeded after retrying.
    pub successful_retries: u64,
    /// Currently banned recipients (approximate across overlapping bans).
    pub banned_recipients_count: u64,
    /// Consecutive failed sends; resets on success.
    pub consecutive_failures: u64,
    /// Emails per minute since the previous send.
    pub email_send_rate: f64,
    /// Latency statistics in seconds.
    pub email_send_duration_seconds: DurationStats,
    /// Cumulative latency histogram keyed by cutoff.
    pub email_send_duration_buckets: BTreeMap<String, u64>,
    /// Outcome of the most recent send.
    pub last_email_status: EmailStatus,
    /// Completion time of the most recent send.
    pub last_email_timestamp: Option<DateTime<Utc>>,
    /// Error counts by kind.
    pub errors_by_type: ErrorsByType,
    /// Failure ledger and per-recipient accounting.
    pub failure_details: FailureDetails,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_updates_counters_and_buckets() {
        let metrics = Metrics::new();
        metrics.record_success(Duration::from_millis(150));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.emails_total, 1);
        assert_eq!(snapshot.emails_successful, 1);
        assert_eq!(snapshot.emails_failed, 0);
        assert_eq!(snapshot.last_email_status, EmailStatus::Success);
        assert_eq!(snapshot.email_send_duration_buckets["0.1"], 0);
        assert_eq!(snapshot.email_send_duration_buckets["0.5"], 1);
        assert_eq!(snapshot.email_send_duration_buckets["5"], 1);
        assert!((snapshot.email_send_duration_seconds.min - 0.15).abs() < 1e-9);
    }

    #[test]
    fn totals_balance() {
        let metrics = Metrics::new();
        metrics.record_success(Duration::from_millis(10));
        metrics.record_failure(
            Duration::from_millis(20),
            &["a@b.co".to_string()],
            &MailError::connection("refused"),
        );
        metrics.record_success(Duration::from_millis(30));

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot.emails_total,
            snapshot.emails_successful + snapshot.emails_failed
        );
    }

    #[test]
    fn buckets_are_cumulative_and_bounded() {
        let metrics = Metrics::new();
        for millis in [50, 200, 700, 1500, 3000, 10_000] {
            metrics.record_success(Duration::from_millis(millis));
        }

        let snapshot = metrics.snapshot();
        let buckets = &snapshot.email_send_duration_buckets;
        let ordered: Vec<u64> = BUCKET_LABELS.iter().map(|l| buckets[*l]).collect();
        for pair in ordered.windows(2) {
            assert!(pair[0] <= pair[1], "buckets must be monotone: {:?}", ordered);
        }
        assert!(buckets["5"] <= snapshot.email_send_duration_seconds.count);
    }

    #[test]
    fn failure_ledger_and_recipient_counts() {
        let metrics = Metrics::new();
        let recipients = vec!["a@b.co".to_string(), "c@d.co".to_string()];
        let error = MailError::command("rejected").with_server_response("550 no");
        metrics.record_failure(Duration::from_millis(80), &recipients, &error);
        metrics.record_failure(
            Duration::from_millis(90),
            &recipients[..1].to_vec(),
            &MailError::timeout("stalled"),
        );

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.failure_details.recent.len(), 2);
        assert_eq!(snapshot.failure_details.error_count_by_recipient["a@b.co"], 2);
        assert_eq!(snapshot.failure_details.error_count_by_recipient["c@d.co"], 1);
        assert!((snapshot.failure_details.avg_failures_per_recipient - 1.5).abs() < 1e-9);
        assert_eq!(snapshot.errors_by_type.command, 1);
        assert_eq!(snapshot.errors_by_type.timeout, 1);
        assert_eq!(snapshot.consecutive_failures, 2);
    }

    #[test]
    fn rate_limit_rejections_bypass_totals() {
        let metrics = Metrics::new();
        metrics.record_rate_limit_exceeded();
        metrics.record_rate_limit_exceeded();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rate_limit_exceeded_total, 2);
        assert_eq!(snapshot.errors_by_type.rate_limit, 2);
        assert_eq!(snapshot.emails_total, 0);
    }

    #[test]
    fn ban_counter_round_trip() {
        let metrics = Metrics::new();
        metrics.record_ban();
        metrics.record_ban();
        metrics.record_ban_cleared();
        assert_eq!(metrics.snapshot().banned_recipients_count, 1);
        metrics.record_ban_cleared();
        metrics.record_ban_cleared();
        assert_eq!(metrics.snapshot().banned_recipients_count, 0);
    }

    #[test]
    fn connection_probe_failure() {
        let metrics = Metrics::new();
        metrics.record_connection_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connection_errors, 1);
        assert_eq!(snapshot.errors_by_type.connection, 1);
        assert_eq!(snapshot.last_email_status, EmailStatus::Failure);
        assert_eq!(snapshot.emails_total, 0);
    }

    #[test]
    fn snapshot_serializes() {
        let metrics = Metrics::new();
        metrics.record_success(Duration::from_millis(42));
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("\"emails_total\":1"));
        assert!(json.contains("\"last_email_status\":\"success\""));
    }
}
