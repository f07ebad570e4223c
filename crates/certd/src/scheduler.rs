//! Background certificate renewal scheduler
//!
//! Periodically scans the record store and reissues certificates whose
//! remaining lifetime dropped below the renewal threshold.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use snicert_config::RenewalConfig;

use crate::error::{IssuanceError, StoreError};
use crate::issuance::{IssuanceCoordinator, IssuanceProvider};
use crate::metrics::Metrics;
use crate::store::RecordStore;

/// Minimum time between scans
const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Maximum time between scans
const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(366 * 86400);

/// Where the scheduler is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    Scanning = 1,
    Renewing = 2,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Scanning,
            2 => Self::Renewing,
            _ => Self::Idle,
        }
    }
}

/// Outcome of one scan
#[derive(Debug, Default)]
pub struct RenewalReport {
    /// Records examined
    pub checked: usize,
    /// Records below the threshold
    pub due: usize,
    pub renewed: usize,
    pub failed: Vec<IssuanceError>,
}

/// Background certificate renewal scheduler
pub struct RenewalScheduler<P: IssuanceProvider> {
    coordinator: IssuanceCoordinator<P>,
    store: Arc<dyn RecordStore>,
    threshold: Duration,
    check_interval: Duration,
    initial_delay: Duration,
    max_concurrent: usize,
    state: AtomicU8,
    metrics: Option<Arc<Metrics>>,
}

impl<P: IssuanceProvider> RenewalScheduler<P> {
    pub fn new(coordinator: IssuanceCoordinator<P>, config: &RenewalConfig) -> Self {
        Self {
            store: Arc::clone(coordinator.store()),
            coordinator,
            threshold: config.threshold(),
            check_interval: config.check_interval().clamp(MIN_CHECK_INTERVAL, MAX_CHECK_INTERVAL),
            initial_delay: config.initial_delay(),
            max_concurrent: config.max_concurrent.max(1),
            state: AtomicU8::new(SchedulerState::Idle as u8),
            metrics: None,
        }
    }

    /// Set the check interval
    ///
    /// Clamped to between one minute and one year.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.clamp(MIN_CHECK_INTERVAL, MAX_CHECK_INTERVAL);
        self
    }

    pub fn with_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Run the renewal loop until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            check_interval_secs = self.check_interval.as_secs(),
            threshold_days = self.threshold.as_secs() / 86400,
            "Starting certificate renewal scheduler"
        );

        tokio::select! {
            _ = tokio::time::sleep(self.initial_delay) => {}
            _ = shutdown.cancelled() => {
                info!("Renewal scheduler stopped before first scan");
                return;
            }
        }

        let mut ticker = interval_at(Instant::now(), self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => break,
            }

            debug!("Running scheduled certificate renewal check");
            if let Err(e) = self.check_renewals().await {
                error!(error = %e, "Certificate renewal check failed");
            }
        }

        info!("Renewal scheduler stopped");
    }

    /// Scan once using the current time
    pub async fn check_renewals(&self) -> Result<RenewalReport, StoreError> {
        self.check_renewals_at(Utc::now()).await
    }

    /// Scan once, treating `now` as the current time
    ///
    /// A record is due when `not_after - now` is strictly below the
    /// threshold. Renewals use the email stored on the record. Failures are
    /// collected in the report and never abort the scan.
    pub async fn check_renewals_at(&self, now: DateTime<Utc>) -> Result<RenewalReport, StoreError> {
        self.set_state(SchedulerState::Scanning);
        let records = match self.store.list_all() {
            Ok(records) => records,
            Err(e) => {
                self.set_state(SchedulerState::Idle);
                return Err(e);
            }
        };

        let threshold = chrono::Duration::from_std(self.threshold).unwrap_or(chrono::Duration::MAX);
        let mut report = RenewalReport {
            checked: records.len(),
            ..Default::default()
        };

        let due: Vec<_> = records
            .into_iter()
            .filter(|record| {
                let remaining = record.time_remaining(now);
                let is_due = remaining < threshold;
                if is_due {
                    info!(
                        domain = %record.domain(),
                        not_after = %record.not_after(),
                        "Certificate needs renewal"
                    );
                } else {
                    debug!(
                        domain = %record.domain(),
                        not_after = %record.not_after(),
                        "Certificate is still valid"
                    );
                }
                is_due
            })
            .collect();
        report.due = due.len();

        info!(
            checked = report.checked,
            due = report.due,
            "Checked certificates for renewal"
        );

        if !due.is_empty() {
            self.set_state(SchedulerState::Renewing);

            let outcomes: Vec<_> = stream::iter(due)
                .map(|record| {
                    let coordinator = self.coordinator.clone();
                    async move {
                        coordinator
                            .issue(record.domain().clone(), record.email())
                            .await
                    }
                })
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;

            for outcome in outcomes {
                match outcome {
                    Ok(record) => {
                        info!(
                            domain = %record.domain(),
                            not_after = %record.not_after(),
                            "Certificate renewed successfully"
                        );
                        report.renewed += 1;
                    }
                    Err(e) => {
                        warn!(
                            domain = %e.domain,
                            error = %e.cause,
                            "Certificate renewal failed, will retry next cycle"
                        );
                        report.failed.push(e);
                    }
                }
            }
        }

        self.set_state(SchedulerState::Idle);
        if let Some(metrics) = &self.metrics {
            metrics.record_renewal_check();
        }
        Ok(report)
    }
}

impl<P: IssuanceProvider> std::fmt::Debug for RenewalScheduler<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalScheduler")
            .field("threshold", &self.threshold)
            .field("check_interval", &self.check_interval)
            .field("max_concurrent", &self.max_concurrent)
            .field("state", &self.state())
            .finish()
    }
}
