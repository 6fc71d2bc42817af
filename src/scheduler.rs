// ABOUTME: Interval scheduler for the nightly metrics rollup and the retention prune
// ABOUTME: Each job is single-flight; overlapping triggers are skipped and failures never stop the loop
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

//! # Job Scheduler
//!
//! Jobs run once at start and then on fixed tokio intervals. A per-job mutex taken with `try_lock`
//! keeps at most one run of a job in flight; a tick that finds the job still
//! running is skipped with a log line. Every job must be idempotent, so a
//! skipped or failed window is simply covered by the next run.

use crate::metrics::MetricsAggregator;
use crate::security::audit::SecurityAuditor;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// A periodic background job
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Stable job name used in logs and for manual triggers
    fn name(&self) -> &'static str;

    /// Time between runs
    fn interval(&self) -> Duration;

    /// Execute one run
    async fn run(&self) -> anyhow::Result<()>;
}

/// Result of one attempted run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum JobRunOutcome {
    /// The job ran to completion
    Completed,
    /// The job ran and returned an error
    Failed(String),
    /// Another run of the job was still in flight
    Skipped,
}

#[derive(Clone)]
struct JobEntry {
    job: Arc<dyn ScheduledJob>,
    running: Arc<Mutex<()>>,
}

impl JobEntry {
    async fn run_guarded(&self) -> JobRunOutcome {
        let name = self.job.name();
        let Ok(_guard) = self.running.try_lock() else {
            warn!(job = name, "Previous run still in progress, skipping");
            return JobRunOutcome::Skipped;
        };

        let started = Instant::now();
        match self.job.run().await {
            Ok(()) => {
                info!(
                    job = name,
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Scheduled job completed"
                );
                JobRunOutcome::Completed
            }
            Err(e) => {
                error!(job = name, error = %e, "Scheduled job failed");
                JobRunOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Registry of scheduled jobs
#[derive(Default, Clone)]
pub struct JobScheduler {
    jobs: HashMap<&'static str, JobEntry>,
}

impl JobScheduler {
    /// Empty scheduler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job, replacing any job with the same name
    #[must_use]
    pub fn with_job(mut self, job: Arc<dyn ScheduledJob>) -> Self {
        self.jobs.insert(
            job.name(),
            JobEntry {
                job,
                running: Arc::new(Mutex::new(())),
            },
        );
        self
    }

    /// Names of the registered jobs
    #[must_use]
    pub fn job_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.jobs.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Run a job now, outside its interval
    ///
    /// Returns `None` for an unknown job name. Shares the single-flight guard
    /// with the interval loop.
    pub async fn trigger(&self, name: &str) -> Option<JobRunOutcome> {
        let entry = self.jobs.get(name)?;
        Some(entry.run_guarded().await)
    }

    /// Spawn one interval loop per job
    ///
    /// Loops stop when `shutdown` changes or its sender is dropped. Each job
    /// runs immediately, then once per interval.
    #[must_use]
    pub fn start(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.jobs
            .values()
            .map(|entry| {
                let entry = entry.clone();
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let period = entry.job.interval();
                    let mut ticker = tokio::time::interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    info!(job = entry.job.name(), interval_secs = period.as_secs(), "Scheduled job registered");

                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                let _ = entry.run_guarded().await;
                            }
                            _ = shutdown.changed() => {
                                info!(job = entry.job.name(), "Scheduled job stopping");
                                break;
                            }
                        }
                    }
                })
            })
            .collect()
    }
}

/// Rolls up audit events into daily metrics for every day not yet covered
pub struct NightlyRollupJob {
    metrics: MetricsAggregator,
    interval: Duration,
}

impl NightlyRollupJob {
    /// Job name
    pub const NAME: &'static str = "nightly_metrics_rollup";

    /// Create the job
    #[must_use]
    pub const fn new(metrics: MetricsAggregator, interval: Duration) -> Self {
        Self { metrics, interval }
    }
}

#[async_trait]
impl ScheduledJob for NightlyRollupJob {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> anyhow::Result<()> {
        let reports = self.metrics.rollup_pending(Utc::now()).await?;
        for report in &reports {
            info!(
                date = %report.date,
                events = report.events_processed,
                clients = report.clients,
                "Metrics rollup finished"
            );
        }
        if reports.is_empty() {
            info!("Metrics already rolled up through yesterday");
        }
        Ok(())
    }
}

/// Deletes metrics and audit events past their retention horizons
pub struct RetentionPruneJob {
    metrics: MetricsAggregator,
    auditor: SecurityAuditor,
    interval: Duration,
}

impl RetentionPruneJob {
    /// Job name
    pub const NAME: &'static str = "retention_prune";

    /// Create the job
    #[must_use]
    pub const fn new(metrics: MetricsAggregator, auditor: SecurityAuditor, interval: Duration) -> Self {
        Self {
            metrics,
            auditor,
            interval,
        }
    }
}

#[async_trait]
impl ScheduledJob for RetentionPruneJob {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        // Both prunes are attempted even if the first fails
        let metrics = self.metrics.prune(now.date_naive()).await;
        let audit = self.auditor.prune(now).await;

        let metrics_removed = metrics?;
        let audit_removed = audit?;
        info!(metrics_removed, audit_removed, "Retention prune finished");
        Ok(())
    }
}
