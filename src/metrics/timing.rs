// ABOUTME: Response-time source consulted by the metrics rollup
// ABOUTME: The audit trail carries no latency, so timings are recorded separately
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use greenbutton_core::errors::AppResult;

/// Per-client, per-day response time samples
#[async_trait]
pub trait UsageTimingSource: Send + Sync {
    /// Mean response time in milliseconds, `None` when no samples exist
    async fn average_response_time_ms(
        &self,
        client_id: &str,
        date: NaiveDate,
    ) -> AppResult<Option<f64>>;
}

/// Running sums of samples kept in memory
#[derive(Debug, Default)]
pub struct InMemoryUsageTimings {
    samples: DashMap<(String, NaiveDate), (u64, f64)>,
}

impl InMemoryUsageTimings {
    /// Create an empty source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request's response time
    pub fn record(&self, client_id: &str, date: NaiveDate, response_time_ms: f64) {
        let mut entry = self
            .samples
            .entry((client_id.to_owned(), date))
            .or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += response_time_ms;
    }
}

#[async_trait]
impl UsageTimingSource for InMemoryUsageTimings {
    async fn average_response_time_ms(
        &self,
        client_id: &str,
        date: NaiveDate,
    ) -> AppResult<Option<f64>> {
        Ok(self
            .samples
            .get(&(client_id.to_owned(), date))
            .filter(|entry| entry.0 > 0)
            .map(|entry| entry.1 / entry.0 as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_average_over_recorded_samples() {
        let timings = InMemoryUsageTimings::new();
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        timings.record("third_party_1", date, 120.0);
        timings.record("third_party_1", date, 80.0);

        let average = timings
            .average_response_time_ms("third_party_1", date)
            .await
            .unwrap();
        assert_eq!(average, Some(100.0));
        assert_eq!(
            timings
                .average_response_time_ms("third_party_2", date)
                .await
                .unwrap(),
            None
        );
    }
}
