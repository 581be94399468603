//! Clock discipline for radio timing.
//!
//! Two clocks exist and must never mix: the monotonic clock (`Instant`) for
//! local durations — engine positions, per-song timers — and the wall clock
//! for anything a host emits (`/time`, `buffered_at`). [`TimeSync`] turns
//! the local wall clock into the host's by sampling `/time` and keeping a
//! median offset; [`TimeSync::now`] is the only sanctioned conversion.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Local wall-clock time as Unix seconds.
pub fn wall_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// How many `/time` samples one sync takes.
const SYNC_SAMPLES: usize = 3;
/// Sync goes stale after this long.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(30);
const SAMPLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Wall-clock synchronization with one radio host.
pub struct TimeSync {
    /// host_time - local_time, seconds.
    offset: f64,
    last_sync: Option<Instant>,
}

impl Default for TimeSync {
    fn default() -> Self {
        Self {
            offset: 0.0,
            last_sync: None,
        }
    }
}

impl TimeSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sample the host's `/time` endpoint a few times and adopt the median
    /// offset. Returns whether a sync was obtained.
    pub async fn sync_with_host(&mut self, client: &reqwest::Client, host: &str, port: u16) -> bool {
        if host.is_empty() || host == "0.0.0.0" {
            return false;
        }
        let url = format!("http://{host}:{port}/time");
        let mut samples = Vec::with_capacity(SYNC_SAMPLES);

        for _ in 0..SYNC_SAMPLES {
            let t1 = wall_now();
            let response = client
                .get(&url)
                .timeout(SAMPLE_TIMEOUT)
                .send()
                .await
                .and_then(|r| r.error_for_status());
            let t2 = wall_now();

            if let Ok(resp) = response {
                let body = resp.text().await.unwrap_or_default();
                if let Ok(host_time) = body.trim().parse::<f64>() {
                    // One-way latency estimate: half the round trip
                    let latency = (t2 - t1) / 2.0;
                    samples.push(host_time + latency - t2);
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        if samples.is_empty() {
            tracing::warn!(target: "radio::clock", host, "clock sync failed");
            return false;
        }
        samples.sort_by(|a, b| a.total_cmp(b));
        self.offset = samples[samples.len() / 2];
        self.last_sync = Some(Instant::now());
        tracing::debug!(target: "radio::clock", host, offset = self.offset,
            samples = samples.len(), "clock synced");
        true
    }

    /// Current time on the host's wall clock.
    pub fn now(&self) -> f64 {
        wall_now() + self.offset
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn is_stale(&self) -> bool {
        match self.last_sync {
            Some(at) => at.elapsed() > SYNC_INTERVAL,
            None => true,
        }
    }

    #[cfg(test)]
    pub fn force(offset: f64) -> Self {
        Self {
            offset,
            last_sync: Some(Instant::now()),
        }
    }
}
