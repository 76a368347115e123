use std::sync::Mutex;
use std::time::{Duration, Instant};

use relaydrive_protocol::{TransferProgress, TransferStatus};

/// Accumulates transferred bytes for one file and derives throughput.
///
/// Throughput is bytes-so-far over elapsed time since the meter was
/// created, so retries and cool-downs pull the figure down as they should.
pub struct ThroughputMeter {
    inner: Mutex<MeterInner>,
}

struct MeterInner {
    started_at: Instant,
    transferred: u64,
    total: u64,
}

impl ThroughputMeter {
    pub fn new(total: u64) -> Self {
        Self::starting_at(total, Instant::now())
    }

    /// Meter whose clock started at `started_at`.
    pub fn starting_at(total: u64, started_at: Instant) -> Self {
        Self {
            inner: Mutex::new(MeterInner {
                started_at,
                transferred: 0,
                total,
            }),
        }
    }

    /// Records `bytes` more transferred. Never exceeds the total.
    pub fn add(&self, bytes: u64) {
        let mut m = self.inner.lock().unwrap();
        m.transferred = (m.transferred + bytes).min(m.total);
    }

    pub fn transferred(&self) -> u64 {
        self.inner.lock().unwrap().transferred
    }

    pub fn total(&self) -> u64 {
        self.inner.lock().unwrap().total
    }

    pub fn percent(&self) -> f64 {
        let m = self.inner.lock().unwrap();
        percent_of(m.transferred, m.total)
    }

    /// Average bytes per second as of `now`. 0.0 before any time elapsed.
    pub fn bytes_per_second_at(&self, now: Instant) -> f64 {
        let m = self.inner.lock().unwrap();
        rate(m.transferred, now.saturating_duration_since(m.started_at))
    }

    pub fn bytes_per_second(&self) -> f64 {
        self.bytes_per_second_at(Instant::now())
    }

    /// Remaining time as of `now`; `None` while throughput is zero.
    pub fn eta_at(&self, now: Instant) -> Option<Duration> {
        let m = self.inner.lock().unwrap();
        let speed = rate(m.transferred, now.saturating_duration_since(m.started_at));
        eta(m.total - m.transferred, speed)
    }

    pub fn eta(&self) -> Option<Duration> {
        self.eta_at(Instant::now())
    }

    /// Builds a progress snapshot as of `now`.
    pub fn snapshot_at(
        &self,
        now: Instant,
        status: TransferStatus,
        label: impl Into<String>,
    ) -> TransferProgress {
        let m = self.inner.lock().unwrap();
        let speed = rate(m.transferred, now.saturating_duration_since(m.started_at));
        let percent = if status == TransferStatus::Completed {
            100.0
        } else {
            percent_of(m.transferred, m.total)
        };
        TransferProgress {
            percent,
            bytes_per_second: speed,
            eta_seconds: eta(m.total - m.transferred, speed).map(|d| d.as_secs_f64()),
            transferred_bytes: m.transferred,
            total_bytes: m.total,
            ..TransferProgress::with_status(status, label)
        }
    }

    pub fn snapshot(&self, status: TransferStatus, label: impl Into<String>) -> TransferProgress {
        self.snapshot_at(Instant::now(), status, label)
    }
}

fn percent_of(transferred: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    transferred as f64 / total as f64 * 100.0
}

fn rate(transferred: u64, elapsed: Duration) -> f64 {
    if elapsed.is_zero() {
        return 0.0;
    }
    transferred as f64 / elapsed.as_secs_f64()
}

fn eta(remaining: u64, speed: f64) -> Option<Duration> {
    if speed <= 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(remaining as f64 / speed))
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

/// Human-readable throughput: `"..."` below 1 KB/s, then KB/s or MB/s.
pub fn format_speed(bytes_per_second: f64) -> String {
    if !bytes_per_second.is_finite() || bytes_per_second < KIB {
        return "...".into();
    }
    if bytes_per_second < MIB {
        return format!("{:.2} KB/s", bytes_per_second / KIB);
    }
    format!("{:.2} MB/s", bytes_per_second / MIB)
}

/// Human-readable remaining time such as `"1h 2m 3s"`.
///
/// Unknown or sub-second estimates render as `"..."`.
pub fn format_eta(eta: Option<Duration>) -> String {
    let Some(eta) = eta else {
        return "...".into();
    };
    let secs = eta.as_secs();
    if secs == 0 {
        return "...".into();
    }
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);

    let mut parts = Vec::with_capacity(3);
    if h > 0 {
        parts.push(format!("{h}h"));
    }
    if m > 0 {
        parts.push(format!("{m}m"));
    }
    if s > 0 {
        parts.push(format!("{s}s"));
    }
    parts.join(" ")
}
