use std::fmt::Write as _;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct Metrics {
    pub versions_seeded_total: AtomicU64,
    pub updates_rewritten_total: AtomicU64,
    pub conflicts_total: AtomicU64,
    pub resolutions_total: AtomicU64,
    pub retries_total: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            versions_seeded_total: AtomicU64::new(0),
            updates_rewritten_total: AtomicU64::new(0),
            conflicts_total: AtomicU64::new(0),
            resolutions_total: AtomicU64::new(0),
            retries_total: AtomicU64::new(0),
        }
    }
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::default)
}

pub(crate) fn record_seed(count: u64) {
    metrics().versions_seeded_total.fetch_add(count, Ordering::Relaxed);
}

pub(crate) fn record_rewrite() {
    metrics().updates_rewritten_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_conflict() {
    metrics().conflicts_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_resolution() {
    metrics().resolutions_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_retry() {
    metrics().retries_total.fetch_add(1, Ordering::Relaxed);
}

pub fn render_prometheus() -> String {
    let m = metrics();
    let mut s = String::new();
    let _ = writeln!(
        s,
        "# TYPE versions_seeded_total counter\nversions_seeded_total {}",
        m.versions_seeded_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE updates_rewritten_total counter\nupdates_rewritten_total {}",
        m.updates_rewritten_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE conflicts_total counter\nconflicts_total {}",
        m.conflicts_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE resolutions_total counter\nresolutions_total {}",
        m.resolutions_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE retries_total counter\nretries_total {}",
        m.retries_total.load(Ordering::Relaxed)
    );
    s
}
