//! Guard counters and their Prometheus text exposition.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct GuardMetrics {
    pub navigations_total: AtomicU64,
    pub disabled_skips_total: AtomicU64,
    pub classifications_total: AtomicU64,
    pub unavailable_total: AtomicU64,
    pub stale_total: AtomicU64,
    pub warnings_total: AtomicU64,
    pub injection_failures_total: AtomicU64,
    pub scans_total: AtomicU64,
}

impl GuardMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render(&self, uptime_secs: f64) -> String {
        let counters: [(&str, &str, &AtomicU64); 8] = [
            (
                "phishguard_navigations_total",
                "Completed navigations considered by the guard",
                &self.navigations_total,
            ),
            (
                "phishguard_disabled_skips_total",
                "Navigations skipped because the guard was disabled",
                &self.disabled_skips_total,
            ),
            (
                "phishguard_classifications_total",
                "Classifier requests issued by the navigation monitor",
                &self.classifications_total,
            ),
            (
                "phishguard_unavailable_total",
                "Checks that ended without a verdict",
                &self.unavailable_total,
            ),
            (
                "phishguard_stale_total",
                "Phishing verdicts dropped because the tab moved on",
                &self.stale_total,
            ),
            (
                "phishguard_warnings_total",
                "Interstitials injected",
                &self.warnings_total,
            ),
            (
                "phishguard_injection_failures_total",
                "Interstitial injections the host rejected",
                &self.injection_failures_total,
            ),
            (
                "phishguard_scans_total",
                "Manual scans requested",
                &self.scans_total,
            ),
        ];
        let mut buf = String::new();
        for (name, help, value) in counters {
            writeln!(&mut buf, "# HELP {} {}", name, help).ok();
            writeln!(&mut buf, "# TYPE {} counter", name).ok();
            writeln!(&mut buf, "{} {}", name, value.load(Ordering::Relaxed)).ok();
        }
        writeln!(
            &mut buf,
            "# HELP phishguard_uptime_seconds Seconds since the daemon started"
        )
        .ok();
        writeln!(&mut buf, "# TYPE phishguard_uptime_seconds gauge").ok();
        writeln!(&mut buf, "phishguard_uptime_seconds {:.3}", uptime_secs).ok();
        buf
    }
}
