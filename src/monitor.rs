//! Navigation monitor: the guard pipeline proper.
//!
//! Each completed navigation runs through
//! `filter -> preference gate -> classify -> re-validate tab and gate -> interpose`
//! independently.  No state is kept between navigations.

use std::sync::Arc;

use serde::Serialize;

use crate::classifier::{ClassificationRequest, Classifier};
use crate::host::{NavigationEvent, NavigationListener, TabHost, TabId};
use crate::interposer::WarningInterposer;
use crate::preferences::{GuardPreference, PreferenceStore};
use crate::telemetry::GuardMetrics;

/// How one navigation instance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckOutcome {
    /// Not a completed load with a URL.
    Ignored,
    Disabled,
    /// The preference could not be read; the guard does not act.
    PreferenceUnavailable,
    UnsupportedUrl,
    Safe,
    /// No verdict (transport, status or body failure).
    Unavailable,
    /// Phishing verdict for a URL the tab no longer shows.
    Stale,
    Warned,
    InjectionFailed,
}

#[derive(Clone)]
pub struct NavigationMonitor {
    preferences: Arc<dyn PreferenceStore>,
    classifier: Arc<dyn Classifier>,
    host: Arc<dyn TabHost>,
    interposer: WarningInterposer,
    metrics: Arc<GuardMetrics>,
}

impl NavigationMonitor {
    pub fn new(
        preferences: Arc<dyn PreferenceStore>,
        classifier: Arc<dyn Classifier>,
        host: Arc<dyn TabHost>,
        interposer: WarningInterposer,
        metrics: Arc<GuardMetrics>,
    ) -> Self {
        Self {
            preferences,
            classifier,
            host,
            interposer,
            metrics,
        }
    }

    /// Run the pipeline for one event to completion.
    pub async fn handle(&self, event: &NavigationEvent) -> CheckOutcome {
        let Some(raw_url) = event.completed_url() else {
            return CheckOutcome::Ignored;
        };
        let tab_id = event.tab_id;
        GuardMetrics::incr(&self.metrics.navigations_total);

        if let Some(outcome) = self.gate(tab_id, "skipping check").await {
            return outcome;
        }

        let request = match ClassificationRequest::parse(raw_url) {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(tab_id = %tab_id, url = %raw_url, error = %err, "url not classifiable");
                return CheckOutcome::UnsupportedUrl;
            }
        };

        tracing::info!(tab_id = %tab_id, url = %request.url(), "checking url");
        GuardMetrics::incr(&self.metrics.classifications_total);
        let result = match self.classifier.classify(&request).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(tab_id = %tab_id, url = %request.url(), error = %err, "classification unavailable");
                GuardMetrics::incr(&self.metrics.unavailable_total);
                return CheckOutcome::Unavailable;
            }
        };
        if !result.is_phishing() {
            tracing::debug!(
                tab_id = %tab_id,
                label = %result.prediction.label(),
                probability = result.probability,
                "url classified safe"
            );
            return CheckOutcome::Safe;
        }

        tracing::warn!(tab_id = %tab_id, url = %request.url(), probability = result.probability, "phishing detected");
        if !self.still_showing(tab_id, &request).await {
            GuardMetrics::incr(&self.metrics.stale_total);
            return CheckOutcome::Stale;
        }
        // The toggle may have flipped while the request was in flight.
        if let Some(outcome) = self.gate(tab_id, "dropping verdict").await {
            return outcome;
        }
        if self.interposer.interpose(tab_id).await {
            GuardMetrics::incr(&self.metrics.warnings_total);
            CheckOutcome::Warned
        } else {
            GuardMetrics::incr(&self.metrics.injection_failures_total);
            CheckOutcome::InjectionFailed
        }
    }

    /// `None` when the guard is enabled, otherwise the outcome to stop with.
    async fn gate(&self, tab_id: TabId, action: &str) -> Option<CheckOutcome> {
        match GuardPreference::load(self.preferences.as_ref()).await {
            Ok(pref) if pref.enabled => None,
            Ok(_) => {
                tracing::debug!(tab_id = %tab_id, "guard disabled, {}", action);
                GuardMetrics::incr(&self.metrics.disabled_skips_total);
                Some(CheckOutcome::Disabled)
            }
            Err(err) => {
                tracing::warn!(tab_id = %tab_id, error = %err, "could not read guard preference, {}", action);
                Some(CheckOutcome::PreferenceUnavailable)
            }
        }
    }

    async fn still_showing(&self, tab_id: TabId, request: &ClassificationRequest) -> bool {
        match self.host.tab(tab_id).await {
            Ok(Some(tab)) => {
                let current = tab.url.as_deref().unwrap_or("");
                if request.matches(current) {
                    true
                } else {
                    tracing::info!(
                        tab_id = %tab_id,
                        url = %request.url(),
                        current = %current,
                        "tab navigated away before verdict, not warning"
                    );
                    false
                }
            }
            Ok(None) => {
                tracing::info!(tab_id = %tab_id, "tab closed before verdict, not warning");
                false
            }
            Err(err) => {
                tracing::warn!(tab_id = %tab_id, error = %err, "could not re-validate tab, not warning");
                false
            }
        }
    }
}

impl NavigationListener for NavigationMonitor {
    /// Hands the event to its own task so delivery is never blocked.
    fn on_updated(&self, event: NavigationEvent) {
        if event.completed_url().is_none() {
            return;
        }
        let monitor = self.clone();
        tokio::spawn(async move {
            let outcome = monitor.handle(&event).await;
            tracing::trace!(tab_id = %event.tab_id, outcome = ?outcome, "navigation check finished");
        });
    }
}
