//! Manual scan of the active tab.
//!
//! Same classifier call as the monitor, but the outcome is rendered into a
//! status surface instead of a page interstitial.  Read-only: it never
//! injects anything and is not gated by the guard toggle.

use std::sync::Arc;

use serde::Serialize;

use crate::classifier::{ClassificationRequest, ClassificationResult, Classifier};
use crate::host::TabHost;
use crate::telemetry::GuardMetrics;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ScanStatus {
    Safe { probability: f64 },
    Phishing { probability: f64 },
    Error { detail: String },
}

impl ScanStatus {
    fn from_result(result: &ClassificationResult) -> Self {
        if result.is_phishing() {
            ScanStatus::Phishing {
                probability: result.probability,
            }
        } else {
            ScanStatus::Safe {
                probability: result.probability,
            }
        }
    }

    /// Status line for the popup surface.
    pub fn render(&self) -> String {
        match self {
            ScanStatus::Phishing { probability } => format!(
                "\u{1F6A8} WARNING: PHISHING SITE DETECTED! {}%",
                probability
            ),
            ScanStatus::Safe { probability } => {
                format!("\u{2705} This site is SAFE. {}%", probability)
            }
            ScanStatus::Error { .. } => "\u{26A0}\u{FE0F} Error fetching data.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub status: ScanStatus,
    pub message: String,
}

impl ScanReport {
    fn new(url: Option<String>, status: ScanStatus) -> Self {
        let message = status.render();
        Self {
            url,
            status,
            message,
        }
    }
}

#[derive(Clone)]
pub struct ManualScan {
    classifier: Arc<dyn Classifier>,
    host: Arc<dyn TabHost>,
    metrics: Arc<GuardMetrics>,
}

impl ManualScan {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        host: Arc<dyn TabHost>,
        metrics: Arc<GuardMetrics>,
    ) -> Self {
        Self {
            classifier,
            host,
            metrics,
        }
    }

    /// Classify whatever the active tab shows right now.
    pub async fn scan(&self) -> ScanReport {
        GuardMetrics::incr(&self.metrics.scans_total);
        let tab = match self.host.active_tab().await {
            Ok(Some(tab)) => tab,
            Ok(None) => {
                return ScanReport::new(
                    None,
                    ScanStatus::Error {
                        detail: "no active tab".into(),
                    },
                )
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not resolve active tab");
                return ScanReport::new(
                    None,
                    ScanStatus::Error {
                        detail: err.to_string(),
                    },
                );
            }
        };
        let raw = tab.url.unwrap_or_default();
        self.scan_url(&raw).await
    }

    pub async fn scan_url(&self, raw: &str) -> ScanReport {
        let request = match ClassificationRequest::parse(raw) {
            Ok(request) => request,
            Err(err) => {
                return ScanReport::new(
                    Some(raw.to_string()).filter(|u| !u.is_empty()),
                    ScanStatus::Error {
                        detail: err.to_string(),
                    },
                )
            }
        };
        let status = match self.classifier.classify(&request).await {
            Ok(result) => ScanStatus::from_result(&result),
            Err(err) => {
                tracing::error!(url = %request.url(), error = %err, "error checking site");
                ScanStatus::Error {
                    detail: err.to_string(),
                }
            }
        };
        ScanReport::new(Some(request.url().to_string()), status)
    }
}
