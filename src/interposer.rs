//! Warning interposer.
//!
//! The only component allowed to touch a user tab.  On a phishing verdict
//! it hands an `Interstitial` to the host injection primitive; the
//! interstitial runs synchronously in the page: a blocking alert, then a
//! confirmation, and a history step back when the user declines.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::host::{TabHost, TabId};

pub const DEFAULT_WARNING_MESSAGE: &str =
    "\u{1F6A8} WARNING: This website may be a phishing site! Proceed with caution.";
pub const DEFAULT_CONFIRM_MESSAGE: &str = "Do you want to continue?";

/// Page-context primitives the interstitial needs.  The browser shim runs
/// the queued `Interstitial` against the real page; `Interstitial::execute`
/// is the behaviour it must reproduce.
pub trait PageContext {
    /// Blocking alert.
    fn alert(&mut self, message: &str);
    /// Blocking confirmation; true means the user accepted.
    fn confirm(&mut self, message: &str) -> bool;
    fn history_back(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InterstitialOutcome {
    Continued,
    Aborted,
}

/// The synchronous script injected into a flagged tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interstitial {
    pub alert_message: String,
    pub confirm_message: String,
}

impl Default for Interstitial {
    fn default() -> Self {
        Self {
            alert_message: DEFAULT_WARNING_MESSAGE.to_string(),
            confirm_message: DEFAULT_CONFIRM_MESSAGE.to_string(),
        }
    }
}

impl Interstitial {
    /// Reference semantics of the injected script: alert, then confirm, and
    /// step back in history when the user declines.
    pub fn execute(&self, page: &mut dyn PageContext) -> InterstitialOutcome {
        page.alert(&self.alert_message);
        if page.confirm(&self.confirm_message) {
            InterstitialOutcome::Continued
        } else {
            page.history_back();
            InterstitialOutcome::Aborted
        }
    }
}

#[derive(Clone)]
pub struct WarningInterposer {
    host: Arc<dyn TabHost>,
    interstitial: Interstitial,
}

impl WarningInterposer {
    pub fn new(host: Arc<dyn TabHost>, interstitial: Interstitial) -> Self {
        Self { host, interstitial }
    }

    pub fn interstitial(&self) -> &Interstitial {
        &self.interstitial
    }

    /// Inject the warning into `tab`.  Returns false when the host could
    /// not inject (typically the tab closed while the check was in flight).
    /// Failures are logged and never retried.
    pub async fn interpose(&self, tab: TabId) -> bool {
        match self.host.inject(tab, &self.interstitial).await {
            Ok(()) => {
                tracing::info!(tab_id = %tab, "phishing warning injected");
                true
            }
            Err(err) => {
                tracing::warn!(tab_id = %tab, error = %err, "failed to inject phishing warning");
                false
            }
        }
    }
}
