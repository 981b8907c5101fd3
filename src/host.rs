//! Host browser capabilities.
//!
//! The guard never talks to a browser directly.  It depends on `TabHost`
//! (tab lookup and script injection) and receives navigation events
//! through `NavigationListener`.  `BridgeHost` is the in-process
//! implementation used by the daemon: a thin shim in the browser posts tab
//! events to it and drains queued interstitials to run them in the page.

use std::fmt;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::interposer::Interstitial;

/// Opaque tab handle as assigned by the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    Loading,
    Complete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeInfo {
    #[serde(default)]
    pub status: Option<TabStatus>,
}

/// Tab fields carried by a navigation event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabSnapshot {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub active: bool,
}

/// One status transition of one tab, delivered on every change and not
/// only on completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationEvent {
    pub tab_id: TabId,
    #[serde(default)]
    pub change_info: ChangeInfo,
    #[serde(default)]
    pub tab: TabSnapshot,
}

impl NavigationEvent {
    pub fn new(tab_id: TabId, status: TabStatus, url: Option<&str>) -> Self {
        Self {
            tab_id,
            change_info: ChangeInfo {
                status: Some(status),
            },
            tab: TabSnapshot {
                url: url.map(str::to_string),
                active: false,
            },
        }
    }

    /// The URL to check, present only for a completed load with a
    /// non-empty URL.
    pub fn completed_url(&self) -> Option<&str> {
        if self.change_info.status != Some(TabStatus::Complete) {
            return None;
        }
        self.tab.url.as_deref().filter(|u| !u.trim().is_empty())
    }
}

/// Current view of a tab as the host reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tab {
    pub id: TabId,
    pub url: Option<String>,
    pub active: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("tab {0} is closed")]
    TabClosed(TabId),
    #[error("host unavailable: {0}")]
    Unavailable(String),
}

#[async_trait::async_trait]
pub trait TabHost: Send + Sync {
    async fn tab(&self, id: TabId) -> Result<Option<Tab>, HostError>;
    /// Active tab of the current window.
    async fn active_tab(&self) -> Result<Option<Tab>, HostError>;
    /// Run `script` in the page context of `id`.  Fire-and-forget: no
    /// result flows back.
    async fn inject(&self, id: TabId, script: &Interstitial) -> Result<(), HostError>;
}

/// Observer for tab updates.  Must return promptly.
pub trait NavigationListener: Send + Sync {
    fn on_updated(&self, event: NavigationEvent);
}

pub trait NavigationSource {
    fn subscribe(&self, listener: Arc<dyn NavigationListener>);
}

#[derive(Default)]
pub struct BridgeHost {
    tabs: DashMap<TabId, Tab>,
    pending: DashMap<TabId, Vec<Interstitial>>,
    listeners: RwLock<Vec<Arc<dyn NavigationListener>>>,
}

impl BridgeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the tab state carried by `event` and notify subscribers.
    pub fn dispatch(&self, event: NavigationEvent) {
        let id = event.tab_id;
        if event.tab.active {
            for mut entry in self.tabs.iter_mut() {
                if *entry.key() != id {
                    entry.active = false;
                }
            }
        }
        {
            let mut tab = self.tabs.entry(id).or_insert_with(|| Tab {
                id,
                url: None,
                active: false,
            });
            if event.tab.url.is_some() {
                tab.url = event.tab.url.clone();
            }
            tab.active = event.tab.active;
        }

        let listeners = match self.listeners.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        tracing::trace!(tab_id = %id, listeners = listeners.len(), "dispatching tab update");
        for listener in listeners {
            listener.on_updated(event.clone());
        }
    }

    /// Forget a closed tab.  Returns false if it was never seen.
    pub fn close_tab(&self, id: TabId) -> bool {
        self.pending.remove(&id);
        self.tabs.remove(&id).is_some()
    }

    /// Take every interstitial queued for `id`.
    pub fn drain_interstitials(&self, id: TabId) -> Vec<Interstitial> {
        self.pending
            .remove(&id)
            .map(|(_, queued)| queued)
            .unwrap_or_default()
    }

    pub fn tab_count(&self) -> usize {
        self.tabs.len()
    }
}

impl NavigationSource for BridgeHost {
    fn subscribe(&self, listener: Arc<dyn NavigationListener>) {
        match self.listeners.write() {
            Ok(mut guard) => guard.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }
}

#[async_trait::async_trait]
impl TabHost for BridgeHost {
    async fn tab(&self, id: TabId) -> Result<Option<Tab>, HostError> {
        Ok(self.tabs.get(&id).map(|t| t.clone()))
    }

    async fn active_tab(&self) -> Result<Option<Tab>, HostError> {
        Ok(self
            .tabs
            .iter()
            .find(|t| t.active)
            .map(|t| t.value().clone()))
    }

    async fn inject(&self, id: TabId, script: &Interstitial) -> Result<(), HostError> {
        if !self.tabs.contains_key(&id) {
            return Err(HostError::TabClosed(id));
        }
        self.pending.entry(id).or_default().push(script.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<NavigationEvent>>);

    impl NavigationListener for Recorder {
        fn on_updated(&self, event: NavigationEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn active(id: i64, url: &str) -> NavigationEvent {
        let mut ev = NavigationEvent::new(TabId(id), TabStatus::Complete, Some(url));
        ev.tab.active = true;
        ev
    }

    #[test]
    fn completed_url_requires_complete_status_and_url() {
        let id = TabId(1);
        assert_eq!(
            NavigationEvent::new(id, TabStatus::Loading, Some("http://a.test")).completed_url(),
            None
        );
        assert_eq!(
            NavigationEvent::new(id, TabStatus::Complete, None).completed_url(),
            None
        );
        assert_eq!(
            NavigationEvent::new(id, TabStatus::Complete, Some("  ")).completed_url(),
            None
        );
        assert_eq!(
            NavigationEvent::new(id, TabStatus::Complete, Some("http://a.test")).completed_url(),
            Some("http://a.test")
        );
    }

    #[test]
    fn parses_browser_event_shape() {
        let ev: NavigationEvent = serde_json::from_str(
            r#"{"tabId":7,"changeInfo":{"status":"complete"},"tab":{"url":"http://a.test","active":true}}"#,
        )
        .unwrap();
        assert_eq!(ev.tab_id, TabId(7));
        assert_eq!(ev.completed_url(), Some("http://a.test"));
        assert!(ev.tab.active);

        let partial: NavigationEvent =
            serde_json::from_str(r#"{"tabId":7,"changeInfo":{}}"#).unwrap();
        assert_eq!(partial.completed_url(), None);
    }

    #[tokio::test]
    async fn dispatch_tracks_active_tab_and_notifies() {
        let host = BridgeHost::new();
        let recorder = Arc::new(Recorder::default());
        host.subscribe(recorder.clone());

        host.dispatch(active(1, "http://one.test"));
        host.dispatch(active(2, "http://two.test"));

        let current = host.active_tab().await.unwrap().unwrap();
        assert_eq!(current.id, TabId(2));
        assert!(!host.tab(TabId(1)).await.unwrap().unwrap().active);
        assert_eq!(recorder.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn status_only_update_keeps_known_url() {
        let host = BridgeHost::new();
        host.dispatch(active(3, "http://kept.test"));
        host.dispatch(NavigationEvent::new(TabId(3), TabStatus::Loading, None));
        let tab = host.tab(TabId(3)).await.unwrap().unwrap();
        assert_eq!(tab.url.as_deref(), Some("http://kept.test"));
    }

    #[tokio::test]
    async fn inject_queues_until_drained_and_fails_for_closed_tabs() {
        let host = BridgeHost::new();
        host.dispatch(active(4, "http://x.test"));
        host.inject(TabId(4), &Interstitial::default()).await.unwrap();
        assert_eq!(host.drain_interstitials(TabId(4)).len(), 1);
        assert!(host.drain_interstitials(TabId(4)).is_empty());

        assert!(host.close_tab(TabId(4)));
        let err = host
            .inject(TabId(4), &Interstitial::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::TabClosed(TabId(4))));
        assert!(!host.close_tab(TabId(4)));
    }
}
