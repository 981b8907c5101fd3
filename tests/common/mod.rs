#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{routing::get, Json, Router};
use phishguard::classifier::{Classifier, HttpClassifier};
use phishguard::host::{HostError, Tab, TabHost, TabId};
use phishguard::interposer::{Interstitial, WarningInterposer};
use phishguard::preferences::{PreferenceStore, StoreError};
use phishguard::telemetry::GuardMetrics;
use phishguard::NavigationMonitor;
use serde_json::json;
use tokio::task::JoinHandle;
use url::Url;

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// Handle on the mock classifier: request count and the decoded `url`
/// parameter of every request.
#[derive(Clone, Default)]
pub struct MockClassifier {
    hits: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl MockClassifier {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

// Verdict keyed on the target url:
//   "phish"     -> Phishing, 93
//   "error500"  -> HTTP 500
//   "malformed" -> 200 with an unparsable body
//   "slow"      -> Phishing after 300ms
//   otherwise   -> Safe, 97
async fn predict(
    State(mock): State<MockClassifier>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    mock.hits.fetch_add(1, Ordering::SeqCst);
    let target = params.get("url").cloned().unwrap_or_default();
    mock.seen.lock().unwrap().push(target.clone());
    if target.contains("error500") {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    if target.contains("malformed") {
        return (StatusCode::OK, "{ not json").into_response();
    }
    if target.contains("slow") {
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    if target.contains("phish") || target.contains("slow") {
        Json(json!({"url": target, "prediction": "Phishing", "probability": 93})).into_response()
    } else {
        Json(json!({"url": target, "prediction": "Safe", "probability": 97})).into_response()
    }
}

/// Returns the `/predict` endpoint of a classifier bound to an ephemeral port.
pub async fn start_mock_classifier() -> (Url, MockClassifier, JoinHandle<()>) {
    let mock = MockClassifier::default();
    let app = Router::new()
        .route("/predict", get(predict))
        .with_state(mock.clone());
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let endpoint = Url::parse(&format!("http://{}/predict", addr)).unwrap();
    (endpoint, mock, handle)
}

pub fn unreachable_endpoint() -> Url {
    Url::parse(&format!(
        "http://127.0.0.1:{}/predict",
        65_533u16.saturating_sub(10)
    ))
    .unwrap()
}

pub fn http_classifier(endpoint: Url, timeout_ms: Option<u64>) -> Arc<dyn Classifier> {
    Arc::new(HttpClassifier::new(endpoint, timeout_ms.map(Duration::from_millis)).unwrap())
}

/// In-memory browser stand-in that records injections.
#[derive(Default)]
pub struct FakeHost {
    tabs: Mutex<HashMap<TabId, Tab>>,
    injected: Mutex<Vec<TabId>>,
    reject_injection: AtomicBool,
}

impl FakeHost {
    pub fn open(&self, id: i64, url: &str, active: bool) {
        let id = TabId(id);
        let mut tabs = self.tabs.lock().unwrap();
        if active {
            for tab in tabs.values_mut() {
                tab.active = false;
            }
        }
        tabs.insert(
            id,
            Tab {
                id,
                url: Some(url.to_string()),
                active,
            },
        );
    }

    pub fn close(&self, id: i64) {
        self.tabs.lock().unwrap().remove(&TabId(id));
    }

    pub fn reject_injections(&self) {
        self.reject_injection.store(true, Ordering::SeqCst);
    }

    pub fn injections(&self) -> Vec<TabId> {
        self.injected.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TabHost for FakeHost {
    async fn tab(&self, id: TabId) -> Result<Option<Tab>, HostError> {
        Ok(self.tabs.lock().unwrap().get(&id).cloned())
    }

    async fn active_tab(&self) -> Result<Option<Tab>, HostError> {
        Ok(self
            .tabs
            .lock()
            .unwrap()
            .values()
            .find(|t| t.active)
            .cloned())
    }

    async fn inject(&self, id: TabId, _script: &Interstitial) -> Result<(), HostError> {
        if self.reject_injection.load(Ordering::SeqCst) {
            return Err(HostError::TabClosed(id));
        }
        self.injected.lock().unwrap().push(id);
        Ok(())
    }
}

/// A store whose reads always fail.
pub struct BrokenStore;

#[async_trait::async_trait]
impl PreferenceStore for BrokenStore {
    async fn get(&self, _key: &str) -> Result<Option<bool>, StoreError> {
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "locked",
        )))
    }

    async fn set(&self, _key: &str, _value: bool) -> Result<(), StoreError> {
        Ok(())
    }
}

pub fn build_monitor(
    preferences: Arc<dyn PreferenceStore>,
    classifier: Arc<dyn Classifier>,
    host: Arc<FakeHost>,
) -> (NavigationMonitor, Arc<GuardMetrics>) {
    let metrics = Arc::new(GuardMetrics::new());
    let tab_host: Arc<dyn TabHost> = host;
    let interposer = WarningInterposer::new(tab_host.clone(), Interstitial::default());
    let monitor = NavigationMonitor::new(
        preferences,
        classifier,
        tab_host,
        interposer,
        metrics.clone(),
    );
    (monitor, metrics)
}
