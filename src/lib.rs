//! Core library for phishguard.  This module wires the guard pipeline
//! (preference store, classifier client, navigation monitor, warning
//! interposer, manual scan) to the host bridge and exposes the control
//! surface the browser shim and the popup talk to.

pub mod cache;
pub mod classifier;
mod config;
pub mod feedback;
pub mod host;
pub mod interposer;
pub mod monitor;
pub mod preferences;
pub mod scan;
pub mod telemetry;

pub use config::{AppConfig, DEFAULT_CLASSIFIER_URL, DEFAULT_PORT};

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::extract::{rejection::JsonRejection, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::CachedClassifier;
use crate::classifier::{ClassificationRequest, Classifier, HttpClassifier};
use crate::feedback::{FeedbackClassifier, FeedbackError, FeedbackStore};
use crate::host::{BridgeHost, NavigationEvent, NavigationSource, TabHost, TabId};
use crate::interposer::WarningInterposer;
use crate::preferences::{
    FilePreferenceStore, GuardPreference, MemoryPreferenceStore, PreferenceStore,
};
use crate::telemetry::GuardMetrics;

pub use crate::monitor::{CheckOutcome, NavigationMonitor};
pub use crate::scan::{ManualScan, ScanReport, ScanStatus};

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_code: i32,
    pub message: String,
    pub http_status: u16,
}

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub monitor: NavigationMonitor,
    pub scanner: ManualScan,
    pub bridge: Arc<BridgeHost>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub feedback: Arc<FeedbackStore>,
    /// Present only when a verdict cache TTL is configured.
    pub cache: Option<Arc<CachedClassifier>>,
    pub metrics: Arc<GuardMetrics>,
    pub classifier_url: Url,
    pub process_start_instant: Instant,
}

/// Assemble the guard from a parsed configuration.
///
/// The classifier stack is `http -> cache (optional) -> feedback`, so a
/// recorded correction applies immediately even to cached verdicts.  The
/// monitor is subscribed to the bridge before this returns.
pub fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let http = HttpClassifier::new(config.classifier_url.clone(), config.classifier_timeout)
        .context("Failed to build classifier HTTP client")?;
    let mut classifier: Arc<dyn Classifier> = Arc::new(http);

    let cache = config
        .verdict_cache_ttl
        .map(|ttl| Arc::new(CachedClassifier::new(classifier.clone(), ttl)));
    if let Some(cache) = &cache {
        classifier = cache.clone() as Arc<dyn Classifier>;
    }

    let feedback = Arc::new(match config.feedback_file.as_deref() {
        Some(path) => FeedbackStore::open(path)?,
        None => FeedbackStore::in_memory(),
    });
    let classifier: Arc<dyn Classifier> =
        Arc::new(FeedbackClassifier::new(classifier, feedback.clone()));

    let preferences: Arc<dyn PreferenceStore> = match config.preference_file.as_deref() {
        Some(path) => Arc::new(FilePreferenceStore::new(path)),
        None => {
            tracing::info!("PHISHGUARD_PREFERENCE_FILE not set; guard toggle kept in memory");
            Arc::new(MemoryPreferenceStore::new())
        }
    };

    let bridge = Arc::new(BridgeHost::new());
    let host: Arc<dyn TabHost> = bridge.clone();
    let metrics = Arc::new(GuardMetrics::new());

    let interposer = WarningInterposer::new(host.clone(), config.interstitial.clone());
    let monitor = NavigationMonitor::new(
        preferences.clone(),
        classifier.clone(),
        host.clone(),
        interposer,
        metrics.clone(),
    );
    bridge.subscribe(Arc::new(monitor.clone()));
    let scanner = ManualScan::new(classifier, host, metrics.clone());

    Ok(AppState {
        monitor,
        scanner,
        bridge,
        preferences,
        feedback,
        cache,
        metrics,
        classifier_url: config.classifier_url,
        process_start_instant: Instant::now(),
    })
}

/// Build state from environment variables; see `AppConfig::from_env`.
pub fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
    build_state(config).map_err(|e| e.into())
}

/// Periodically evict expired cache entries.  No-op without a cache.
pub fn spawn_cache_purge(state: &AppState, every: Duration) -> Option<tokio::task::JoinHandle<()>> {
    let cache = state.cache.clone()?;
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            cache.purge_expired();
        }
    }))
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .route(
            "/preference",
            get(get_preference_handler).put(put_preference_handler),
        )
        .route("/navigation", post(navigation_handler))
        .route("/tabs/:id", delete(close_tab_handler))
        .route("/tabs/:id/interstitials", get(interstitials_handler))
        .route("/scan", post(scan_handler))
        .route("/feedback", post(feedback_handler))
        .with_state(state)
}

fn respond_with_error(err: ErrorResponse) -> axum::response::Response {
    let status = StatusCode::from_u16(err.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err)).into_response()
}

fn bad_request(error_code: i32, message: String) -> axum::response::Response {
    respond_with_error(ErrorResponse {
        error_code,
        message,
        http_status: 400,
    })
}

fn preference_store_error(err: preferences::StoreError) -> axum::response::Response {
    tracing::warn!(error = %err, "preference store failure");
    respond_with_error(ErrorResponse {
        error_code: 5001,
        message: format!("Preference store unavailable: {}", err),
        http_status: 503,
    })
}

async fn healthz_handler(State(state): State<AppState>) -> axum::response::Response {
    let json = serde_json::json!({
        "status": "ok",
        "classifier": state.classifier_url.as_str(),
        "cacheEntries": state.cache.as_ref().map(|c| c.len()),
        "feedbackEntries": state.feedback.len(),
        "tabs": state.bridge.tab_count(),
    });
    (StatusCode::OK, Json(json)).into_response()
}

async fn metrics_handler(State(state): State<AppState>) -> axum::response::Response {
    let body = state
        .metrics
        .render(state.process_start_instant.elapsed().as_secs_f64());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

async fn get_preference_handler(State(state): State<AppState>) -> axum::response::Response {
    match GuardPreference::load(state.preferences.as_ref()).await {
        Ok(pref) => (StatusCode::OK, Json(pref)).into_response(),
        Err(err) => preference_store_error(err),
    }
}

async fn put_preference_handler(
    State(state): State<AppState>,
    payload: Result<Json<GuardPreference>, JsonRejection>,
) -> axum::response::Response {
    let pref = match payload {
        Ok(Json(pref)) => pref,
        Err(rejection) => return bad_request(4001, rejection.body_text()),
    };
    if let Err(err) = pref.save(state.preferences.as_ref()).await {
        return preference_store_error(err);
    }
    tracing::info!(
        enabled = pref.enabled,
        "Phishing Guard {}",
        if pref.enabled { "ENABLED" } else { "DISABLED" }
    );
    (StatusCode::OK, Json(pref)).into_response()
}

/// Ingest one tab update from the browser shim.  The check itself runs in
/// the background; the shim gets 202 immediately.
async fn navigation_handler(
    State(state): State<AppState>,
    payload: Result<Json<NavigationEvent>, JsonRejection>,
) -> axum::response::Response {
    let event = match payload {
        Ok(Json(event)) => event,
        Err(rejection) => return bad_request(4002, rejection.body_text()),
    };
    state.bridge.dispatch(event);
    StatusCode::ACCEPTED.into_response()
}

async fn close_tab_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> axum::response::Response {
    if state.bridge.close_tab(TabId(id)) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        respond_with_error(ErrorResponse {
            error_code: 4040,
            message: format!("Unknown tab {}", id),
            http_status: 404,
        })
    }
}

async fn interstitials_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> axum::response::Response {
    let pending = state.bridge.drain_interstitials(TabId(id));
    (StatusCode::OK, Json(pending)).into_response()
}

async fn scan_handler(State(state): State<AppState>) -> axum::response::Response {
    let report = state.scanner.scan().await;
    (StatusCode::OK, Json(report)).into_response()
}

#[derive(Debug, Deserialize)]
struct FeedbackRequest {
    url: String,
    label: String,
}

async fn feedback_handler(
    State(state): State<AppState>,
    payload: Result<Json<FeedbackRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => return bad_request(4003, rejection.body_text()),
    };
    let request = match ClassificationRequest::parse(&body.url) {
        Ok(request) => request,
        Err(err) => return bad_request(4004, format!("Invalid url: {}", err)),
    };
    match state.feedback.record(&request, &body.label).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err @ FeedbackError::UnknownLabel(_)) => bad_request(4005, err.to_string()),
        Err(err) => {
            tracing::warn!(error = %err, "failed to persist feedback");
            respond_with_error(ErrorResponse {
                error_code: 5002,
                message: err.to_string(),
                http_status: 500,
            })
        }
    }
}
