//! User corrections to classifier labels.
//!
//! A correction replaces the label for one URL; the classifier is still
//! consulted so the reported probability stays the model's.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::classifier::{
    ClassificationRequest, ClassificationResult, Classifier, ClassifyError, Prediction,
    PHISHING_LABEL,
};

pub const LEGITIMATE_LABEL: &str = "Legitimate";
pub const SAFE_LABEL: &str = "Safe";

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("unknown label '{0}', expected Phishing, Legitimate or Safe")]
    UnknownLabel(String),
    #[error("failed to persist feedback: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEntry {
    pub label: String,
    pub recorded_at: DateTime<Utc>,
}

/// URL -> corrected label, optionally mirrored to a JSON file.
#[derive(Default)]
pub struct FeedbackStore {
    entries: DashMap<String, FeedbackEntry>,
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl FeedbackStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load corrections from `path`; a missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.into();
        let entries = DashMap::new();
        match std::fs::read_to_string(&path) {
            Ok(content) if !content.trim().is_empty() => {
                let loaded: HashMap<String, FeedbackEntry> = serde_json::from_str(&content)
                    .with_context(|| {
                        format!("Failed to parse feedback file '{}'", path.display())
                    })?;
                for (url, entry) in loaded {
                    entries.insert(url, entry);
                }
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Failed to read feedback file '{}'", path.display())
                })
            }
        }
        Ok(Self {
            entries,
            path: Some(path),
            write_lock: Mutex::new(()),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn label_for(&self, request: &ClassificationRequest) -> Option<String> {
        self.entries
            .get(request.url().as_str())
            .map(|e| e.label.clone())
    }

    /// Record a correction and persist it if a file is configured.
    ///
    /// The label is matched case-insensitively against the known labels and
    /// stored in canonical form.  The in-memory map only changes once the
    /// file write succeeded.
    pub async fn record(
        &self,
        request: &ClassificationRequest,
        label: &str,
    ) -> Result<(), FeedbackError> {
        let label = canonical_label(label)
            .ok_or_else(|| FeedbackError::UnknownLabel(label.trim().to_string()))?;
        let key = request.url().to_string();
        let entry = FeedbackEntry {
            label: label.to_string(),
            recorded_at: Utc::now(),
        };

        if let Some(path) = &self.path {
            let _guard = self.write_lock.lock().await;
            let mut snapshot: HashMap<String, FeedbackEntry> = self
                .entries
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect();
            snapshot.insert(key.clone(), entry.clone());
            let body = serde_json::to_vec_pretty(&snapshot).map_err(std::io::Error::from)?;
            let tmp = path.with_extension("tmp");
            tokio::fs::write(&tmp, body).await?;
            tokio::fs::rename(&tmp, path).await?;
            self.entries.insert(key, entry);
        } else {
            self.entries.insert(key, entry);
        }
        tracing::info!(url = %request.url(), label = %label, "feedback recorded");
        Ok(())
    }
}

/// Canonical spelling of a correction label, or `None` for anything the
/// classifier would not understand.
pub fn canonical_label(raw: &str) -> Option<&'static str> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case(PHISHING_LABEL) {
        Some(PHISHING_LABEL)
    } else if raw.eq_ignore_ascii_case(LEGITIMATE_LABEL) {
        Some(LEGITIMATE_LABEL)
    } else if raw.eq_ignore_ascii_case(SAFE_LABEL) {
        Some(SAFE_LABEL)
    } else {
        None
    }
}

pub struct FeedbackClassifier {
    inner: Arc<dyn Classifier>,
    feedback: Arc<FeedbackStore>,
}

impl FeedbackClassifier {
    pub fn new(inner: Arc<dyn Classifier>, feedback: Arc<FeedbackStore>) -> Self {
        Self { inner, feedback }
    }
}

#[async_trait::async_trait]
impl Classifier for FeedbackClassifier {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, ClassifyError> {
        let mut result = self.inner.classify(request).await?;
        if let Some(label) = self.feedback.label_for(request) {
            tracing::debug!(url = %request.url(), label = %label, "applying feedback override");
            result.prediction = Prediction::from_label(&label);
        }
        Ok(result)
    }
}
