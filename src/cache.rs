//! Optional short-lived verdict cache.
//!
//! Off unless a TTL is configured.  Only successful verdicts are stored;
//! a failed lookup always goes back to the classifier next time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::classifier::{ClassificationRequest, ClassificationResult, Classifier, ClassifyError};

pub struct CachedClassifier {
    inner: Arc<dyn Classifier>,
    ttl: Duration,
    entries: DashMap<String, (Instant, ClassificationResult)>,
}

impl CachedClassifier {
    pub fn new(inner: Arc<dyn Classifier>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, (at, _)| at.elapsed() < ttl);
    }

    fn fresh(&self, key: &str) -> Option<ClassificationResult> {
        let entry = self.entries.get(key)?;
        let (at, result) = entry.value();
        (at.elapsed() < self.ttl).then(|| result.clone())
    }
}

#[async_trait::async_trait]
impl Classifier for CachedClassifier {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, ClassifyError> {
        let key = request.url().as_str();
        if let Some(hit) = self.fresh(key) {
            tracing::debug!(url = %key, "verdict cache hit");
            return Ok(hit);
        }
        let result = self.inner.classify(request).await?;
        self.entries
            .insert(key.to_string(), (Instant::now(), result.clone()));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Prediction;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Classifier for Counting {
        async fn classify(
            &self,
            _request: &ClassificationRequest,
        ) -> Result<ClassificationResult, ClassifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ClassifyError::Status(503));
            }
            Ok(ClassificationResult {
                prediction: Prediction::Phishing,
                probability: 0.9,
            })
        }
    }

    fn counting(fail: bool) -> Arc<Counting> {
        Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn repeated_url_within_ttl_hits_cache() {
        let inner = counting(false);
        let cache = CachedClassifier::new(inner.clone(), Duration::from_secs(60));
        let req = ClassificationRequest::parse("http://a.test").unwrap();
        cache.classify(&req).await.unwrap();
        cache.classify(&req).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        let other = ClassificationRequest::parse("http://b.test").unwrap();
        cache.classify(&other).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn expired_entries_are_refetched() {
        let inner = counting(false);
        let cache = CachedClassifier::new(inner.clone(), Duration::from_millis(20));
        let req = ClassificationRequest::parse("http://a.test").unwrap();
        cache.classify(&req).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.classify(&req).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.purge_expired();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let inner = counting(true);
        let cache = CachedClassifier::new(inner.clone(), Duration::from_secs(60));
        let req = ClassificationRequest::parse("http://a.test").unwrap();
        assert!(cache.classify(&req).await.is_err());
        assert!(cache.classify(&req).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }
}
