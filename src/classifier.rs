//! Classification client.
//!
//! Sends one `GET <endpoint>?url=<url>` per check to the external
//! URL-reputation service and normalizes the JSON answer into a
//! `ClassificationResult`.  Every failure mode (transport, non-2xx status,
//! unparsable body) surfaces as a `ClassifyError`; callers treat that as
//! "no verdict" and never escalate it into a warning.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

/// Label the classifier uses for a positive verdict.
pub const PHISHING_LABEL: &str = "Phishing";

#[derive(Debug, thiserror::Error)]
pub enum UrlError {
    #[error("url is empty")]
    Empty,
    #[error("url is not absolute: {0}")]
    Parse(#[from] url::ParseError),
    #[error("scheme '{0}' is not classifiable")]
    UnsupportedScheme(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("classifier request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("classifier returned HTTP {0}")]
    Status(u16),
    #[error("malformed classifier response: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A well-formed absolute http(s) URL to classify.  Built fresh for every
/// check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationRequest {
    url: Url,
}

impl ClassificationRequest {
    pub fn parse(raw: &str) -> Result<Self, UrlError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(UrlError::Empty);
        }
        let url = Url::parse(raw)?;
        match url.scheme() {
            "http" | "https" => Ok(Self { url }),
            other => Err(UrlError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// True when `raw` names the same resource as this request.
    pub fn matches(&self, raw: &str) -> bool {
        Url::parse(raw.trim()).map(|u| u == self.url).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prediction {
    Phishing,
    /// Any non-phishing label, kept verbatim (`Legitimate`, `Safe`, ...).
    Safe(String),
}

impl Prediction {
    pub fn from_label(label: &str) -> Self {
        if label == PHISHING_LABEL {
            Prediction::Phishing
        } else {
            Prediction::Safe(label.to_string())
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Prediction::Phishing => PHISHING_LABEL,
            Prediction::Safe(label) => label,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub prediction: Prediction,
    pub probability: f64,
}

impl ClassificationResult {
    /// The warning decision: true only for a phishing verdict.
    pub fn is_phishing(&self) -> bool {
        self.prediction == Prediction::Phishing
    }
}

/// Wire shape of the classifier answer.  The service also echoes `url`.
#[derive(Debug, Deserialize)]
struct PredictResponse {
    prediction: String,
    probability: f64,
    #[serde(default)]
    url: Option<String>,
}

impl From<PredictResponse> for ClassificationResult {
    fn from(resp: PredictResponse) -> Self {
        Self {
            prediction: Prediction::from_label(&resp.prediction),
            probability: resp.probability,
        }
    }
}

/// Anything that can turn a URL into a verdict.
#[async_trait::async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, ClassifyError>;
}

/// Single-attempt HTTP client for the classifier endpoint.
pub struct HttpClassifier {
    endpoint: Url,
    client: reqwest::Client,
}

impl HttpClassifier {
    /// `timeout` of `None` keeps the transport default.
    pub fn new(endpoint: Url, timeout: Option<Duration>) -> Result<Self, ClassifyError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            endpoint,
            client: builder.build()?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Endpoint with the target appended as a percent-encoded `url` query
    /// parameter.  Existing query pairs on the endpoint are kept.
    pub fn request_url(&self, request: &ClassificationRequest) -> Url {
        let mut target = self.endpoint.clone();
        target
            .query_pairs_mut()
            .append_pair("url", request.url().as_str());
        target
    }
}

#[async_trait::async_trait]
impl Classifier for HttpClassifier {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, ClassifyError> {
        let target = self.request_url(request);
        tracing::debug!(url = %request.url(), "checking url");
        let resp = self.client.get(target).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClassifyError::Status(status.as_u16()));
        }
        let text = resp.text().await?;
        let parsed: PredictResponse = serde_json::from_str(&text)?;
        if let Some(echoed) = parsed.url.as_deref() {
            if !request.matches(echoed) {
                tracing::debug!(url = %request.url(), echoed = %echoed, "classifier echoed a different url");
            }
        }
        tracing::debug!(
            url = %request.url(),
            prediction = %parsed.prediction,
            probability = parsed.probability,
            "classifier response"
        );
        Ok(parsed.into())
    }
}
