use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::interposer::{Interstitial, DEFAULT_CONFIRM_MESSAGE, DEFAULT_WARNING_MESSAGE};

pub const DEFAULT_CLASSIFIER_URL: &str = "http://127.0.0.1:8000/predict";
pub const DEFAULT_PORT: u16 = 8790;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub classifier_url: Url,
    /// `None` keeps the HTTP client's default.
    pub classifier_timeout: Option<Duration>,
    /// `None` keeps the toggle in memory only.
    pub preference_file: Option<String>,
    pub feedback_file: Option<String>,
    /// `None` disables the verdict cache.
    pub verdict_cache_ttl: Option<Duration>,
    pub interstitial: Interstitial,
    /// Loopback port of the control surface (`PORT`).
    pub listen_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let raw_url = env::var("PHISHGUARD_CLASSIFIER_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CLASSIFIER_URL.to_string());
        let classifier_url = Url::parse(raw_url.trim()).with_context(|| {
            format!(
                "PHISHGUARD_CLASSIFIER_URL '{}' is not an absolute URL",
                raw_url
            )
        })?;
        if !matches!(classifier_url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "PHISHGUARD_CLASSIFIER_URL must use http or https, got '{}'",
                classifier_url.scheme()
            ));
        }

        let classifier_timeout =
            parse_optional_u64("PHISHGUARD_CLASSIFIER_TIMEOUT_MS")?.map(Duration::from_millis);
        let verdict_cache_ttl = parse_optional_u64("PHISHGUARD_VERDICT_CACHE_TTL_MS")?
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        let preference_file = non_empty_var("PHISHGUARD_PREFERENCE_FILE");
        let feedback_file = non_empty_var("PHISHGUARD_FEEDBACK_FILE");

        let interstitial = Interstitial {
            alert_message: non_empty_var("PHISHGUARD_WARNING_MESSAGE")
                .unwrap_or_else(|| DEFAULT_WARNING_MESSAGE.to_string()),
            confirm_message: non_empty_var("PHISHGUARD_CONFIRM_MESSAGE")
                .unwrap_or_else(|| DEFAULT_CONFIRM_MESSAGE.to_string()),
        };

        let listen_port = match parse_optional_u64("PORT")? {
            Some(port) => u16::try_from(port)
                .ok()
                .filter(|p| *p > 0)
                .ok_or_else(|| anyhow!("PORT must be between 1 and 65535, got {}", port))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            classifier_url,
            classifier_timeout,
            preference_file,
            feedback_file,
            verdict_cache_ttl,
            interstitial,
            listen_port,
        })
    }
}

fn non_empty_var(var: &str) -> Option<String> {
    env::var(var).ok().filter(|s| !s.trim().is_empty())
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}
