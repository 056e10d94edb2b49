//! HTTP device source.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::DeviceSource;
use crate::core::DispatchError;

/// Default request timeout.
pub const API_DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Response bodies the API may return.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DeviceList {
    Bare(Vec<String>),
    Wrapped { devices: Vec<String> },
}

impl DeviceList {
    fn into_devices(self) -> Vec<String> {
        match self {
            Self::Bare(devices) | Self::Wrapped { devices } => devices,
        }
    }
}

/// POSTs to `uri + key` and reads a JSON device list, either a bare array or
/// `{"devices": [...]}`.
#[derive(Debug, Clone)]
pub struct ApiSource {
    uri: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl ApiSource {
    /// Source for the `uri` prefix.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            client: reqwest::Client::new(),
            timeout: API_DEFAULT_TIMEOUT,
        }
    }

    /// Override the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Request URL for `key`.
    #[must_use]
    pub fn url_for(&self, key: &str) -> String {
        format!("{}{key}", self.uri)
    }

    async fn request(&self, url: &str) -> Result<Vec<String>, DispatchError> {
        let unavailable = |e: reqwest::Error| DispatchError::SourceUnavailable(format!("{url}: {e}"));
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(unavailable)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::SourceUnavailable(format!("{url}: status {status}")));
        }
        let body = response.text().await.map_err(unavailable)?;
        parse_device_list(&body)
    }
}

/// Decode a device list body.
///
/// # Errors
///
/// Returns [`DispatchError::SourceUnavailable`] when the body is neither shape.
pub fn parse_device_list(body: &str) -> Result<Vec<String>, DispatchError> {
    serde_json::from_str::<DeviceList>(body)
        .map(DeviceList::into_devices)
        .map_err(|e| DispatchError::SourceUnavailable(format!("device list body: {e}")))
}

impl DeviceSource for ApiSource {
    fn fetch(&self, key: &str) -> Result<Vec<String>, DispatchError> {
        let url = self.url_for(key);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DispatchError::Backend(e.to_string()))?;
        let devices = runtime.block_on(self.request(&url))?;
        debug!(url = %url, devices = devices.len(), "device list fetched");
        Ok(devices)
    }

    fn name(&self) -> &'static str {
        "api"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_both_shapes() {
        assert_eq!(parse_device_list(r#"["a","b"]"#).unwrap(), vec!["a", "b"]);
        assert_eq!(
            parse_device_list(r#"{"devices":["c"],"total":1}"#).unwrap(),
            vec!["c"]
        );
        assert!(parse_device_list(r#"{"tokens":[]}"#).is_err());
    }

    #[test]
    fn test_url_joins_key() {
        let source = ApiSource::new("http://127.0.0.1:9/devices/");
        assert_eq!(source.url_for("vip"), "http://127.0.0.1:9/devices/vip");
    }

    #[test]
    fn test_unreachable_endpoint() {
        let source = ApiSource::new("http://127.0.0.1:9/").with_timeout(Duration::from_millis(500));
        assert!(matches!(source.fetch("x"), Err(DispatchError::SourceUnavailable(_))));
    }
}
