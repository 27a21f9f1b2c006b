//! Client configuration.
//!
//! Everything the client needs (API location, credentials, download
//! directory, timeouts) lives in a [`ClientConfig`] value that is passed to
//! [`ApiClient`](crate::api::ApiClient). Environment variables are read once,
//! when the config is built.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::DataCollectiveError;

pub const DEFAULT_API_URL: &str = "https://datacollective.mozillafoundation.org/api";
pub const DEFAULT_DOWNLOAD_DIR: &str = "~/.mozdata/datasets";

pub const ENV_API_KEY: &str = "MDC_API_KEY";
pub const ENV_API_URL: &str = "MDC_API_URL";
pub const ENV_DOWNLOAD_PATH: &str = "MDC_DOWNLOAD_PATH";

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings shared by every request the client makes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base API URL without a trailing slash.
    pub api_url: String,
    /// Bearer token sent with every API request.
    pub api_key: String,
    /// Directory used when a download does not name one.
    pub download_dir: PathBuf,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl ClientConfig {
    /// Create a config with the default API URL and download directory.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: api_key.into(),
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Build a config from `MDC_API_KEY`, `MDC_API_URL` and `MDC_DOWNLOAD_PATH`.
    pub fn from_env() -> Result<Self, DataCollectiveError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    ///
    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DataCollectiveError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let api_key = get(ENV_API_KEY).ok_or_else(|| {
            DataCollectiveError::Config(format!(
                "missing API key; set {ENV_API_KEY} to your MDC API token"
            ))
        })?;

        let mut config = Self::new(api_key);
        if let Some(api_url) = get(ENV_API_URL) {
            config = config.with_api_url(&api_url)?;
        }
        if let Some(download_dir) = get(ENV_DOWNLOAD_PATH) {
            config = config.with_download_dir(download_dir);
        }
        Ok(config)
    }

    /// Override the API base URL. Trailing slashes are dropped.
    pub fn with_api_url(mut self, api_url: &str) -> Result<Self, DataCollectiveError> {
        let trimmed = api_url.trim().trim_end_matches('/');
        url::Url::parse(trimmed).map_err(|source| {
            DataCollectiveError::Config(format!("invalid API URL '{api_url}': {source}"))
        })?;
        self.api_url = trimmed.to_string();
        Ok(self)
    }

    pub fn with_download_dir(mut self, download_dir: impl Into<PathBuf>) -> Self {
        self.download_dir = download_dir.into();
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    /// Absolute URL for the API path made of `segments`.
    ///
    /// Each segment is percent-encoded on its own, so an id containing `/`
    /// stays a single path segment.
    pub fn endpoint(&self, segments: &[&str]) -> Result<String, DataCollectiveError> {
        let mut url = url::Url::parse(&self.api_url).map_err(|source| {
            DataCollectiveError::Config(format!("invalid API URL '{}': {source}", self.api_url))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                DataCollectiveError::Config(format!(
                    "API URL '{}' cannot carry a path",
                    self.api_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url.to_string())
    }
}

/// Expand a leading `~` to the current user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match home::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let config = ClientConfig::from_lookup(lookup(&[(ENV_API_KEY, "key-123")])).expect("config");
        assert_eq!(config.api_key, "key-123");
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.download_dir, PathBuf::from(DEFAULT_DOWNLOAD_DIR));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.read_timeout, Duration::from_secs(60));
    }

    #[test]
    fn missing_key_is_config_error() {
        let err = ClientConfig::from_lookup(lookup(&[(ENV_API_URL, "https://x.test")]))
            .expect_err("should fail");
        match err {
            DataCollectiveError::Config(message) => assert!(message.contains(ENV_API_KEY)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn blank_key_counts_as_missing() {
        assert!(ClientConfig::from_lookup(lookup(&[(ENV_API_KEY, "   ")])).is_err());
    }

    #[test]
    fn custom_url_and_download_dir_from_env() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_API_KEY, "k"),
            (ENV_API_URL, "https://custom.api.url/"),
            (ENV_DOWNLOAD_PATH, "/data/mdc"),
        ]))
        .expect("config");
        assert_eq!(config.api_url, "https://custom.api.url");
        assert_eq!(config.download_dir, PathBuf::from("/data/mdc"));
        assert_eq!(
            config.endpoint(&["datasets", "abc123"]).expect("endpoint"),
            "https://custom.api.url/datasets/abc123"
        );
    }

    #[test]
    fn endpoint_encodes_each_segment() {
        let config = ClientConfig::new("k");
        assert_eq!(
            config
                .endpoint(&["datasets", "org/name with space", "download"])
                .expect("endpoint"),
            "https://datacollective.mozillafoundation.org/api/datasets/org%2Fname%20with%20space/download"
        );
    }

    #[test]
    fn invalid_api_url_is_rejected() {
        let err = ClientConfig::new("k").with_api_url("not a url").expect_err("should fail");
        assert!(matches!(err, DataCollectiveError::Config(_)));
    }

    #[test]
    fn expand_home_leaves_plain_paths_alone() {
        assert_eq!(expand_home(Path::new("/tmp/x")), PathBuf::from("/tmp/x"));
        let expanded = expand_home(Path::new("~/datasets"));
        assert!(expanded.ends_with("datasets"));
    }
}
