use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::errors::{Error, Result};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_STATE_DIR: &str = ".noteshare";
pub const DEFAULT_HEARTBEAT_SECS: u64 = 60;

/// Where the backend lives and how the client talks to it
#[derive(Debug, Clone)]
pub struct ClientConfig {
    api_url: Url,
    state_dir: PathBuf,
    /// Whole-request timeout; `None` leaves it to reqwest's defaults
    timeout: Option<Duration>,
    heartbeat_interval: Duration,
}

impl ClientConfig {
    pub fn new(api_url: &str) -> Result<Self> {
        Ok(Self {
            api_url: parse_base_url(api_url)?,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            timeout: None,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
        })
    }

    /// Read `NOTESHARE_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_url = lookup("NOTESHARE_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let mut config = Self::new(&api_url)?;

        if let Some(dir) = lookup("NOTESHARE_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup("NOTESHARE_TIMEOUT_SECS") {
            let secs = parse_secs("NOTESHARE_TIMEOUT_SECS", &secs)?;
            config.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = lookup("NOTESHARE_HEARTBEAT_SECS") {
            config.heartbeat_interval =
                Duration::from_secs(parse_secs("NOTESHARE_HEARTBEAT_SECS", &secs)?);
        }

        Ok(config)
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// File holding the long-lived credential scope
    pub fn credentials_path(&self) -> PathBuf {
        self.state_dir.join("credentials.json")
    }

    /// Join an API path such as `/api/user/notes/` onto the base URL
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.api_url.join(path.trim_start_matches('/'))?)
    }
}

// `Url::join` drops the last segment unless the base ends in a slash
fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_secs(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Invalid(format!("{key} must be a whole number of seconds, got {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.api_url().as_str(), "http://127.0.0.1:8000/");
        assert_eq!(config.state_dir(), Path::new(".noteshare"));
        assert_eq!(config.timeout(), None);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_env_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("NOTESHARE_API_URL", "https://notes.example.com/backend"),
            ("NOTESHARE_STATE_DIR", "/tmp/noteshare"),
            ("NOTESHARE_TIMEOUT_SECS", "5"),
            ("NOTESHARE_HEARTBEAT_SECS", "15"),
        ]))
        .unwrap();

        assert_eq!(config.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(
            config.credentials_path(),
            PathBuf::from("/tmp/noteshare/credentials.json")
        );
        assert_eq!(
            config.endpoint("/api/user/notes/").unwrap().as_str(),
            "https://notes.example.com/backend/api/user/notes/"
        );
    }

    #[test]
    fn test_timeout_is_only_set_when_asked() {
        let config = ClientConfig::new("http://127.0.0.1:8000").unwrap();
        assert_eq!(config.timeout(), None);

        let config = config.with_timeout(Duration::from_secs(2));
        assert_eq!(config.timeout(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_bad_numbers_are_rejected() {
        let result = ClientConfig::from_lookup(lookup(&[("NOTESHARE_TIMEOUT_SECS", "soon")]));
        assert!(matches!(result, Err(Error::Invalid(_))));
    }

    #[test]
    fn test_bad_url_is_rejected() {
        assert!(matches!(ClientConfig::new("not a url"), Err(Error::Url(_))));
    }
}
