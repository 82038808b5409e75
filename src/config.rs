use std::env;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api/v1";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(10000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const API_PREFIX: &str = "/api/v1";
const BROKER_PATH: &str = "/ws/websocket";

/// Connection settings shared by the REST client and the broker session
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_url: String,
    pub ws_url: String,
    /// Fixed pause between reconnect attempts (no backoff, no retry limit)
    pub reconnect_delay: Duration,
    /// Advertised STOMP heart-beat in both directions; zero disables it
    pub heartbeat: Duration,
    pub connect_timeout: Duration,
    pub inbound_buffer: usize,
    pub outbound_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: "ws://localhost:8080/ws/websocket".to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            heartbeat: DEFAULT_HEARTBEAT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            inbound_buffer: 256,
            outbound_buffer: 64,
        }
    }
}

impl ClientConfig {
    /// Config for `api_url` with the broker URL derived from it
    pub fn new(api_url: &str) -> Result<Self, ConfigError> {
        let api_url = api_url.trim_end_matches('/').to_string();
        let ws_url = derive_ws_url(&api_url)?;
        Ok(ClientConfig {
            api_url,
            ws_url,
            ..Default::default()
        })
    }

    /// Reads PLANIT_API_URL, PLANIT_WS_URL and PLANIT_RECONNECT_MS
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("PLANIT_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let mut config = ClientConfig::new(&api_url)?;

        if let Some(ws_url) = lookup("PLANIT_WS_URL").filter(|v| !v.trim().is_empty()) {
            config = config.with_ws_url(&ws_url)?;
        }
        if let Some(raw) = lookup("PLANIT_RECONNECT_MS") {
            let millis = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|&ms| ms > 0)
                .ok_or_else(|| ConfigError::InvalidNumber {
                    name: "PLANIT_RECONNECT_MS".to_string(),
                    value: raw.clone(),
                })?;
            config.reconnect_delay = Duration::from_millis(millis);
        }
        Ok(config)
    }

    pub fn with_ws_url(mut self, ws_url: &str) -> Result<Self, ConfigError> {
        let url = parse_url(ws_url)?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
        self.ws_url = url.to_string();
        Ok(self)
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Value for the STOMP `host` header
    pub fn broker_host(&self) -> String {
        Url::parse(&self.ws_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string())
    }
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl {
        url: raw.to_string(),
        source,
    })
}

/// Broker endpoint for a REST base URL: strip the `/api/v1` suffix, swap
/// http(s) for ws(s) and append the raw WebSocket path.
pub fn derive_ws_url(api_url: &str) -> Result<String, ConfigError> {
    let mut url = parse_url(api_url)?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };
    if url.scheme() != scheme {
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::UnsupportedScheme(url.scheme().to_string()))?;
    }

    let path = url.path().trim_end_matches('/');
    let base = path.strip_suffix(API_PREFIX).unwrap_or(path).to_string();
    url.set_path(&format!("{}{}", base, BROKER_PATH));
    url.set_query(None);
    url.set_fragment(None);

    Ok(url.to_string())
}
