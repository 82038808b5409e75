use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use planit_chat::models::{AuthResponse, LocalIdentity, SenderRole};

/// Tokens issued by /auth/login are kept for a week
pub const SESSION_LIFETIME_DAYS: i64 = 7;

/// A remembered login, so the user is not prompted on every start
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoredSession {
    pub api_url: String,
    pub email: String,
    pub user_id: i64,
    pub role: SenderRole,
    pub first_name: String,
    token: String,
    pub expires_at: DateTime<Utc>,
}

impl StoredSession {
    pub fn from_auth(api_url: &str, auth: &AuthResponse) -> Self {
        StoredSession {
            api_url: api_url.to_string(),
            email: auth.email.clone(),
            user_id: auth.user_id,
            role: auth.role,
            first_name: auth.first_name.clone(),
            token: BASE64.encode(&auth.token),
            expires_at: Utc::now() + Duration::days(SESSION_LIFETIME_DAYS),
        }
    }

    pub fn get_token(&self) -> Option<String> {
        let bytes = BASE64.decode(&self.token).ok()?;
        String::from_utf8(bytes).ok().filter(|t| !t.is_empty())
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    pub fn identity(&self) -> LocalIdentity {
        LocalIdentity::new(self.user_id, self.role)
    }
}

static SESSION_PATH_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

/// Use `path` instead of the per-user config directory. Only the first call has effect.
pub fn set_session_path_override(path: PathBuf) {
    if SESSION_PATH_OVERRIDE.set(path).is_err() {
        warn!("Session file override already set");
    }
}

fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join("planit-chat");
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }
    Ok(config_dir)
}

fn get_session_path() -> Result<PathBuf> {
    if let Some(path) = SESSION_PATH_OVERRIDE.get() {
        return Ok(path.clone());
    }
    Ok(get_config_dir()?.join("session.json"))
}

pub fn save_session(session: &StoredSession) -> Result<()> {
    save_session_to(&get_session_path()?, session)
}

/// The stored session for `api_url`, unless it is missing, expired or for another server
pub fn load_session(api_url: &str) -> Result<Option<StoredSession>> {
    load_session_from(&get_session_path()?, api_url)
}

pub fn clear_session() -> Result<()> {
    let path = get_session_path()?;
    if path.exists() {
        fs::remove_file(&path)?;
        info!("Removed stored session {}", path.display());
    }
    Ok(())
}

fn save_session_to(path: &Path, session: &StoredSession) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, session)?;
    info!("Session saved for {}", session.email);
    Ok(())
}

fn load_session_from(path: &Path, api_url: &str) -> Result<Option<StoredSession>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut contents = String::new();
    File::open(path)?.read_to_string(&mut contents)?;
    let session: StoredSession = serde_json::from_str(&contents)?;

    if session.api_url != api_url {
        info!("Stored session is for {}, ignoring it", session.api_url);
        return Ok(None);
    }
    if session.is_expired() {
        info!("Stored session for {} expired at {}", session.email, session.expires_at);
        return Ok(None);
    }
    info!("Loaded session for {} from {}", session.email, path.display());
    Ok(Some(session))
}
