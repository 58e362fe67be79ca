//! Resolver configuration.
//!
//! Read from an optional JSON file, then overridden by environment
//! variables. The API key may be pasted as a terminal connection string, in
//! which case the admin URL can come from it too.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

use crate::api;

pub const ENV_ADMIN_URL: &str = "CHECKOUT_RETURN_ADMIN_URL";
pub const ENV_API_KEY: &str = "CHECKOUT_RETURN_API_KEY";
pub const ENV_TIMEOUT_SECS: &str = "CHECKOUT_RETURN_TIMEOUT_SECS";
pub const ENV_MIRROR_DB: &str = "CHECKOUT_RETURN_MIRROR_DB";
pub const ENV_LOG_DIR: &str = "CHECKOUT_RETURN_LOG_DIR";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LOG_DIR: &str = "logs";

/// On-disk shape. Every field is optional so env vars can fill gaps.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileConfig {
    admin_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
    mirror_db: Option<PathBuf>,
    log_dir: Option<PathBuf>,
}

/// Where lookups and updates go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Admin dashboard REST API.
    AdminApi { admin_url: String },
    /// Local SQLite mirror.
    Mirror { path: PathBuf },
}

impl Backend {
    pub fn label(&self) -> &'static str {
        match self {
            Self::AdminApi { .. } => "admin_api",
            Self::Mirror { .. } => "mirror",
        }
    }
}

pub struct ResolverConfig {
    pub backend: Backend,
    /// Raw key or connection string; empty for the mirror backend.
    pub api_key: Zeroizing<String>,
    pub timeout: Duration,
    /// Unset means `logs/` beside the mirror database, or under the working
    /// directory for the admin backend.
    pub log_dir: Option<PathBuf>,
}

impl ResolverConfig {
    pub fn effective_log_dir(&self) -> PathBuf {
        if let Some(dir) = &self.log_dir {
            return dir.clone();
        }
        match &self.backend {
            Backend::Mirror { path } => path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.join(DEFAULT_LOG_DIR))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            Backend::AdminApi { .. } => PathBuf::from(DEFAULT_LOG_DIR),
        }
    }
}

impl std::fmt::Debug for ResolverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverConfig")
            .field("backend", &self.backend)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("log_dir", &self.log_dir)
            .finish()
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Load configuration from `path` (if given) and the environment.
pub fn load(path: Option<&Path>) -> Result<ResolverConfig> {
    let file = match path {
        Some(p) => {
            let raw = std::fs::read_to_string(p)
                .with_context(|| format!("read config file {}", p.display()))?;
            serde_json::from_str::<FileConfig>(&raw)
                .with_context(|| format!("parse config file {}", p.display()))?
        }
        None => FileConfig::default(),
    };

    let api_key = env_value(ENV_API_KEY)
        .or(file.api_key)
        .unwrap_or_default();
    let admin_url = env_value(ENV_ADMIN_URL)
        .or(file.admin_url)
        .or_else(|| api::extract_admin_url_from_connection_string(&api_key))
        .map(|u| api::normalize_admin_url(&u))
        .filter(|u| !u.is_empty());
    let timeout_secs = match env_value(ENV_TIMEOUT_SECS) {
        Some(v) => v
            .parse::<u64>()
            .with_context(|| format!("{ENV_TIMEOUT_SECS} must be a whole number of seconds"))?,
        None => file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
    };
    if timeout_secs == 0 {
        bail!("request timeout must be at least one second");
    }
    let mirror_db = env_value(ENV_MIRROR_DB).map(PathBuf::from).or(file.mirror_db);
    let log_dir = env_value(ENV_LOG_DIR).map(PathBuf::from).or(file.log_dir);

    let backend = match (mirror_db, admin_url) {
        (Some(path), _) => Backend::Mirror { path },
        (None, Some(admin_url)) => {
            if api_key.is_empty() {
                bail!("admin dashboard API key is not configured ({ENV_API_KEY})");
            }
            Backend::AdminApi { admin_url }
        }
        (None, None) => {
            bail!("no backend configured: set {ENV_ADMIN_URL} or {ENV_MIRROR_DB}")
        }
    };

    Ok(ResolverConfig {
        backend,
        api_key: Zeroizing::new(api_key),
        timeout: Duration::from_secs(timeout_secs),
        log_dir,
    })
}
