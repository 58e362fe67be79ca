//! Startup summary and log-file housekeeping.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::config::{Backend, ResolverConfig};

/// Rolling log files kept by `prune_old_logs`.
pub const MAX_LOG_FILES: usize = 10;

/// Prefix of the rolling log files written by `init_logging`.
pub const LOG_FILE_PREFIX: &str = "checkout-return";

/// Build and wiring summary, logged once when logging starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct About {
    pub version: &'static str,
    pub git_sha: &'static str,
    pub backend: &'static str,
    /// Admin dashboard URL or mirror database path.
    pub target: String,
    pub log_dir: PathBuf,
}

pub fn about(config: &ResolverConfig) -> About {
    let target = match &config.backend {
        Backend::AdminApi { admin_url } => admin_url.clone(),
        Backend::Mirror { path } => path.display().to_string(),
    };
    About {
        version: env!("CARGO_PKG_VERSION"),
        git_sha: env!("BUILD_GIT_SHA"),
        backend: config.backend.label(),
        target,
        log_dir: config.effective_log_dir(),
    }
}

/// Delete all but the newest `MAX_LOG_FILES` rolling logs in `log_dir`.
/// Returns how many were removed. Other files are never touched.
pub fn prune_old_logs(log_dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };
    let mut logs: Vec<(SystemTime, PathBuf)> = entries
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with(LOG_FILE_PREFIX))
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            meta.is_file()
                .then(|| (meta.modified().unwrap_or(UNIX_EPOCH), e.path()))
        })
        .collect();
    logs.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = 0;
    for (_, path) in logs.into_iter().skip(MAX_LOG_FILES) {
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to prune log file {}: {e}", path.display()),
        }
    }
    if removed > 0 {
        debug!(removed, dir = %log_dir.display(), "Pruned old log files");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use zeroize::Zeroizing;

    #[test]
    fn test_about_describes_mirror_backend() {
        let config = ResolverConfig {
            backend: Backend::Mirror {
                path: PathBuf::from("/srv/shop/mirror.db"),
            },
            api_key: Zeroizing::new(String::new()),
            timeout: Duration::from_secs(5),
            log_dir: None,
        };

        let about = about(&config);
        assert_eq!(about.version, env!("CARGO_PKG_VERSION"));
        assert!(!about.git_sha.is_empty());
        assert_eq!(about.backend, "mirror");
        assert_eq!(about.target, "/srv/shop/mirror.db");
        assert_eq!(about.log_dir, PathBuf::from("/srv/shop/logs"));
    }

    #[test]
    fn test_about_describes_admin_backend() {
        let config = ResolverConfig {
            backend: Backend::AdminApi {
                admin_url: "https://shop.example.com".into(),
            },
            api_key: Zeroizing::new("k".into()),
            timeout: Duration::from_secs(5),
            log_dir: Some(PathBuf::from("/var/log/checkout")),
        };

        let about = about(&config);
        assert_eq!(about.backend, "admin_api");
        assert_eq!(about.target, "https://shop.example.com");
        assert_eq!(about.log_dir, PathBuf::from("/var/log/checkout"));
    }

    #[test]
    fn test_prune_keeps_newest_logs_only() {
        let dir = std::env::temp_dir().join(format!("checkout-return-logs-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        for i in 0..(MAX_LOG_FILES + 3) {
            fs::write(dir.join(format!("{LOG_FILE_PREFIX}.2026-01-{:02}", i + 1)), "x").unwrap();
        }
        fs::write(dir.join("unrelated.txt"), "keep").unwrap();

        assert_eq!(prune_old_logs(&dir), 3);

        let remaining = fs::read_dir(&dir)
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(LOG_FILE_PREFIX))
            .count();
        assert_eq!(remaining, MAX_LOG_FILES);
        assert!(dir.join("unrelated.txt").exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_prune_ignores_missing_dir() {
        assert_eq!(prune_old_logs(Path::new("/definitely/not/a/log/dir")), 0);
    }
}
