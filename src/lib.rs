//! Checkout return - payment gateway return page backend.
//!
//! When a customer comes back from the payment gateway, the return page only
//! has an opaque reference and a coarse success/failure hint. This crate
//! works out whether the reference names an order or a reservation, finds the
//! record despite the historical id formats, and pushes a `failed` status
//! when the gateway reported a failure the backend has not recorded yet.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod entity;
pub mod error;
pub mod hint;
pub mod reconcile;
pub mod reference;
pub mod resolver;
pub mod store;
pub mod strategy;

pub use config::{Backend, ResolverConfig};
pub use entity::{EntityKind, Order, OrderStatus, Reservation, ReservationStatus, ResolvedEntity};
pub use error::{ResolveError, StoreError};
pub use hint::{ReturnRedirect, StatusHint};
pub use reconcile::ReconciliationOutcome;
pub use resolver::{PaymentReturnResolver, Resolution, ResolutionPhase};
pub use tokio_util::sync::CancellationToken;

/// Install structured logging: console plus a daily rolling file.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process.
pub fn init_logging(config: &ResolverConfig) -> anyhow::Result<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,checkout_return=debug"));

    let about = diagnostics::about(config);
    let log_dir = about.log_dir.clone();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("create log dir {}", log_dir.display()))?;
    diagnostics::prune_old_logs(&log_dir);

    let file_appender = tracing_appender::rolling::daily(&log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;

    info!(
        version = about.version,
        git_sha = about.git_sha,
        backend = about.backend,
        target = %about.target,
        log_dir = %log_dir.display(),
        "Checkout return logging started"
    );
    Ok(guard)
}

/// Build a resolver for the configured backend.
pub fn build_resolver(config: &ResolverConfig) -> anyhow::Result<PaymentReturnResolver> {
    match &config.backend {
        Backend::AdminApi { admin_url } => {
            let store = Arc::new(
                api::AdminApiStore::new(admin_url, config.api_key.as_str(), config.timeout)
                    .context("create admin dashboard store")?,
            );
            info!(admin_url = %store.base_url(), "Resolving against admin dashboard");
            Ok(PaymentReturnResolver::new(store.clone(), store))
        }
        Backend::Mirror { path } => {
            let store = Arc::new(
                db::init(path)
                    .with_context(|| format!("open mirror database {}", path.display()))?,
            );
            info!(path = %path.display(), "Resolving against local mirror");
            Ok(PaymentReturnResolver::new(store.clone(), store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use zeroize::Zeroizing;

    #[tokio::test]
    async fn test_mirror_backed_resolver_end_to_end() {
        let path = std::env::temp_dir()
            .join(format!("checkout-return-{}", uuid::Uuid::new_v4()))
            .join("mirror.db");
        let config = ResolverConfig {
            backend: Backend::Mirror { path: path.clone() },
            api_key: Zeroizing::new(String::new()),
            timeout: Duration::from_secs(5),
            log_dir: None,
        };
        {
            let db = db::init(&path).unwrap();
            db.upsert_order(&Order::new("ord-9", OrderStatus::Pending), Some("9"))
                .unwrap();
        }

        let resolver = build_resolver(&config).unwrap();
        let resolution = resolver
            .resolve_redirect(
                "https://shop.example/payment/result?reference=9&status=failed",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(resolution.kind(), EntityKind::Order);
        assert_eq!(resolution.entity.id(), Some("ord-9"));
        assert_eq!(resolution.reconciliation, ReconciliationOutcome::UpdateIssued);
        assert_eq!(resolution.entity.status(), Some("failed"));

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_admin_backend_builds_without_network() {
        let config = ResolverConfig {
            backend: Backend::AdminApi {
                admin_url: "https://shop.example.com".into(),
            },
            api_key: Zeroizing::new("k".into()),
            timeout: Duration::from_secs(5),
            log_dir: None,
        };
        assert!(build_resolver(&config).is_ok());
    }
}
