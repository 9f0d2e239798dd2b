use anyhow::{Context, Result};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use clockface_core::{Gallery, NullExtractor, Store};
use clockface_store::SqliteStore;

mod config;
mod dbus;
mod session;

use config::Config;
use session::SessionConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("clockfaced starting");

    let config = Config::from_env();
    if let Some(dir) = config.db_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating data directory {}", dir.display()))?;
    }

    let store = SqliteStore::open(&config.db_path, &config.key_path)
        .await
        .context("opening attendance store")?;
    let enrollees = store
        .list_enrollees_with_descriptors()
        .await
        .context("loading descriptor gallery")?;
    let gallery = Gallery::with_enrollees(config.descriptor_dim, enrollees);
    tracing::info!(
        db = %config.db_path.display(),
        enrollees = gallery.len(),
        vectors = gallery.vector_count(),
        "gallery loaded"
    );

    let session_config = SessionConfig {
        windows: config.windows,
        distance_threshold: config.distance_threshold,
        fallback_threshold: config.fallback_threshold,
        identify_cooldown: Duration::from_secs(config.identify_cooldown_secs),
        complete_reset: Duration::from_secs(config.complete_reset_secs),
        rejected_reset: Duration::from_secs(config.rejected_reset_secs),
    };
    let session = session::spawn_session(session_config, store.clone(), NullExtractor, gallery);
    let events = session.subscribe();

    let service = dbus::KioskService::new(session, store);
    let conn = zbus::connection::Builder::session()?
        .name(dbus::BUS_NAME)?
        .serve_at(dbus::OBJECT_PATH, service)?
        .build()
        .await
        .context("registering on the session bus")?;

    let forwarder_conn = conn.clone();
    tokio::spawn(async move {
        if let Err(err) = dbus::forward_events(forwarder_conn, events).await {
            tracing::error!(error = %err, "event forwarder exited");
        }
    });

    tracing::info!(bus = dbus::BUS_NAME, "clockfaced ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("clockfaced shutting down");

    Ok(())
}
