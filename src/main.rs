use std::{net::Ipv4Addr, sync::Arc, time::Duration};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use colist::backend::Backend;
use colist::clock::now_millis;
use colist::config::Config;
use colist::services::AttachmentStore;
use colist::{create_app, db, seed, AppState};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("colist=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env().expect("reading configuration");

    let backend = Backend::open(&config.db_path).expect("initializing database");
    let attachments = AttachmentStore::new(config.attachments_dir.clone());
    attachments
        .initialize()
        .await
        .expect("creating attachments directory");

    if config.seed {
        seed::run(&backend).expect("seeding demo data");
    }

    spawn_maintenance(backend.clone(), config.presence_ttl);

    let state = AppState {
        backend,
        attachments,
        base_path: Arc::new(config.base_path.clone()),
        proximity_radius_m: config.proximity_radius_m,
    };
    let app = create_app(state);
    let addr = (Ipv4Addr::UNSPECIFIED, config.port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("binding listener");

    info!("running on {addr:?}");

    axum::serve(listener, app).await.expect("failed serving");
}

/// Drops presence rows past their freshness window and expired sessions.
fn spawn_maintenance(backend: Backend, presence_ttl: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
        loop {
            ticker.tick().await;
            let now = now_millis();
            let cutoff = now - presence_ttl.as_millis() as i64;
            if let Err(err) = backend.prune_stale_presence(cutoff) {
                warn!(error = %err, "Pruning presence failed");
            }
            match db::cleanup_expired_sessions(backend.db(), now) {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Removed expired sessions"),
                Err(err) => warn!(error = %err, "Session cleanup failed"),
            }
        }
    });
}
