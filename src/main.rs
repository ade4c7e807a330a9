//! Anti-Scam Assistant — Binary Entrypoint
//! Boots the Axum HTTP server, wiring the config store, detectors, and the
//! conversation backend into the router.

use std::sync::Arc;

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use antiscam_assistant::api;
use antiscam_assistant::conversation::{backend_from_env, ConversationBackend};
use antiscam_assistant::picker::RandomPicker;
use antiscam_assistant::store::{ConfigStore, FileStore};

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - ANTISCAM_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("ANTISCAM_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("antiscam_assistant=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    enable_dev_tracing();

    let data_dir = std::env::var("ANTISCAM_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let store = Arc::new(ConfigStore::new(Box::new(FileStore::new(data_dir))));
    let backend: Arc<dyn ConversationBackend> = Arc::from(backend_from_env());

    let state = api::build_state(store, Arc::new(RandomPicker), backend);
    let router = api::create_router(state);

    Ok(router.into())
}
