//! Documentation of the dining menu gateway.
//!
//! A small JSON API in front of the menu and order documents. Every state-changing call is
//! gated behind an anti-CSRF token handed out after the caller proves who they are.
//!
//!
//!
//! # Request Flow
//!
//! - Frontend signs in with Google and sends the identity assertion with verb `gapi_validate`
//! - Backend checks the assertion and replies with an `anticsrf` token, 1 hour lifetime by default
//! - Every later request carries that token in its envelope
//! - `ping` and `gapi_validate` are the only verbs that work without one
//! - Each request also carries `time.conn_init`, the client clock in µs
//! - Requests stamped in the future are refused, stale ones are not
//!
//! See [`pipeline`] for the exact stage order and status codes.
//!
//!
//!
//! # Tokens
//!
//! - 42 random bytes, hex encoded
//! - Kept in one process-wide [`clerk::TokenStore`], created in [`state::State`] and handed
//!   to whoever needs it
//! - Expired tokens are swept on every store operation and by a background task
//! - The last 30 expired tokens are remembered so a late caller hears "expired" instead of
//!   "never registered"
//! - Nothing is persisted, a restart signs everyone out
//!
//!
//!
//! # Setup
//!
//! Run.
//! ```sh
//! RUST_LOG=info cargo run -p gateway
//! ```
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! ```
//!
//!
//!
//! ## Environment
//!
//! | Variable | Default |
//! |---|---|
//! | `RUST_PORT` | `8080` |
//! | `TOKEN_TTL_MS` | `3600000` |
//! | `TOKEN_ENTROPY_BYTES` | `42` |
//! | `TOKEN_AUDIT_CAPACITY` | `30` |
//! | `TOKEN_SWEEP_SECS` | `60`, `0` disables the sweeper |
//! | `GAPI_CLIENT_ID` | the frontend OAuth client |
//! | `ALLOWED_ORIGINS` | localhost dev servers and the GitHub Pages frontend |
//! | `JSON_DIR` | `json` |
//!
//!
//!
//! ## Example
//!
//! ```sh
//! curl -X POST localhost:8080 -H 'content-type: application/json' \
//!   -d '{"verb":"ping","data":{"ping":"hello"},"time":{"conn_init":0}}'
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{HeaderValue, Method, header::CONTENT_TYPE},
    routing::get,
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal, task::JoinHandle, time::interval};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod database;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod gate;
pub mod identity;
pub mod pipeline;
pub mod routes;
pub mod state;
pub mod utils;
pub mod validator;
pub mod verbs;

use clerk::TokenStore;
use routes::{api_handler, hello_handler};
use state::State;

pub async fn start_server() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = State::new().await?;

    info!("Starting server...");

    let sweeper = spawn_sweeper(state.tokens.clone(), state.config.token_sweep_secs);
    let app = router(state.clone()).layer(cors(&state.config.allowed_origins));

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    let revoked = state.tokens.revoke_all();
    info!(
        revoked,
        store = %serde_json::to_string(&state.tokens.snapshot())?,
        "Server shutting down..."
    );

    Ok(())
}

pub fn router(state: Arc<State>) -> Router {
    Router::new()
        .route("/", get(hello_handler).post(api_handler))
        .with_state(state)
}

fn cors(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|e| warn!("Ignoring origin {origin}: {e}"))
                .ok()
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60))
}

/// Sweeps the token store on a timer so idle periods still shed expired tokens.
pub fn spawn_sweeper(tokens: Arc<TokenStore>, period_secs: u64) -> Option<JoinHandle<()>> {
    if period_secs == 0 {
        info!("Token sweeper disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(period_secs));

        loop {
            ticker.tick().await;

            let swept = tokens.sweep();
            if swept > 0 {
                info!(swept, live = tokens.live_len(), "Background sweep");
            }
        }
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use clerk::{ManualClock, StoreConfig};
    use tokio::time::sleep;

    use super::*;

    const START: i64 = 1_700_000_000_000_000;
    const TTL: i64 = 1_000_000;

    fn tokens(clock: &Arc<ManualClock>) -> Arc<TokenStore> {
        Arc::new(TokenStore::new(
            StoreConfig {
                ttl_micros: TTL,
                ..StoreConfig::default()
            },
            clock.clone(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_sweeps_each_period() {
        let clock = ManualClock::new(START);
        let tokens = tokens(&clock);
        tokens.register().unwrap();

        let sweeper = spawn_sweeper(tokens.clone(), 60).unwrap();

        // first tick is immediate and finds nothing expired
        sleep(Duration::from_millis(1)).await;
        assert_eq!(tokens.live_len(), 1);

        clock.advance(TTL);
        sleep(Duration::from_secs(30)).await;
        assert_eq!(tokens.live_len(), 1);

        sleep(Duration::from_secs(31)).await;
        assert_eq!(tokens.live_len(), 0);
        assert_eq!(tokens.audit_len(), 1);

        sweeper.abort();
    }

    #[tokio::test]
    async fn test_sweeper_disabled() {
        let clock = ManualClock::new(START);

        assert!(spawn_sweeper(tokens(&clock), 0).is_none());
    }
}
