#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::async_trait;
use axum::routing::get;
use axum::Router;

use gateway_server::auth::AuthVerifier;
use gateway_server::broker::membership::MembershipError;
use gateway_server::broker::MembershipSource;
use gateway_server::config::Config;
use gateway_server::handlers;
use gateway_server::hub::Hub;
use gateway_server::state::AppState;
use gateway_server::websocket;

/// A `MembershipSource` with no guilds at all — enough for the HTTP-surface
/// tests, which never exercise fan-out.
pub struct NoGuilds;

#[async_trait]
impl MembershipSource for NoGuilds {
    async fn guilds_of(&self, _user_id: &str) -> Result<HashMap<String, Vec<String>>, MembershipError> {
        Ok(HashMap::new())
    }
}

/// Build the full application router against an in-memory `Hub`, with no
/// live Redis or upstream auth service — suitable for the plain-HTTP routes
/// (`/`, `/health`) and router wiring. WS upgrade tests exercise `hub::*`
/// directly instead of going through the network stack.
pub fn create_test_app(admin_password: Option<&str>) -> Router {
    let mut config = Config::from_env();
    config.admin_password = admin_password.map(str::to_owned);

    let state = AppState {
        hub: Hub::new(Arc::new(NoGuilds)),
        auth: AuthVerifier::new("http://127.0.0.1:1"),
        config: Arc::new(config),
    };

    Router::new()
        .route("/", get(handlers::liveness))
        .route("/health", get(handlers::health))
        .route("/ws", get(websocket::presence_handler))
        .route("/video-ws", get(websocket::voice_handler))
        .with_state(state)
}
