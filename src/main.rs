use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gateway_server::auth::AuthVerifier;
use gateway_server::broker::{self, MembershipSource, NullMembershipSource, RedisMembershipResolver, StreamSubscriber};
use gateway_server::config::Config;
use gateway_server::handlers;
use gateway_server::hub::Hub;
use gateway_server::ping;
use gateway_server::state::AppState;
use gateway_server::websocket;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gateway_server=info,tower_http=info".parse().unwrap());

    let config = Config::from_env();

    if config.is_release() {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("🚀 presence gateway starting...");

    // §9 "Broker unreachable on startup — process may continue without
    // fan-out; a nil subscriber must not crash the hub": a connect failure
    // here degrades to a no-op membership source and skips the subscriber,
    // it never aborts startup.
    let redis_conn = match broker::build_client(&config.redis_uri) {
        Ok(client) => match redis::aio::ConnectionManager::new(client).await {
            Ok(conn) => {
                info!("✅ connected to Redis broker");
                Some(conn)
            }
            Err(e) => {
                tracing::warn!(error = ?e, "Redis connection failed; continuing without fan-out");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = ?e, "invalid RedisURI; continuing without fan-out");
            None
        }
    };

    let membership: Arc<dyn MembershipSource> = match &redis_conn {
        Some(conn) => Arc::new(RedisMembershipResolver::new(conn.clone())),
        None => Arc::new(NullMembershipSource),
    };

    let auth = AuthVerifier::new(config.auth_base_url.as_str());
    let hub = Hub::new(membership);

    if let Some(conn) = redis_conn {
        let mut subscriber = StreamSubscriber::new(conn, hub.registry.clone());
        tokio::spawn(async move {
            if let Err(e) = subscriber.run().await {
                tracing::error!(error = ?e, "stream subscriber exited");
            }
        });
    }

    tokio::spawn(ping::run(hub.registry.clone()));

    let cors = if config.allowed_origins.is_empty() {
        tracing::warn!("🔒 CORS: no AllowedOrigins configured — all cross-origin requests will be denied");
        CorsLayer::new()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        info!("🔒 CORS: allowing origins: {:?}", config.allowed_origins);
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
    };

    let config = Arc::new(config);
    let addr = config.server_addr();

    let app_state = AppState { hub, auth, config };

    let app = Router::new()
        .route("/", get(handlers::liveness))
        .route("/health", get(handlers::health))
        .route("/ws", get(websocket::presence_handler))
        .route("/video-ws", get(websocket::voice_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state);

    info!("🎧 listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app.into_make_service())
        .await
        .expect("Server failed to start");
}
