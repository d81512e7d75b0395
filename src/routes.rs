use axum::{middleware, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::auth::middleware::JwtSecret;
use crate::chat::{conversations, messages};
use crate::community::{crud as community_crud, members as community_members};
use crate::media;
use crate::state::AppState;
use crate::users;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting on uploads: 10 per minute per IP.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>.
    let upload_governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(6) // 1 token every 6 seconds = 10 per minute
            .burst_size(10)
            .finish()
            .expect("Failed to build governor config"),
    );
    let upload_limiter = upload_governor_config.limiter().clone();

    // Background cleanup of rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            upload_limiter.retain_recent();
        }
    });

    let chat_routes = Router::new()
        .route(
            "/api/chat/conversations",
            axum::routing::post(conversations::create_conversation),
        )
        .route(
            "/api/chat/conversations",
            axum::routing::get(conversations::list_conversations),
        )
        .route(
            "/api/chat/messages/{room_id}",
            axum::routing::get(messages::get_history),
        );

    let community_routes = Router::new()
        .route(
            "/api/communities",
            axum::routing::post(community_crud::create_community),
        )
        .route(
            "/api/communities",
            axum::routing::get(community_crud::list_communities),
        )
        .route(
            "/api/communities/{id}/members",
            axum::routing::post(community_members::add_member),
        )
        .route(
            "/api/communities/{id}/members/{user_id}",
            axum::routing::delete(community_members::remove_member),
        );

    // axum's default body limit is 2 MB. The upload cap itself is enforced in
    // the handler, so the transport limit sits one megabyte above the cap.
    let body_limit = (state.max_upload_size_mb as usize + 1) * 1024 * 1024;

    let attachment_routes = Router::new()
        .route(
            "/api/attachments",
            axum::routing::post(media::upload_attachment),
        )
        .route(
            "/api/attachments/{id}",
            axum::routing::get(media::get_attachment),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .layer(GovernorLayer {
            config: upload_governor_config,
        });

    // Mirror of the platform's user records, written by the backend with a
    // service token.
    let user_routes = Router::new().route(
        "/api/users/{id}",
        axum::routing::put(users::upsert_user),
    );

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(chat_routes)
        .merge(community_routes)
        .merge(attachment_routes)
        .merge(user_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
