use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use janus_api::middleware::require_owner;
use janus_api::{AppState, auth, events};
use janus_gateway::connection;

pub fn app(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/owner/signup", post(auth::signup))
        .route("/owner/login", post(auth::login))
        .route("/event/login", post(auth::participant_login))
        .route("/events/{key}/total", get(events::event_total))
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let owner_routes = Router::new()
        .route("/owner/logout", post(auth::logout))
        .route(
            "/owner/events",
            get(events::list_events).post(events::create_event),
        )
        .route(
            "/owner/events/{key}",
            get(events::get_event)
                .post(events::edit_event)
                .delete(events::delete_event),
        )
        .route("/owner/events/{key}/export", get(events::export_event))
        .route("/owner/claims/{token}", post(events::redeem_claim))
        .layer(middleware::from_fn_with_state(state.clone(), require_owner))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(owner_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Participants authenticate inside the socket with a `Join` command, so the
/// upgrade itself is open.
async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let flow = state.flow.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, flow))
}
